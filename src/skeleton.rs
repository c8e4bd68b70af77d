//! Exported interface objects built from a callback table.
//!
//! [`InterfaceSkeletonEx`] turns a [`SkeletonVTable`] (method dispatch
//! table plus property callbacks) and a user context into an object that
//! answers the three entry points of the [`InterfaceSkeleton`] contract.

use std::fmt;
use std::sync::Arc;

use tracing::{error, warn};
use zbus::fdo;
use zbus::zvariant::{OwnedValue, Value};

use crate::dispatch::{dispatch_method_call, DispatchOutcome, MethodCall, MethodDispatcher};
use crate::error::{DispatchError, Result};
use crate::invocation::MethodInvocation;
use crate::message::error_names;
use crate::schema::InterfaceInfo;

/// Unordered map of property name to value.
pub type PropertyBag = std::collections::HashMap<String, OwnedValue>;

pub type GetPropertyFn<C> = fn(&str, &C) -> fdo::Result<OwnedValue>;
pub type SetPropertyFn<C> = fn(&str, &Value<'_>, &C) -> fdo::Result<()>;
pub type GetPropertiesFn<C> = fn(&C) -> PropertyBag;

/// Destructor run on the context when the skeleton is destroyed.
pub type UserdataFree<C> = Box<dyn FnOnce(Arc<C>) + Send + Sync>;

/// Entry points the object export machinery calls on an exported interface.
pub trait InterfaceSkeleton: Send + Sync {
    /// Static description of the interface.
    fn interface_info(&self) -> &'static InterfaceInfo;

    /// Answer a method call. The invocation must end up completed.
    fn method_call(&self, call: &MethodCall, invocation: MethodInvocation);

    fn get_property(&self, property: &str) -> fdo::Result<OwnedValue>;

    fn set_property(&self, property: &str, value: &Value<'_>) -> fdo::Result<()>;

    /// All properties, for `GetAll` and change notifications.
    fn get_all_properties(&self) -> PropertyBag;
}

/// Callbacks implementing an interface.
pub struct SkeletonVTable<C: 'static> {
    pub dispatchers: &'static [MethodDispatcher<C>],
    pub get_property: Option<GetPropertyFn<C>>,
    pub set_property: Option<SetPropertyFn<C>>,
    pub get_properties: Option<GetPropertiesFn<C>>,
}

impl<C: 'static> SkeletonVTable<C> {
    /// A table with methods only.
    pub const fn new(dispatchers: &'static [MethodDispatcher<C>]) -> Self {
        Self {
            dispatchers,
            get_property: None,
            set_property: None,
            get_properties: None,
        }
    }
}

impl<C: 'static> Clone for SkeletonVTable<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: 'static> Copy for SkeletonVTable<C> {}

/// An exported interface backed by a [`SkeletonVTable`] and a context.
pub struct InterfaceSkeletonEx<C: Send + Sync + 'static> {
    interface_info: &'static InterfaceInfo,
    vtable: SkeletonVTable<C>,
    userdata: Arc<C>,
    userdata_free: Option<UserdataFree<C>>,
}

impl<C: Send + Sync + 'static> InterfaceSkeletonEx<C> {
    /// Create an interface skeleton.
    ///
    /// `userdata` is passed to every callback. `userdata_free`, if given,
    /// runs exactly once when the skeleton is dropped. Detached handlers
    /// that are still running keep their own reference to the context.
    ///
    /// Fails if the interface description is not valid on the bus.
    pub fn new(
        interface_info: &'static InterfaceInfo,
        vtable: SkeletonVTable<C>,
        userdata: C,
        userdata_free: Option<UserdataFree<C>>,
    ) -> Result<Self> {
        interface_info.validate()?;
        Ok(Self {
            interface_info,
            vtable,
            userdata: Arc::new(userdata),
            userdata_free,
        })
    }

    /// The context passed to callbacks.
    pub fn userdata(&self) -> &Arc<C> {
        &self.userdata
    }
}

impl<C: Send + Sync + 'static> InterfaceSkeleton for InterfaceSkeletonEx<C> {
    fn interface_info(&self) -> &'static InterfaceInfo {
        self.interface_info
    }

    fn method_call(&self, call: &MethodCall, invocation: MethodInvocation) {
        let invocation = match dispatch_method_call(
            self.vtable.dispatchers,
            call,
            invocation,
            &self.userdata,
        ) {
            Ok(DispatchOutcome::Dispatched) => return,
            Ok(DispatchOutcome::NoMatch(invocation)) => invocation,
            Err(e) => return complete_launch_failure(call, e),
        };

        error!(
            interface = %call.interface,
            method = %call.method,
            "Couldn't dispatch D-Bus method call"
        );
        let reply = invocation.return_error(
            error_names::UNKNOWN_METHOD,
            &format!("Unknown method: {}.{}()", call.interface, call.method),
        );
        if let Err(e) = reply {
            warn_reply_failed(call, &e);
        }
    }

    fn get_property(&self, property: &str) -> fdo::Result<OwnedValue> {
        match self.vtable.get_property {
            Some(get_property) => get_property(property, &self.userdata),
            None => Err(fdo::Error::UnknownProperty(format!(
                "No readable property {}.{}",
                self.interface_info.name, property
            ))),
        }
    }

    fn set_property(&self, property: &str, value: &Value<'_>) -> fdo::Result<()> {
        match self.vtable.set_property {
            Some(set_property) => set_property(property, value, &self.userdata),
            None => Err(fdo::Error::PropertyReadOnly(format!(
                "Property {}.{} is read-only",
                self.interface_info.name, property
            ))),
        }
    }

    fn get_all_properties(&self) -> PropertyBag {
        match self.vtable.get_properties {
            Some(get_properties) => get_properties(&self.userdata),
            None => PropertyBag::new(),
        }
    }
}

/// Fail a call whose detached handler could not be launched.
fn complete_launch_failure(call: &MethodCall, error: DispatchError) {
    let Some(invocation) = error.into_invocation() else {
        return;
    };
    let reply = invocation.return_error(
        error_names::FAILED,
        &format!("Couldn't dispatch {}.{}()", call.interface, call.method),
    );
    if let Err(e) = reply {
        warn_reply_failed(call, &e);
    }
}

fn warn_reply_failed(call: &MethodCall, error: &crate::Error) {
    warn!(
        interface = %call.interface,
        method = %call.method,
        error = %error,
        "Failed to send error reply"
    );
}

impl<C: Send + Sync + 'static> Drop for InterfaceSkeletonEx<C> {
    fn drop(&mut self) {
        if let Some(free) = self.userdata_free.take() {
            free(Arc::clone(&self.userdata));
        }
    }
}

impl<C: Send + Sync + 'static> fmt::Debug for InterfaceSkeletonEx<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceSkeletonEx")
            .field("interface", &self.interface_info.name)
            .field("dispatchers", &self.vtable.dispatchers.len())
            .finish()
    }
}
