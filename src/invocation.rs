//! One-shot handle for a pending method call.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::trace;
use zbus::zvariant::{DynamicType, Type};
use zbus::{DBusError, Message};

use crate::connection::Transport;
use crate::error::Result;
use crate::message::{create_error, create_method_return, MessageExt};

/// A method call waiting for its reply.
///
/// Every completion method consumes the handle, so a call can be answered
/// at most once. Dropping the handle without completing it leaves the
/// caller waiting.
pub struct MethodInvocation {
    call: Message,
    transport: Arc<dyn Transport>,
}

impl MethodInvocation {
    /// Wrap an incoming method call; replies go out through `transport`.
    pub fn new(call: Message, transport: Arc<dyn Transport>) -> Self {
        Self { call, transport }
    }

    /// The method call message being answered.
    pub fn message(&self) -> &Message {
        &self.call
    }

    pub fn sender(&self) -> Option<String> {
        self.call.sender_str()
    }

    pub fn path(&self) -> Option<String> {
        self.call.path_str()
    }

    pub fn interface(&self) -> Option<String> {
        self.call.interface_str()
    }

    pub fn method(&self) -> Option<String> {
        self.call.member_str()
    }

    /// Decode the call arguments.
    pub fn parameters<T: DeserializeOwned + Type>(&self) -> Result<T> {
        Ok(self.call.body().deserialize::<T>()?)
    }

    /// Complete the call with a return value.
    pub fn return_value<B: serde::Serialize + DynamicType>(self, body: &B) -> Result<()> {
        let reply = create_method_return(&self.call, body)?;
        self.complete(reply)
    }

    /// Complete the call with an empty return.
    pub fn return_empty(self) -> Result<()> {
        self.return_value(&())
    }

    /// Complete the call with a named D-Bus error.
    pub fn return_error(self, error_name: &str, message: &str) -> Result<()> {
        let reply = create_error(&self.call, error_name, message)?;
        self.complete(reply)
    }

    /// Complete the call with a typed D-Bus error such as `zbus::fdo::Error`.
    pub fn return_dbus_error(self, error: &impl DBusError) -> Result<()> {
        let reply = error.create_reply(&self.call.header())?;
        self.complete(reply)
    }

    fn complete(self, reply: Message) -> Result<()> {
        trace!(
            serial = self.call.serial(),
            error = reply.is_error(),
            "Completing method invocation"
        );
        self.transport.send(&reply)
    }
}

impl fmt::Debug for MethodInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("serial", &self.call.serial())
            .field("path", &self.call.path_str())
            .field("interface", &self.call.interface_str())
            .field("method", &self.call.member_str())
            .finish()
    }
}
