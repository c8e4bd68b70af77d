//! Method call routing.
//!
//! A dispatch table is an ordered slice of [`MethodDispatcher`] entries.
//! Each entry filters on sender, object path, interface and method name;
//! a `None` filter matches anything. The first matching entry wins and its
//! handler runs either inline on the calling thread or on a detached
//! worker thread.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, error};
use zbus::Message;

use crate::error::{DispatchError, MessageError};
use crate::invocation::MethodInvocation;
use crate::message::MessageExt;

/// Handler invoked for a matched method call.
///
/// The handler owns the invocation and must complete it.
pub type MethodHandler<C> = fn(MethodInvocation, Arc<C>);

/// Identity of an incoming method call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub method: String,
}

impl MethodCall {
    pub fn new(
        sender: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            path: path.into(),
            interface: interface.into(),
            method: method.into(),
        }
    }

    /// Read the call identity from a method call message.
    ///
    /// A missing sender (peer-to-peer connections) reads as an empty string.
    pub fn from_message(msg: &Message) -> Result<Self, MessageError> {
        if !msg.is_method_call() {
            return Err(MessageError::UnexpectedType("expected method call".to_string()));
        }
        Ok(Self {
            sender: msg.sender_str().unwrap_or_default(),
            path: msg
                .path_str()
                .ok_or_else(|| MessageError::MissingHeader("path".to_string()))?,
            interface: msg
                .interface_str()
                .ok_or_else(|| MessageError::MissingHeader("interface".to_string()))?,
            method: msg
                .member_str()
                .ok_or_else(|| MessageError::MissingHeader("member".to_string()))?,
        })
    }
}

/// One routing rule of a dispatch table.
pub struct MethodDispatcher<C> {
    pub sender: Option<&'static str>,
    pub path: Option<&'static str>,
    pub interface: Option<&'static str>,
    pub method: Option<&'static str>,
    pub handler: MethodHandler<C>,
    /// Run the handler on its own thread instead of the dispatching one.
    pub detached: bool,
}

impl<C> MethodDispatcher<C> {
    /// A catch-all entry running `handler` inline.
    pub const fn new(handler: MethodHandler<C>) -> Self {
        Self {
            sender: None,
            path: None,
            interface: None,
            method: None,
            handler,
            detached: false,
        }
    }

    pub const fn sender(self, sender: &'static str) -> Self {
        Self { sender: Some(sender), ..self }
    }

    pub const fn path(self, path: &'static str) -> Self {
        Self { path: Some(path), ..self }
    }

    pub const fn interface(self, interface: &'static str) -> Self {
        Self { interface: Some(interface), ..self }
    }

    pub const fn method(self, method: &'static str) -> Self {
        Self { method: Some(method), ..self }
    }

    pub const fn detached(self) -> Self {
        Self { detached: true, ..self }
    }

    /// Check whether this entry accepts the call.
    pub fn matches(&self, call: &MethodCall) -> bool {
        fn accepts(filter: Option<&str>, value: &str) -> bool {
            filter.map_or(true, |f| f == value)
        }

        accepts(self.sender, &call.sender)
            && accepts(self.path, &call.path)
            && accepts(self.interface, &call.interface)
            && accepts(self.method, &call.method)
    }
}

impl<C> Clone for MethodDispatcher<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for MethodDispatcher<C> {}

impl<C> fmt::Debug for MethodDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDispatcher")
            .field("sender", &self.sender)
            .field("path", &self.path)
            .field("interface", &self.interface)
            .field("method", &self.method)
            .field("detached", &self.detached)
            .finish()
    }
}

/// Result of a successful dispatch call.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A handler ran inline or was handed to a detached worker.
    Dispatched,
    /// No entry matched; the invocation is returned untouched.
    NoMatch(MethodInvocation),
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched)
    }
}

/// A handler call handed over to a worker thread.
struct DetachedCall<C> {
    handler: MethodHandler<C>,
    invocation: MethodInvocation,
    userdata: Arc<C>,
}

impl<C> DetachedCall<C> {
    fn run(self) {
        (self.handler)(self.invocation, self.userdata);
    }
}

fn take_job<C>(slot: &Mutex<Option<DetachedCall<C>>>) -> Option<DetachedCall<C>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Route a method call through a dispatch table.
///
/// Entries are checked in order and the first match is dispatched; later
/// entries are never considered. A detached entry returns as soon as its
/// worker thread is started, without waiting for the handler.
pub fn dispatch_method_call<C>(
    dispatchers: &[MethodDispatcher<C>],
    call: &MethodCall,
    invocation: MethodInvocation,
    userdata: &Arc<C>,
) -> Result<DispatchOutcome, DispatchError>
where
    C: Send + Sync + 'static,
{
    let Some(dispatcher) = dispatchers.iter().find(|d| d.matches(call)) else {
        return Ok(DispatchOutcome::NoMatch(invocation));
    };

    debug!(
        interface = %call.interface,
        method = %call.method,
        path = %call.path,
        detached = dispatcher.detached,
        "Called"
    );

    if !dispatcher.detached {
        (dispatcher.handler)(invocation, Arc::clone(userdata));
        return Ok(DispatchOutcome::Dispatched);
    }

    // The job stays reachable from here so a failed spawn can hand the
    // invocation back instead of dropping it.
    let job = Arc::new(Mutex::new(Some(DetachedCall {
        handler: dispatcher.handler,
        invocation,
        userdata: Arc::clone(userdata),
    })));
    let worker_job = Arc::clone(&job);

    let spawned = thread::Builder::new()
        .name(format!("dbus-call:{}", call.method))
        .spawn(move || {
            if let Some(job) = take_job(&worker_job) {
                job.run();
            }
        });

    match spawned {
        // Dropping the join handle detaches the worker.
        Ok(_) => Ok(DispatchOutcome::Dispatched),
        Err(source) => {
            error!(
                interface = %call.interface,
                method = %call.method,
                error = %source,
                "Couldn't create D-Bus call dispatcher"
            );
            Err(DispatchError::Launch {
                source,
                invocation: take_job(&job).map(|job| job.invocation),
            })
        }
    }
}
