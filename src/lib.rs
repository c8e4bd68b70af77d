//! dbus-dispatch - method call routing and blocking helpers for D-Bus services.
//!
//! This crate sits between a service's business logic and its D-Bus
//! connection. It routes incoming method calls to handlers through ordered
//! filter tables (optionally running a handler on its own thread), exposes
//! objects whose behaviour is given as a small callback table, and provides
//! blocking client calls for reading and writing properties, listing
//! managed objects and broadcasting property changes.

pub mod client;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod invocation;
pub mod message;
pub mod registry;
pub mod schema;
pub mod skeleton;

pub use connection::{BusConnection, MethodCaller, Transport};
pub use dispatch::{dispatch_method_call, DispatchOutcome, MethodCall, MethodDispatcher};
pub use error::{DispatchError, Error, Result};
pub use invocation::MethodInvocation;
pub use registry::ObjectRegistry;
pub use schema::InterfaceInfo;
pub use skeleton::{InterfaceSkeleton, InterfaceSkeletonEx, PropertyBag, SkeletonVTable};
