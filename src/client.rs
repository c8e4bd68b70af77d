//! Blocking helpers for common client-side bus calls.
//!
//! Each helper sends one request through the given [`MethodCaller`],
//! blocks until the reply arrives and unpacks it. Error replies from the
//! peer come back as [`Error::Remote`](crate::Error::Remote). There is no
//! timeout and no retry.

use std::collections::hash_map;
use std::collections::HashMap;

use tracing::{debug, trace};
use zbus::zvariant::{DynamicType, OwnedObjectPath, OwnedValue, Value};
use zbus::Message;

use crate::connection::{MethodCaller, Transport};
use crate::error::Result;
use crate::message::{check_reply, interfaces};
use crate::skeleton::PropertyBag;

/// Properties of every interface of one object, keyed by interface name.
pub type InterfaceProperties = HashMap<String, PropertyBag>;

/// Objects reported by `GetManagedObjects`, consumed in a single pass.
#[derive(Debug)]
pub struct ManagedObjects {
    objects: hash_map::IntoIter<OwnedObjectPath, InterfaceProperties>,
}

impl Iterator for ManagedObjects {
    type Item = (OwnedObjectPath, InterfaceProperties);

    fn next(&mut self) -> Option<Self::Item> {
        self.objects.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.objects.size_hint()
    }
}

impl ExactSizeIterator for ManagedObjects {}

/// Send a method call and wait for a non-error reply.
fn call<T, B>(
    conn: &T,
    service: &str,
    path: &str,
    interface: &str,
    method: &str,
    body: &B,
) -> Result<Message>
where
    T: MethodCaller,
    B: serde::Serialize + DynamicType,
{
    trace!(
        service = %service,
        path = %path,
        interface = %interface,
        method = %method,
        "Calling remote method"
    );

    check_reply(conn.call_method(service, path, interface, method, body)?)
}

/// List the objects managed below `path` by `service`.
pub fn get_managed_objects<T: MethodCaller>(
    conn: &T,
    service: &str,
    path: &str,
) -> Result<ManagedObjects> {
    let reply = call(conn, service, path, interfaces::OBJECT_MANAGER, "GetManagedObjects", &())?;
    let objects: HashMap<OwnedObjectPath, InterfaceProperties> = reply.body().deserialize()?;

    debug!(service = %service, path = %path, count = objects.len(), "Got managed objects");
    Ok(ManagedObjects {
        objects: objects.into_iter(),
    })
}

/// Read one property of a remote object.
pub fn get_property<T: MethodCaller>(
    conn: &T,
    service: &str,
    path: &str,
    interface: &str,
    property: &str,
) -> Result<OwnedValue> {
    let reply = call(conn, service, path, interfaces::PROPERTIES, "Get", &(interface, property))?;
    Ok(reply.body().deserialize::<OwnedValue>()?)
}

/// Read all properties of one interface of a remote object.
pub fn get_all_properties<T: MethodCaller>(
    conn: &T,
    service: &str,
    path: &str,
    interface: &str,
) -> Result<PropertyBag> {
    let reply = call(conn, service, path, interfaces::PROPERTIES, "GetAll", &(interface,))?;
    Ok(reply.body().deserialize::<PropertyBag>()?)
}

/// Write one property of a remote object.
///
/// Succeeds when the peer answers with anything other than an error.
pub fn set_property<T: MethodCaller>(
    conn: &T,
    service: &str,
    path: &str,
    interface: &str,
    property: &str,
    value: &Value<'_>,
) -> Result<()> {
    call(
        conn,
        service,
        path,
        interfaces::PROPERTIES,
        "Set",
        &(interface, property, value),
    )?;
    Ok(())
}

/// Broadcast a `PropertiesChanged` signal for `interface` at `path`.
///
/// The invalidated-properties list is always empty.
pub fn emit_properties_changed<T: Transport + ?Sized>(
    conn: &T,
    path: &str,
    interface: &str,
    changed: &PropertyBag,
) -> Result<()> {
    let invalidated: Vec<&str> = Vec::new();
    let signal = Message::signal(path, interfaces::PROPERTIES, "PropertiesChanged")?
        .build(&(interface, changed, invalidated))?;

    conn.send(&signal)?;
    debug!(path = %path, interface = %interface, count = changed.len(), "Emitted PropertiesChanged");
    Ok(())
}
