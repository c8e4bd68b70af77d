//! In-memory bus peer shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dbus_dispatch::client::InterfaceProperties;
use dbus_dispatch::message::{
    check_reply, create_error, create_method_return, error_names, MessageExt,
};
use dbus_dispatch::{Error, MethodCaller, ObjectRegistry, Result, Transport};
use zbus::zvariant::{DynamicType, OwnedObjectPath, OwnedValue, Value};
use zbus::Message;

/// Convert anything with a `Value` representation into an `OwnedValue`.
pub fn owned<'a>(value: impl Into<Value<'a>>) -> OwnedValue {
    value.into().try_to_owned().unwrap()
}

/// Fake remote service answering Properties and ObjectManager calls.
#[derive(Default)]
pub struct MockBus {
    properties: Mutex<HashMap<(String, String), OwnedValue>>,
    managed: Mutex<HashMap<OwnedObjectPath, InterfaceProperties>>,
    fail_with: Mutex<Option<(String, String)>>,
    broken: bool,
    sent: Mutex<Vec<Message>>,
    requests: Mutex<Vec<Message>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose transport fails every round trip.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn with_property(self, interface: &str, property: &str, value: OwnedValue) -> Self {
        self.properties
            .lock()
            .unwrap()
            .insert((interface.to_string(), property.to_string()), value);
        self
    }

    pub fn with_object(self, path: &str, objects: InterfaceProperties) -> Self {
        self.managed
            .lock()
            .unwrap()
            .insert(OwnedObjectPath::try_from(path).unwrap(), objects);
        self
    }

    /// Answer the next request with this error.
    pub fn fail_next(&self, name: &str, message: &str) {
        *self.fail_with.lock().unwrap() = Some((name.to_string(), message.to_string()));
    }

    /// Messages sent without waiting for a reply (replies and signals).
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    /// Method calls made through `call_method`.
    pub fn requests(&self) -> Vec<Message> {
        self.requests.lock().unwrap().clone()
    }

    fn answer(&self, msg: &Message) -> Result<Message> {
        if let Some((name, text)) = self.fail_with.lock().unwrap().take() {
            return create_error(msg, &name, &text);
        }

        match msg.member_str().as_deref() {
            Some("Get") => {
                let (interface, property): (String, String) = msg.body().deserialize()?;
                let properties = self.properties.lock().unwrap();
                match properties.get(&(interface.clone(), property.clone())) {
                    Some(value) => create_method_return(msg, value),
                    None => create_error(
                        msg,
                        error_names::UNKNOWN_PROPERTY,
                        &format!("No such property '{}' on {}", property, interface),
                    ),
                }
            }
            Some("Set") => {
                let (interface, property, value): (String, String, OwnedValue) =
                    msg.body().deserialize()?;
                self.properties
                    .lock()
                    .unwrap()
                    .insert((interface, property), value);
                create_method_return(msg, &())
            }
            Some("GetAll") => {
                let interface: String = msg.body().deserialize()?;
                let properties = self.properties.lock().unwrap();
                let bag: HashMap<&str, &OwnedValue> = properties
                    .iter()
                    .filter(|((i, _), _)| *i == interface)
                    .map(|((_, p), v)| (p.as_str(), v))
                    .collect();
                create_method_return(msg, &bag)
            }
            Some("GetManagedObjects") => {
                let managed = self.managed.lock().unwrap();
                create_method_return(msg, &*managed)
            }
            other => create_error(
                msg,
                error_names::UNKNOWN_METHOD,
                &format!("Unknown method {:?}", other),
            ),
        }
    }
}

impl Transport for MockBus {
    fn send(&self, msg: &Message) -> Result<()> {
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

impl MethodCaller for MockBus {
    fn call_method<B>(
        &self,
        service: &str,
        path: &str,
        interface: &str,
        method: &str,
        body: &B,
    ) -> Result<Message>
    where
        B: serde::Serialize + DynamicType,
    {
        if self.broken {
            return Err(Error::ConnectionClosed("mock".to_string()));
        }
        let request = outgoing_call(service, path, interface, method, body)?;
        self.requests.lock().unwrap().push(request.clone());
        check_reply(self.answer(&request)?)
    }
}

/// Client side wired straight into an in-process [`ObjectRegistry`].
pub struct Loopback {
    pub registry: ObjectRegistry,
    replies: Arc<MockBus>,
}

impl Loopback {
    pub fn new() -> Self {
        let replies = Arc::new(MockBus::new());
        Self {
            registry: ObjectRegistry::new(replies.clone()),
            replies,
        }
    }
}

impl Transport for Loopback {
    fn send(&self, msg: &Message) -> Result<()> {
        self.replies.send(msg)
    }
}

impl MethodCaller for Loopback {
    fn call_method<B>(
        &self,
        service: &str,
        path: &str,
        interface: &str,
        method: &str,
        body: &B,
    ) -> Result<Message>
    where
        B: serde::Serialize + DynamicType,
    {
        let request = outgoing_call(service, path, interface, method, body)?;
        self.registry.handle_message(&request)?;
        let reply = self
            .replies
            .sent()
            .into_iter()
            .find(|m| m.reply_serial() == Some(request.serial()))
            .ok_or_else(|| Error::ConnectionClosed("loopback".to_string()))?;
        check_reply(reply)
    }
}

fn outgoing_call<B>(
    service: &str,
    path: &str,
    interface: &str,
    method: &str,
    body: &B,
) -> Result<Message>
where
    B: serde::Serialize + DynamicType,
{
    Ok(Message::method_call(path, method)?
        .destination(service)?
        .interface(interface)?
        .sender(":1.42")?
        .build(body)?)
}

/// Build an incoming method call.
pub fn method_call<B>(path: &str, interface: &str, method: &str, body: &B) -> Message
where
    B: serde::Serialize + zbus::zvariant::DynamicType,
{
    Message::method_call(path, method)
        .unwrap()
        .interface(interface)
        .unwrap()
        .sender(":1.42")
        .unwrap()
        .build(body)
        .unwrap()
}
