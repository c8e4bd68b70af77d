//! Object export table.
//!
//! Holds exported interface skeletons by object path and interface name and
//! turns incoming method call messages into skeleton callbacks. Standard
//! `Properties`, `Introspectable` and `Peer` calls are answered here; all
//! other calls go to the skeleton's `method_call`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, trace, warn};
use zbus::fdo;
use zbus::zvariant::OwnedValue;
use zbus::{DBusError, Message};

use crate::client::emit_properties_changed;
use crate::connection::{BusConnection, Transport};
use crate::dispatch::MethodCall;
use crate::error::{Error, Result};
use crate::invocation::MethodInvocation;
use crate::message::{create_method_return, interfaces, MessageExt};
use crate::skeleton::InterfaceSkeleton;

type Interfaces = BTreeMap<String, Arc<dyn InterfaceSkeleton>>;

/// Exported objects, keyed by path then interface name.
pub struct ObjectRegistry {
    transport: Arc<dyn Transport>,
    objects: RwLock<BTreeMap<String, Interfaces>>,
}

impl ObjectRegistry {
    /// Create an empty registry answering calls through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Export an interface skeleton at `path`.
    pub fn export(&self, path: &str, skeleton: impl InterfaceSkeleton + 'static) -> Result<()> {
        zbus::zvariant::ObjectPath::try_from(path)
            .map_err(|e| Error::InvalidSchema(format!("object path {:?}: {}", path, e)))?;
        let interface = skeleton.interface_info().name;

        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let entry = objects.entry(path.to_string()).or_default();
        if entry.contains_key(interface) {
            return Err(Error::ObjectExists {
                path: path.to_string(),
                interface: interface.to_string(),
            });
        }
        entry.insert(interface.to_string(), Arc::new(skeleton));

        info!(path = %path, interface = %interface, "Exported interface");
        Ok(())
    }

    /// Remove an exported interface. Returns false if it was not exported.
    ///
    /// The skeleton is destroyed once no call in flight still uses it.
    pub fn unexport(&self, path: &str, interface: &str) -> bool {
        let removed = {
            let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = objects.get_mut(path) else {
                return false;
            };
            let removed = entry.remove(interface);
            if entry.is_empty() {
                objects.remove(path);
            }
            removed
        };

        // Dropped outside the lock so the context destructor may use the registry.
        match removed {
            Some(_) => {
                info!(path = %path, interface = %interface, "Unexported interface");
                true
            }
            None => false,
        }
    }

    /// Names of the interfaces exported at `path`.
    pub fn interfaces(&self, path: &str) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|entry| entry.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lookup(&self, path: &str, interface: &str) -> Option<Arc<dyn InterfaceSkeleton>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .and_then(|entry| entry.get(interface))
            .cloned()
    }

    /// Broadcast all properties of an exported interface as changed.
    pub fn notify_properties_changed(&self, path: &str, interface: &str) -> Result<()> {
        let skeleton = self
            .lookup(path, interface)
            .ok_or_else(|| Error::NotExported {
                path: path.to_string(),
                interface: interface.to_string(),
            })?;
        emit_properties_changed(
            self.transport.as_ref(),
            path,
            interface,
            &skeleton.get_all_properties(),
        )
    }

    /// Serve incoming calls until the connection closes.
    pub fn run(&self, connection: &BusConnection) -> Result<()> {
        info!(bus = %connection.name(), "Serving exported objects");
        for msg in connection.incoming() {
            let msg = msg?;
            if let Err(e) = self.handle_message(&msg) {
                warn!(error = %e, member = ?msg.member_str(), "Failed to handle message");
            }
        }
        Err(Error::ConnectionClosed(connection.name().to_string()))
    }

    /// Handle one incoming message.
    ///
    /// Returns false for messages that are not method calls. Every method
    /// call is answered, either here or by the skeleton it is routed to.
    pub fn handle_message(&self, msg: &Message) -> Result<bool> {
        if !msg.is_method_call() {
            return Ok(false);
        }

        let path = msg.path_str().unwrap_or_default();
        let member = msg.member_str().unwrap_or_default();
        trace!(path = %path, interface = ?msg.interface_str(), member = %member, "Incoming call");

        let result = match msg.interface_str().as_deref() {
            Some(interfaces::PROPERTIES) => self.handle_properties(msg, &path, &member),
            Some(interfaces::INTROSPECTABLE) if member == "Introspect" => {
                self.reply(msg, &self.introspect(&path))
            }
            Some(interfaces::PEER) if member == "Ping" => self.reply(msg, &()),
            interface => return self.route_method_call(msg, &path, interface, &member),
        };

        match result {
            Ok(()) => Ok(true),
            Err(Reply::DBus(e)) => {
                debug!(path = %path, member = %member, error = %e, "Replying with error");
                self.send(e.create_reply(&msg.header())?)?;
                Ok(true)
            }
            Err(Reply::Local(e)) => Err(e),
        }
    }

    fn route_method_call(
        &self,
        msg: &Message,
        path: &str,
        interface: Option<&str>,
        member: &str,
    ) -> Result<bool> {
        let found = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|entry| match interface {
                Some(interface) => entry.get(interface).cloned(),
                // Without an interface header, pick the first interface declaring the method.
                None => entry
                    .values()
                    .find(|s| s.interface_info().method(member).is_some())
                    .cloned(),
            });

        let skeleton = match found {
            None => {
                return self.reply_error(
                    msg,
                    fdo::Error::UnknownObject(format!("No such object {}", path)),
                )
            }
            Some(None) => {
                return self.reply_error(
                    msg,
                    fdo::Error::UnknownInterface(format!(
                        "No such interface {} at {}",
                        interface.unwrap_or_default(),
                        path
                    )),
                )
            }
            Some(Some(skeleton)) => skeleton,
        };

        let info = skeleton.interface_info();
        if info.method(member).is_none() {
            return self.reply_error(
                msg,
                fdo::Error::UnknownMethod(format!("Unknown method: {}.{}()", info.name, member)),
            );
        }

        let call = MethodCall {
            sender: msg.sender_str().unwrap_or_default(),
            path: path.to_string(),
            interface: info.name.to_string(),
            method: member.to_string(),
        };
        let invocation = MethodInvocation::new(msg.clone(), Arc::clone(&self.transport));
        skeleton.method_call(&call, invocation);
        Ok(true)
    }

    fn handle_properties(&self, msg: &Message, path: &str, member: &str) -> ReplyResult {
        match member {
            "Get" => {
                let (interface, property): (String, String) = msg.body().deserialize()?;
                let skeleton = self.property_owner(path, &interface)?;
                let readable = skeleton
                    .interface_info()
                    .property(&property)
                    .map(|p| p.access.is_readable());
                match readable {
                    None => Err(unknown_property(&interface, &property).into()),
                    Some(false) => Err(fdo::Error::AccessDenied(format!(
                        "Property {}.{} is not readable",
                        interface, property
                    ))
                    .into()),
                    Some(true) => {
                        let value = skeleton.get_property(&property)?;
                        self.reply(msg, &value)
                    }
                }
            }
            "Set" => {
                let (interface, property, value): (String, String, OwnedValue) =
                    msg.body().deserialize()?;
                let skeleton = self.property_owner(path, &interface)?;
                let Some(info) = skeleton.interface_info().property(&property) else {
                    return Err(unknown_property(&interface, &property).into());
                };
                if !info.access.is_writable() {
                    return Err(fdo::Error::PropertyReadOnly(format!(
                        "Property {}.{} is read-only",
                        interface, property
                    ))
                    .into());
                }
                let signature = value.value_signature().to_string();
                if signature != info.signature {
                    return Err(fdo::Error::InvalidArgs(format!(
                        "Property {}.{} has type '{}', got '{}'",
                        interface, property, info.signature, signature
                    ))
                    .into());
                }
                skeleton.set_property(&property, &value)?;
                self.reply(msg, &())
            }
            "GetAll" => {
                let interface: String = msg.body().deserialize()?;
                let skeleton = self.property_owner(path, &interface)?;
                self.reply(msg, &skeleton.get_all_properties())
            }
            _ => Err(fdo::Error::UnknownMethod(format!(
                "Unknown method: {}.{}()",
                interfaces::PROPERTIES,
                member
            ))
            .into()),
        }
    }

    fn property_owner(
        &self,
        path: &str,
        interface: &str,
    ) -> std::result::Result<Arc<dyn InterfaceSkeleton>, Reply> {
        self.lookup(path, interface).ok_or_else(|| {
            fdo::Error::UnknownInterface(format!("No such interface {} at {}", interface, path))
                .into()
        })
    }

    /// Introspection XML for `path`: its interfaces and direct children.
    pub fn introspect(&self, path: &str) -> String {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);

        let mut xml = String::from(
            "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \
             \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n<node>\n",
        );
        if let Some(entry) = objects.get(path) {
            for skeleton in entry.values() {
                skeleton.interface_info().write_introspection(&mut xml);
            }
        }

        let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
        let children: BTreeSet<&str> = objects
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .collect();
        for child in children {
            xml.push_str(&format!("  <node name=\"{}\"/>\n", child));
        }

        xml.push_str("</node>\n");
        xml
    }

    fn reply<B: serde::Serialize + zbus::zvariant::DynamicType>(
        &self,
        msg: &Message,
        body: &B,
    ) -> ReplyResult {
        let reply = create_method_return(msg, body)?;
        self.send(reply)?;
        Ok(())
    }

    fn reply_error(&self, msg: &Message, error: fdo::Error) -> Result<bool> {
        debug!(member = ?msg.member_str(), error = %error, "Replying with error");
        self.send(error.create_reply(&msg.header())?)?;
        Ok(true)
    }

    fn send(&self, reply: Message) -> Result<()> {
        self.transport.send(&reply)
    }
}

fn unknown_property(interface: &str, property: &str) -> fdo::Error {
    fdo::Error::UnknownProperty(format!("No such property {}.{}", interface, property))
}

/// Outcome of answering a standard interface call: either a D-Bus error to
/// send back to the caller, or a local failure to report.
enum Reply {
    DBus(fdo::Error),
    Local(Error),
}

type ReplyResult = std::result::Result<(), Reply>;

impl From<fdo::Error> for Reply {
    fn from(e: fdo::Error) -> Self {
        Reply::DBus(e)
    }
}

impl From<Error> for Reply {
    fn from(e: Error) -> Self {
        Reply::Local(e)
    }
}

impl From<zbus::Error> for Reply {
    fn from(e: zbus::Error) -> Self {
        Reply::DBus(fdo::Error::InvalidArgs(e.to_string()))
    }
}
