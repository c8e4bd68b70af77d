//! D-Bus connection management using zbus.
//!
//! The rest of the crate talks to the bus through two traits:
//! [`Transport`] for fire-and-forget sends (replies and signals) and
//! [`MethodCaller`] for blocking request/reply round trips. [`BusConnection`]
//! implements both on top of a blocking zbus connection.

use serde::Serialize;
use tracing::{debug, info, trace};
use zbus::blocking::connection::Builder as ConnectionBuilder;
use zbus::blocking::{Connection, MessageIterator};
use zbus::zvariant::DynamicType;
use zbus::Message;

use crate::error::Result;
use crate::message::MessageExt;

/// Outgoing side of a bus connection.
pub trait Transport: Send + Sync {
    /// Send a message without waiting for anything in return.
    fn send(&self, msg: &Message) -> Result<()>;
}

/// Blocking method calls on a bus connection.
pub trait MethodCaller: Transport {
    /// Call `method` on `service` and block until the reply arrives.
    ///
    /// There is no timeout. An error reply from the peer comes back as
    /// [`Error::Remote`](crate::Error::Remote).
    fn call_method<B>(
        &self,
        service: &str,
        path: &str,
        interface: &str,
        method: &str,
        body: &B,
    ) -> Result<Message>
    where
        B: Serialize + DynamicType;
}

/// A blocking connection to a D-Bus bus.
#[derive(Debug)]
pub struct BusConnection {
    /// The underlying zbus connection.
    connection: Connection,
    /// Human-readable name for logging.
    name: String,
}

impl BusConnection {
    /// Connect to a D-Bus bus at the given address.
    ///
    /// # Arguments
    /// * `address` - The D-Bus address (e.g., "unix:path=/path/to/socket").
    /// * `name` - A human-readable name for logging.
    pub fn connect(address: &str, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        info!(address = %address, name = %name, "Connecting to D-Bus");

        let connection = ConnectionBuilder::address(address)?.build()?;
        Ok(Self::wrap(connection, name))
    }

    /// Connect to the session bus.
    ///
    /// # Arguments
    /// * `address` - Optional override for the session bus address.
    ///   If None, uses DBUS_SESSION_BUS_ADDRESS env var.
    /// * `name` - A human-readable name for logging.
    pub fn connect_session(address: Option<&str>, name: impl Into<String>) -> Result<Self> {
        match address {
            Some(addr) => Self::connect(addr, name),
            None => {
                let name = name.into();
                info!(name = %name, "Connecting to default session bus");
                Ok(Self::wrap(Connection::session()?, name))
            }
        }
    }

    /// Connect to the system bus.
    pub fn connect_system(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        info!(name = %name, "Connecting to system bus");
        Ok(Self::wrap(Connection::system()?, name))
    }

    /// Wrap an already established zbus connection.
    pub fn wrap(connection: Connection, name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(
            name = %name,
            unique_name = ?connection.unique_name().map(|n| n.to_string()),
            "Connected to D-Bus"
        );
        Self { connection, name }
    }

    /// Get the connection's unique name on the bus.
    pub fn unique_name(&self) -> Option<String> {
        self.connection.unique_name().map(|n| n.to_string())
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Iterate over every message arriving on this connection.
    pub fn incoming(&self) -> MessageIterator {
        MessageIterator::from(&self.connection)
    }

    /// Get the human-readable name of this connection.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for BusConnection {
    fn send(&self, msg: &Message) -> Result<()> {
        self.connection.send(msg)?;
        trace!(bus = %self.name, serial = msg.serial(), "Sent message");
        Ok(())
    }
}

impl MethodCaller for BusConnection {
    fn call_method<B>(
        &self,
        service: &str,
        path: &str,
        interface: &str,
        method: &str,
        body: &B,
    ) -> Result<Message>
    where
        B: Serialize + DynamicType,
    {
        let reply = self
            .connection
            .call_method(Some(service), path, Some(interface), method, body)?;
        trace!(
            bus = %self.name,
            reply_serial = ?reply.reply_serial(),
            "Received reply"
        );
        Ok(reply)
    }
}
