//! D-Bus message utilities.
//!
//! Header accessors, well-known names and reply builders shared by the
//! dispatcher, the skeleton adapter and the blocking helpers.

use zbus::message::{Message, Type as MessageType};
use zbus::zvariant::DynamicType;

use crate::error::{MessageError, Result};

/// Extension trait for reading D-Bus message headers as owned strings.
pub trait MessageExt {
    /// Get the destination of the message.
    fn destination_str(&self) -> Option<String>;

    /// Get the sender of the message.
    fn sender_str(&self) -> Option<String>;

    /// Get the interface of the message.
    fn interface_str(&self) -> Option<String>;

    /// Get the member (method/signal name) of the message.
    fn member_str(&self) -> Option<String>;

    /// Get the path of the message.
    fn path_str(&self) -> Option<String>;

    /// Get the error name of an error message.
    fn error_name_str(&self) -> Option<String>;

    /// Get the serial number of the message.
    fn serial(&self) -> u32;

    /// Get the reply serial of the message (for replies).
    fn reply_serial(&self) -> Option<u32>;

    /// Check if this is a method call.
    fn is_method_call(&self) -> bool;

    /// Check if this is a method return.
    fn is_method_return(&self) -> bool;

    /// Check if this is an error reply.
    fn is_error(&self) -> bool;

    /// Check if this is a signal.
    fn is_signal(&self) -> bool;
}

impl MessageExt for Message {
    fn destination_str(&self) -> Option<String> {
        self.header().destination().map(|d| d.to_string())
    }

    fn sender_str(&self) -> Option<String> {
        self.header().sender().map(|s| s.to_string())
    }

    fn interface_str(&self) -> Option<String> {
        self.header().interface().map(|i| i.to_string())
    }

    fn member_str(&self) -> Option<String> {
        self.header().member().map(|m| m.to_string())
    }

    fn path_str(&self) -> Option<String> {
        self.header().path().map(|p| p.to_string())
    }

    fn error_name_str(&self) -> Option<String> {
        self.header().error_name().map(|e| e.to_string())
    }

    fn serial(&self) -> u32 {
        self.primary_header().serial_num().get()
    }

    fn reply_serial(&self) -> Option<u32> {
        self.header().reply_serial().map(|n| n.get())
    }

    fn is_method_call(&self) -> bool {
        self.primary_header().msg_type() == MessageType::MethodCall
    }

    fn is_method_return(&self) -> bool {
        self.primary_header().msg_type() == MessageType::MethodReturn
    }

    fn is_error(&self) -> bool {
        self.primary_header().msg_type() == MessageType::Error
    }

    fn is_signal(&self) -> bool {
        self.primary_header().msg_type() == MessageType::Signal
    }
}

/// Turn a reply into an `Err` if the peer answered with an error message.
///
/// The error text is the first string argument of the error body, or empty
/// if the peer sent none. Extra arguments after it are ignored.
pub fn check_reply(reply: Message) -> Result<Message> {
    if !reply.is_error() {
        return Ok(reply);
    }
    if reply.error_name_str().is_none() {
        return Err(MessageError::MissingHeader("error_name".to_string()).into());
    }

    Err(zbus::Error::from(reply).into())
}

/// Create a method return message from a request message.
pub fn create_method_return<B: serde::Serialize + DynamicType>(
    request: &Message,
    body: &B,
) -> Result<Message> {
    let reply = Message::method_return(&request.header())?.build(body)?;
    Ok(reply)
}

/// Create an error message from a request message.
pub fn create_error(request: &Message, error_name: &str, error_message: &str) -> Result<Message> {
    let reply = Message::error(&request.header(), error_name)?.build(&(error_message,))?;
    Ok(reply)
}

/// Well-known interface names.
pub mod interfaces {
    pub const PROPERTIES: &str = "org.freedesktop.DBus.Properties";
    pub const OBJECT_MANAGER: &str = "org.freedesktop.DBus.ObjectManager";
    pub const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
    pub const PEER: &str = "org.freedesktop.DBus.Peer";
}

/// Common D-Bus error names.
pub mod error_names {
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
}
