//! Static description of an exported D-Bus interface.
//!
//! Schemas are meant to be written as `static` items and referenced for the
//! lifetime of the process; skeletons borrow them, they never own them.

use std::fmt::Write;

use zbus::names::{InterfaceName, MemberName};
use zbus::zvariant::Signature;

use crate::error::{Error, Result};

/// A named, typed argument of a method or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgInfo {
    pub name: &'static str,
    pub signature: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: &'static str,
    pub in_args: &'static [ArgInfo],
    pub out_args: &'static [ArgInfo],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    pub name: &'static str,
    pub args: &'static [ArgInfo],
}

/// Which property operations the interface allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAccess {
    Read,
    Write,
    ReadWrite,
}

impl PropertyAccess {
    pub fn is_readable(self) -> bool {
        matches!(self, PropertyAccess::Read | PropertyAccess::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, PropertyAccess::Write | PropertyAccess::ReadWrite)
    }

    fn as_str(self) -> &'static str {
        match self {
            PropertyAccess::Read => "read",
            PropertyAccess::Write => "write",
            PropertyAccess::ReadWrite => "readwrite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: &'static str,
    pub signature: &'static str,
    pub access: PropertyAccess,
}

/// Methods, signals and properties of one D-Bus interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: &'static str,
    pub methods: &'static [MethodInfo],
    pub signals: &'static [SignalInfo],
    pub properties: &'static [PropertyInfo],
}

impl InterfaceInfo {
    pub fn method(&self, name: &str) -> Option<&'static MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&'static PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Check that the interface and all member names are valid on the bus.
    pub fn validate(&self) -> Result<()> {
        InterfaceName::try_from(self.name)
            .map_err(|e| Error::InvalidSchema(format!("interface {:?}: {}", self.name, e)))?;

        let members = self
            .methods
            .iter()
            .map(|m| m.name)
            .chain(self.signals.iter().map(|s| s.name))
            .chain(self.properties.iter().map(|p| p.name));
        for member in members {
            MemberName::try_from(member).map_err(|e| {
                Error::InvalidSchema(format!("{}.{}: {}", self.name, member, e))
            })?;
        }

        let args = self
            .methods
            .iter()
            .flat_map(|m| m.in_args.iter().chain(m.out_args).map(move |a| (m.name, a)))
            .chain(self.signals.iter().flat_map(|s| s.args.iter().map(move |a| (s.name, a))));
        for (member, arg) in args {
            check_signature(arg.signature).map_err(|e| {
                Error::InvalidSchema(format!("{}.{} arg {}: {}", self.name, member, arg.name, e))
            })?;
        }
        for property in self.properties {
            check_signature(property.signature).map_err(|e| {
                Error::InvalidSchema(format!("{}.{}: {}", self.name, property.name, e))
            })?;
        }
        Ok(())
    }

    /// Append this interface's introspection XML to `xml`.
    pub fn write_introspection(&self, xml: &mut String) {
        // Writing into a String cannot fail.
        let _ = self.write_xml(xml);
    }

    fn write_xml(&self, xml: &mut String) -> std::fmt::Result {
        writeln!(xml, "  <interface name=\"{}\">", escape(self.name))?;
        for method in self.methods {
            writeln!(xml, "    <method name=\"{}\">", escape(method.name))?;
            write_args(xml, method.in_args, Some("in"))?;
            write_args(xml, method.out_args, Some("out"))?;
            writeln!(xml, "    </method>")?;
        }
        for signal in self.signals {
            writeln!(xml, "    <signal name=\"{}\">", escape(signal.name))?;
            write_args(xml, signal.args, None)?;
            writeln!(xml, "    </signal>")?;
        }
        for property in self.properties {
            writeln!(
                xml,
                "    <property name=\"{}\" type=\"{}\" access=\"{}\"/>",
                escape(property.name),
                escape(property.signature),
                property.access.as_str()
            )?;
        }
        writeln!(xml, "  </interface>")
    }
}

fn check_signature(signature: &str) -> std::result::Result<(), String> {
    if signature.is_empty() {
        return Err("empty signature".to_string());
    }
    Signature::try_from(signature)
        .map(|_| ())
        .map_err(|e| format!("signature {:?}: {}", signature, e))
}

/// Escape text for use inside an XML attribute value.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn write_args(xml: &mut String, args: &[ArgInfo], direction: Option<&str>) -> std::fmt::Result {
    for arg in args {
        match direction {
            Some(direction) => writeln!(
                xml,
                "      <arg name=\"{}\" type=\"{}\" direction=\"{}\"/>",
                escape(arg.name),
                escape(arg.signature),
                direction
            )?,
            None => writeln!(
                xml,
                "      <arg name=\"{}\" type=\"{}\"/>",
                escape(arg.name),
                escape(arg.signature)
            )?,
        }
    }
    Ok(())
}
