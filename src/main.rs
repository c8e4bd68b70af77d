//! dbus-dispatch - command line access to the blocking bus helpers.

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zbus::zvariant::{ObjectPath, OwnedValue, Value};

use dbus_dispatch::client;
use dbus_dispatch::{BusConnection, Error, PropertyBag, Result};

const VERSION: &str = env!("DBUS_DISPATCH_VERSION");

/// Read and write D-Bus properties and list managed objects.
#[derive(Parser, Debug)]
#[command(name = "dbus-dispatch")]
#[command(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Bus address, e.g. "unix:path=/run/user/1000/bus".
    #[arg(long, short = 'a', conflicts_with = "system")]
    address: Option<String>,

    /// Use the system bus instead of the session bus.
    #[arg(long)]
    system: bool,

    /// Log level filter (e.g., "debug", "info", "warn", "error").
    #[arg(long, short = 'v', default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read one property.
    Get {
        service: String,
        path: String,
        interface: String,
        property: String,
    },
    /// Write one property. VALUE is written as TYPE:VALUE, e.g. "u:50".
    Set {
        service: String,
        path: String,
        interface: String,
        property: String,
        value: String,
    },
    /// Read all properties of an interface.
    GetAll {
        service: String,
        path: String,
        interface: String,
    },
    /// List objects reported by an object manager.
    ManagedObjects { service: String, path: String },
    /// Broadcast PropertiesChanged. Each change is written NAME=TYPE:VALUE.
    Emit {
        path: String,
        interface: String,
        #[arg(required = true)]
        changes: Vec<String>,
    },
}

fn main() {
    let args = Args::parse();

    // Set up tracing/logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!(
        address = ?args.address,
        system = args.system,
        version = VERSION,
        revision = option_env!("DBUS_DISPATCH_REVISION").unwrap_or("unknown"),
        "Starting dbus-dispatch"
    );

    if let Err(e) = run(args) {
        error!(error = %e, "Command failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let conn = if args.system {
        BusConnection::connect_system("system")?
    } else {
        BusConnection::connect_session(args.address.as_deref(), "session")?
    };

    match args.command {
        Command::Get {
            service,
            path,
            interface,
            property,
        } => {
            let value = client::get_property(&conn, &service, &path, &interface, &property)?;
            println!("{}", &*value);
        }
        Command::Set {
            service,
            path,
            interface,
            property,
            value,
        } => {
            let value = parse_value(&value)?;
            client::set_property(&conn, &service, &path, &interface, &property, &value)?;
        }
        Command::GetAll {
            service,
            path,
            interface,
        } => {
            let properties = client::get_all_properties(&conn, &service, &path, &interface)?;
            print_properties(&properties, "");
        }
        Command::ManagedObjects { service, path } => {
            for (object, interfaces) in client::get_managed_objects(&conn, &service, &path)? {
                println!("{}", object.as_str());
                for (interface, properties) in &interfaces {
                    println!("  {}", interface);
                    print_properties(properties, "    ");
                }
            }
        }
        Command::Emit {
            path,
            interface,
            changes,
        } => {
            let mut changed = PropertyBag::new();
            for change in &changes {
                let (name, value) = change
                    .split_once('=')
                    .ok_or_else(|| invalid_value(change, "expected NAME=TYPE:VALUE"))?;
                changed.insert(name.to_string(), parse_value(value)?.try_to_owned()?);
            }
            client::emit_properties_changed(&conn, &path, &interface, &changed)?;
        }
    }

    Ok(())
}

fn print_properties(properties: &PropertyBag, indent: &str) {
    let mut names: Vec<&String> = properties.keys().collect();
    names.sort();
    for name in names {
        let value: &OwnedValue = &properties[name];
        println!("{}{} = {}", indent, name, &**value);
    }
}

fn invalid_value(input: &str, reason: &str) -> Error {
    Error::Config(format!("invalid value {:?}: {}", input, reason))
}

/// Parse a `TYPE:VALUE` argument using D-Bus basic type codes.
fn parse_value(input: &str) -> Result<Value<'_>> {
    let (code, raw) = input
        .split_once(':')
        .ok_or_else(|| invalid_value(input, "expected TYPE:VALUE"))?;

    fn num<N: std::str::FromStr>(input: &str, raw: &str) -> Result<N> {
        raw.parse()
            .map_err(|_| invalid_value(input, "not a number of this type"))
    }

    let value = match code {
        "s" => Value::from(raw),
        "b" => Value::from(
            raw.parse::<bool>()
                .map_err(|_| invalid_value(input, "expected true or false"))?,
        ),
        "y" => Value::from(num::<u8>(input, raw)?),
        "n" => Value::from(num::<i16>(input, raw)?),
        "q" => Value::from(num::<u16>(input, raw)?),
        "i" => Value::from(num::<i32>(input, raw)?),
        "u" => Value::from(num::<u32>(input, raw)?),
        "x" => Value::from(num::<i64>(input, raw)?),
        "t" => Value::from(num::<u64>(input, raw)?),
        "d" => Value::from(num::<f64>(input, raw)?),
        "o" => Value::from(
            ObjectPath::try_from(raw).map_err(|e| invalid_value(input, &e.to_string()))?,
        ),
        _ => return Err(invalid_value(input, "unknown type code")),
    };
    Ok(value)
}
