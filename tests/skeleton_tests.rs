//! Tests for interface skeletons built from callback tables.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{method_call, owned, MockBus};
use dbus_dispatch::message::{check_reply, error_names, MessageExt};
use dbus_dispatch::schema::{ArgInfo, MethodInfo, PropertyAccess, PropertyInfo};
use dbus_dispatch::{
    Error, InterfaceInfo, InterfaceSkeleton, InterfaceSkeletonEx, MethodCall, MethodDispatcher,
    MethodInvocation, ObjectRegistry, PropertyBag, SkeletonVTable, Transport,
};
use zbus::fdo;
use zbus::zvariant::{OwnedValue, Value};

static PLAYER: InterfaceInfo = InterfaceInfo {
    name: "org.example.Player1",
    methods: &[
        MethodInfo {
            name: "Play",
            in_args: &[ArgInfo { name: "track", signature: "s" }],
            out_args: &[],
        },
        MethodInfo { name: "Stop", in_args: &[], out_args: &[] },
    ],
    signals: &[],
    properties: &[
        PropertyInfo { name: "Volume", signature: "q", access: PropertyAccess::ReadWrite },
        PropertyInfo { name: "Name", signature: "s", access: PropertyAccess::Read },
    ],
};

static BROKEN: InterfaceInfo = InterfaceInfo {
    name: "not an interface",
    methods: &[],
    signals: &[],
    properties: &[],
};

struct Player {
    name: String,
    volume: Mutex<u16>,
    playing: Mutex<Option<String>>,
}

impl Player {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            volume: Mutex::new(40),
            playing: Mutex::new(None),
        }
    }
}

// "Stop" is declared in the schema but has no handler.
static PLAYER_METHODS: [MethodDispatcher<Player>; 1] = [MethodDispatcher::new(play).method("Play")];

fn play(invocation: MethodInvocation, player: Arc<Player>) {
    let (track,): (String,) = invocation.parameters().unwrap();
    *player.playing.lock().unwrap() = Some(track);
    invocation.return_empty().unwrap();
}

fn get_property(property: &str, player: &Player) -> fdo::Result<OwnedValue> {
    match property {
        "Volume" => Ok(owned(*player.volume.lock().unwrap())),
        "Name" => Ok(owned(player.name.as_str())),
        _ => Err(fdo::Error::UnknownProperty(property.to_string())),
    }
}

fn set_property(property: &str, value: &Value<'_>, player: &Player) -> fdo::Result<()> {
    match (property, value) {
        ("Volume", Value::U16(volume)) => {
            *player.volume.lock().unwrap() = *volume;
            Ok(())
        }
        ("Volume", _) => Err(fdo::Error::InvalidArgs("Volume must be a uint16".to_string())),
        _ => Err(fdo::Error::PropertyReadOnly(property.to_string())),
    }
}

fn get_properties(player: &Player) -> PropertyBag {
    let mut bag = PropertyBag::new();
    bag.insert("Volume".to_string(), owned(*player.volume.lock().unwrap()));
    bag.insert("Name".to_string(), owned(player.name.as_str()));
    bag
}

fn vtable() -> SkeletonVTable<Player> {
    SkeletonVTable {
        dispatchers: &PLAYER_METHODS,
        get_property: Some(get_property),
        set_property: Some(set_property),
        get_properties: Some(get_properties),
    }
}

fn counting_free(counter: &Arc<AtomicUsize>) -> Box<dyn FnOnce(Arc<Player>) + Send + Sync> {
    let counter = Arc::clone(counter);
    Box::new(move |_player| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn invoke(
    skeleton: &InterfaceSkeletonEx<Player>,
    bus: &Arc<MockBus>,
    method: &str,
    body: &(impl serde::Serialize + zbus::zvariant::DynamicType),
) {
    let msg = method_call("/org/example/player", PLAYER.name, method, body);
    let call = MethodCall::from_message(&msg).unwrap();
    let transport: Arc<dyn Transport> = bus.clone();
    skeleton.method_call(&call, MethodInvocation::new(msg, transport));
}

#[test]
fn test_method_call_dispatched() {
    let bus = Arc::new(MockBus::new());
    let skeleton = InterfaceSkeletonEx::new(&PLAYER, vtable(), Player::new("deck"), None).unwrap();

    invoke(&skeleton, &bus, "Play", &("intro.flac",));

    assert_eq!(
        skeleton.userdata().playing.lock().unwrap().as_deref(),
        Some("intro.flac")
    );
    let sent = bus.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_method_return());
}

#[test]
fn test_unmatched_method_replies_unknown_method() {
    let bus = Arc::new(MockBus::new());
    let skeleton = InterfaceSkeletonEx::new(&PLAYER, vtable(), Player::new("deck"), None).unwrap();

    invoke(&skeleton, &bus, "Stop", &());

    let sent = bus.sent();
    assert_eq!(sent.len(), 1);
    match check_reply(sent[0].clone()) {
        Err(Error::Remote { name, message }) => {
            assert_eq!(name, error_names::UNKNOWN_METHOD);
            assert_eq!(message, "Unknown method: org.example.Player1.Stop()");
        }
        other => panic!("expected UnknownMethod, got {:?}", other),
    }
}

#[test]
fn test_property_callbacks_forwarded() {
    let skeleton = InterfaceSkeletonEx::new(&PLAYER, vtable(), Player::new("deck"), None).unwrap();

    assert_eq!(&*skeleton.get_property("Volume").unwrap(), &Value::from(40u16));
    skeleton.set_property("Volume", &Value::from(75u16)).unwrap();
    assert_eq!(&*skeleton.get_property("Volume").unwrap(), &Value::from(75u16));

    // Callback errors come back unchanged.
    assert!(matches!(
        skeleton.set_property("Volume", &Value::from("loud")),
        Err(fdo::Error::InvalidArgs(_))
    ));

    let all = skeleton.get_all_properties();
    assert_eq!(all.len(), 2);
    assert_eq!(&*all["Name"], &Value::from("deck"));
}

#[test]
fn test_missing_callbacks() {
    let bare = SkeletonVTable::<Player>::new(&[]);
    let skeleton = InterfaceSkeletonEx::new(&PLAYER, bare, Player::new("deck"), None).unwrap();

    assert!(matches!(
        skeleton.get_property("Volume"),
        Err(fdo::Error::UnknownProperty(_))
    ));
    assert!(matches!(
        skeleton.set_property("Volume", &Value::from(1u16)),
        Err(fdo::Error::PropertyReadOnly(_))
    ));
    assert!(skeleton.get_all_properties().is_empty());
}

#[test]
fn test_invalid_schema_rejected() {
    let result = InterfaceSkeletonEx::new(&BROKEN, vtable(), Player::new("deck"), None);
    assert!(matches!(result, Err(Error::InvalidSchema(_))));
}

#[test]
fn test_userdata_free_runs_once_on_drop() {
    let counter = Arc::new(AtomicUsize::new(0));
    let skeleton = InterfaceSkeletonEx::new(
        &PLAYER,
        vtable(),
        Player::new("deck"),
        Some(counting_free(&counter)),
    )
    .unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    drop(skeleton);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_userdata_free_receives_context() {
    let seen = Arc::new(Mutex::new(None));
    let seen_in_free = Arc::clone(&seen);
    let skeleton = InterfaceSkeletonEx::new(
        &PLAYER,
        vtable(),
        Player::new("deck"),
        Some(Box::new(move |player: Arc<Player>| {
            *seen_in_free.lock().unwrap() = Some(player.name.clone());
        })),
    )
    .unwrap();

    drop(skeleton);
    assert_eq!(seen.lock().unwrap().as_deref(), Some("deck"));
}

#[test]
fn test_userdata_free_runs_once_on_unexport() {
    let bus = Arc::new(MockBus::new());
    let registry = ObjectRegistry::new(bus.clone());
    let counter = Arc::new(AtomicUsize::new(0));
    let skeleton = InterfaceSkeletonEx::new(
        &PLAYER,
        vtable(),
        Player::new("deck"),
        Some(counting_free(&counter)),
    )
    .unwrap();

    registry.export("/org/example/player", skeleton).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    assert!(registry.unexport("/org/example/player", PLAYER.name));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    assert!(!registry.unexport("/org/example/player", PLAYER.name));
    drop(registry);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
