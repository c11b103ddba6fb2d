//! Lifecycle, storage and policy behaviour of the instance, driven through
//! the public API with recording collaborators.

use std::cell::{Cell, RefCell};
use std::mem::MaybeUninit;
use std::ptr;

use mesh_core::{
    ActiveScanResult, ChangedFlags, Context, DeviceRole, Error, Instance, InstanceBuffer,
    MeshInterface, NetworkLayer, Platform, SingleInstance, SlotId, Stack, StateCallback,
    MAX_STATE_CALLBACKS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Construct(&'static str),
    SettingsInit,
    SettingsWipe,
    Reset,
    Restore,
    NetworkLayer(bool),
    Mesh(bool),
    Register(usize),
    Remove(usize),
}

/// Behaviour the doubles follow for the next construction.
#[derive(Debug, Clone, Copy, Default)]
struct Script {
    auto_start: bool,
    network_layer_fails: bool,
    mesh_fails: bool,
    restore_fails: bool,
}

thread_local! {
    static JOURNAL: RefCell<Vec<Event>> = const { RefCell::new(Vec::new()) };
    static SCRIPT: Cell<Script> = Cell::new(Script::default());
}

fn record(event: Event) {
    JOURNAL.with(|j| j.borrow_mut().push(event));
}

fn journal() -> Vec<Event> {
    JOURNAL.with(|j| j.borrow().clone())
}

fn clear_journal() {
    JOURNAL.with(|j| j.borrow_mut().clear());
}

fn script(script: Script) {
    clear_journal();
    SCRIPT.with(|s| s.set(script));
}

fn count(event: Event) -> usize {
    journal().iter().filter(|e| **e == event).count()
}

struct TestPlatform;

impl Platform for TestPlatform {
    fn settings_init(&mut self) {
        record(Event::SettingsInit);
    }
    fn settings_wipe(&mut self) {
        record(Event::SettingsWipe);
    }
    fn reset(&mut self) {
        record(Event::Reset);
    }
}

struct TestNetworkLayer {
    enabled: bool,
    fails: bool,
    mesh_attached: bool,
}

impl NetworkLayer for TestNetworkLayer {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), Error> {
        record(Event::NetworkLayer(enabled));
        if enabled && self.fails {
            return Err(Error::Failed);
        }
        self.enabled = enabled;
        Ok(())
    }
    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

struct TestMesh {
    role: DeviceRole,
    script: Script,
    relays: Vec<(SlotId, StateCallback)>,
    saw_network_layer: bool,
}

impl TestMesh {
    fn signal(&self, flags: ChangedFlags) {
        for (_, cb) in &self.relays {
            cb.invoke(flags);
        }
    }
}

impl MeshInterface for TestMesh {
    fn restore(&mut self) -> Result<(), Error> {
        record(Event::Restore);
        if self.script.restore_fails {
            Err(Error::NotFound)
        } else {
            Ok(())
        }
    }
    fn set_enabled(&mut self, enabled: bool) -> Result<(), Error> {
        record(Event::Mesh(enabled));
        if enabled && self.script.mesh_fails {
            return Err(Error::InvalidState);
        }
        let role = if enabled {
            DeviceRole::Detached
        } else {
            DeviceRole::Disabled
        };
        if role != self.role {
            self.role = role;
            self.signal(ChangedFlags::ROLE);
        }
        Ok(())
    }
    fn role(&self) -> DeviceRole {
        self.role
    }
    fn auto_start(&self) -> bool {
        self.script.auto_start
    }
    fn register_callback(&mut self, slot: SlotId, callback: StateCallback) -> Result<(), Error> {
        record(Event::Register(slot.index()));
        self.relays.push((slot, callback));
        Ok(())
    }
    fn remove_callback(&mut self, slot: SlotId) {
        record(Event::Remove(slot.index()));
        self.relays.retain(|(s, _)| *s != slot);
    }
}

struct TestStack;

impl Stack for TestStack {
    type Platform = TestPlatform;
    type TimerMilli = &'static str;
    #[cfg(feature = "usec-timer")]
    type TimerMicro = &'static str;
    type NetworkLayer = TestNetworkLayer;
    type MeshInterface = TestMesh;
    #[cfg(feature = "raw-link")]
    type LinkRaw = &'static str;
    #[cfg(feature = "app-transport")]
    type AppTransport = &'static str;
    type MessagePool = &'static str;

    fn platform() -> TestPlatform {
        record(Event::Construct("platform"));
        TestPlatform
    }
    fn timer_milli() -> &'static str {
        record(Event::Construct("timer-milli"));
        "timer-milli"
    }
    #[cfg(feature = "usec-timer")]
    fn timer_micro() -> &'static str {
        record(Event::Construct("timer-micro"));
        "timer-micro"
    }
    fn network_layer() -> TestNetworkLayer {
        record(Event::Construct("network-layer"));
        TestNetworkLayer {
            enabled: false,
            fails: SCRIPT.with(Cell::get).network_layer_fails,
            mesh_attached: false,
        }
    }
    fn mesh_interface(network_layer: &mut TestNetworkLayer) -> TestMesh {
        record(Event::Construct("mesh-interface"));
        network_layer.mesh_attached = true;
        TestMesh {
            role: DeviceRole::Disabled,
            script: SCRIPT.with(Cell::get),
            relays: Vec::new(),
            saw_network_layer: true,
        }
    }
    #[cfg(feature = "raw-link")]
    fn link_raw() -> &'static str {
        record(Event::Construct("link-raw"));
        "link-raw"
    }
    #[cfg(feature = "app-transport")]
    fn app_transport() -> &'static str {
        record(Event::Construct("app-transport"));
        "app-transport"
    }
    fn message_pool() -> &'static str {
        record(Event::Construct("message-pool"));
        "message-pool"
    }
}

fn noop_state(_flags: ChangedFlags, _ctx: Context) {}

thread_local! {
    static STATE_HITS: RefCell<Vec<(ChangedFlags, usize)>> = const { RefCell::new(Vec::new()) };
    static SCAN_HITS: RefCell<Vec<(&'static str, Option<u16>)>> = const { RefCell::new(Vec::new()) };
}

fn record_state(flags: ChangedFlags, ctx: Context) {
    STATE_HITS.with(|h| h.borrow_mut().push((flags, ctx.value())));
}

fn scan_old(result: Option<&ActiveScanResult>, _ctx: Context) {
    SCAN_HITS.with(|h| h.borrow_mut().push(("old", result.map(|r| r.pan_id))));
}

fn scan_new(result: Option<&ActiveScanResult>, _ctx: Context) {
    SCAN_HITS.with(|h| h.borrow_mut().push(("new", result.map(|r| r.pan_id))));
}

#[test]
fn init_with_small_size_writes_back_required() {
    script(Script::default());
    let required = Instance::<TestStack>::required_size();

    let mut size = 0usize;
    let err = Instance::<TestStack>::init(None, &mut size).err();
    assert_eq!(err, Some(Error::InsufficientBuffer { required }));
    assert_eq!(size, required);

    let mut bytes = vec![MaybeUninit::<u8>::uninit(); required - 1];
    let mut size = bytes.len();
    let err = Instance::<TestStack>::init(Some(bytes.as_mut_slice()), &mut size).err();
    assert_eq!(err, Some(Error::InsufficientBuffer { required }));
    assert_eq!(size, required);

    // Nothing was constructed on either failure.
    assert!(journal().is_empty());
}

#[test]
fn init_with_missing_buffer_fails_with_invalid_args() {
    script(Script::default());
    let mut size = Instance::<TestStack>::required_size();
    let err = Instance::<TestStack>::init(None, &mut size).err();
    assert_eq!(err, Some(Error::InvalidArgs));
    assert_eq!(size, Instance::<TestStack>::required_size());
}

#[test]
fn init_rejects_misaligned_buffer() {
    script(Script::default());
    let required = Instance::<TestStack>::required_size();
    let align = std::mem::align_of::<Instance<TestStack>>();
    assert!(align > 1);
    let mut backing = vec![MaybeUninit::<u8>::uninit(); required + 2 * align];
    let start = backing.as_ptr().align_offset(align) + 1;
    let misaligned = &mut backing[start..start + required];
    let mut size = required;
    let err = Instance::<TestStack>::init(Some(misaligned), &mut size).err();
    assert_eq!(err, Some(Error::InvalidArgs));
    assert!(journal().is_empty());
}

#[test]
fn construction_order_and_after_init() {
    script(Script::default());
    let mut buffer = InstanceBuffer::<TestStack>::new();
    let mut size = Instance::<TestStack>::required_size();
    let instance = Instance::<TestStack>::init(Some(buffer.as_bytes_mut()), &mut size).unwrap();

    let mut expected = vec![
        Event::Construct("platform"),
        Event::Construct("timer-milli"),
    ];
    #[cfg(feature = "usec-timer")]
    expected.push(Event::Construct("timer-micro"));
    expected.push(Event::Construct("network-layer"));
    expected.push(Event::Construct("mesh-interface"));
    #[cfg(feature = "raw-link")]
    expected.push(Event::Construct("link-raw"));
    #[cfg(feature = "app-transport")]
    expected.push(Event::Construct("app-transport"));
    expected.push(Event::Construct("message-pool"));
    expected.push(Event::SettingsInit);
    expected.push(Event::Restore);
    assert_eq!(journal(), expected);

    assert!(instance.is_initialized());
    assert!(instance.network_layer().mesh_attached);
    assert!(instance.mesh_interface().saw_network_layer);
    assert_eq!(*instance.timer_milli(), "timer-milli");
    assert_eq!(*instance.message_pool(), "message-pool");
}

#[test]
fn restore_failure_is_not_fatal() {
    script(Script {
        restore_fails: true,
        ..Script::default()
    });
    let mut buffer = InstanceBuffer::<TestStack>::new();
    let mut size = Instance::<TestStack>::required_size();
    let instance = Instance::<TestStack>::init(Some(buffer.as_bytes_mut()), &mut size).unwrap();
    assert!(instance.is_initialized());
    assert_eq!(count(Event::Restore), 1);
}

#[test]
fn init_single_is_idempotent() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    assert!(single.get().is_none());

    let first = {
        let handle = single.init_single().unwrap();
        &*handle as *const Instance<TestStack>
    };
    let second = {
        let handle = single.init_single().unwrap();
        &*handle as *const Instance<TestStack>
    };
    assert!(ptr::eq(first, second));
    assert_eq!(count(Event::SettingsInit), 1);
    assert_eq!(count(Event::Construct("platform")), 1);

    let got = single.get().expect("constructed");
    assert!(ptr::eq(&*got as *const Instance<TestStack>, first));
    assert!(got.is_initialized());
}

#[test]
fn init_single_after_finalize_constructs_again() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    single.init_single().unwrap().finalize();
    assert!(!single.get().unwrap().is_initialized());

    let instance = single.init_single().unwrap();
    assert!(instance.is_initialized());
    assert_eq!(count(Event::SettingsInit), 2);
}

#[test]
fn cleared_single_instance_is_empty() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    drop(single.init_single().unwrap());
    single.clear().unwrap();
    assert!(single.get().is_none());
}

#[cfg(feature = "auto-start")]
#[test]
fn auto_start_brings_both_layers_up() {
    script(Script {
        auto_start: true,
        ..Script::default()
    });
    let single = SingleInstance::<TestStack>::new();
    let instance = single.init_single().unwrap();
    assert!(instance.network_layer().is_enabled());
    assert_eq!(instance.mesh_interface().role(), DeviceRole::Detached);
    let tail: Vec<Event> = journal().into_iter().skip_while(|e| *e != Event::Restore).collect();
    assert_eq!(
        tail,
        vec![Event::Restore, Event::NetworkLayer(true), Event::Mesh(true)]
    );
}

#[cfg(feature = "auto-start")]
#[test]
fn auto_start_rolls_back_network_layer_when_mesh_fails() {
    script(Script {
        auto_start: true,
        mesh_fails: true,
        ..Script::default()
    });
    let single = SingleInstance::<TestStack>::new();
    let instance = single.init_single().unwrap();
    assert!(instance.is_initialized());
    assert!(!instance.network_layer().is_enabled());
    assert_eq!(instance.mesh_interface().role(), DeviceRole::Disabled);
    let tail: Vec<Event> = journal().into_iter().skip_while(|e| *e != Event::Restore).collect();
    assert_eq!(
        tail,
        vec![
            Event::Restore,
            Event::NetworkLayer(true),
            Event::Mesh(true),
            Event::NetworkLayer(false)
        ]
    );
}

#[cfg(feature = "auto-start")]
#[test]
fn auto_start_skips_mesh_when_network_layer_fails() {
    script(Script {
        auto_start: true,
        network_layer_fails: true,
        ..Script::default()
    });
    let single = SingleInstance::<TestStack>::new();
    let instance = single.init_single().unwrap();
    assert!(instance.is_initialized());
    assert_eq!(count(Event::Mesh(true)), 0);
    assert!(!instance.network_layer().is_enabled());
}

#[test]
fn auto_start_not_configured_leaves_everything_down() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let instance = single.init_single().unwrap();
    assert!(!instance.network_layer().is_enabled());
    assert_eq!(count(Event::NetworkLayer(true)), 0);
    assert_eq!(count(Event::Mesh(true)), 0);
}

#[test]
fn finalize_disables_mesh_then_network_layer_once() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    clear_journal();

    instance.finalize();
    assert!(!instance.is_initialized());
    assert_eq!(journal(), vec![Event::Mesh(false), Event::NetworkLayer(false)]);

    instance.finalize();
    assert_eq!(journal().len(), 2);
}

#[test]
fn dropping_handle_finalizes_and_buffer_is_reusable() {
    script(Script::default());
    let mut buffer = InstanceBuffer::<TestStack>::new();
    let mut size = Instance::<TestStack>::required_size();
    {
        let _instance = Instance::<TestStack>::init(Some(buffer.as_bytes_mut()), &mut size).unwrap();
    }
    assert_eq!(count(Event::Mesh(false)), 1);

    let again = Instance::<TestStack>::init(Some(buffer.as_bytes_mut()), &mut size).unwrap();
    assert!(again.is_initialized());
    assert_eq!(count(Event::SettingsInit), 2);
}

#[test]
fn multiple_instances_are_independent() {
    script(Script::default());
    let mut a_buf = InstanceBuffer::<TestStack>::new();
    let mut b_buf = InstanceBuffer::<TestStack>::new();
    let mut size = Instance::<TestStack>::required_size();
    let mut a = Instance::<TestStack>::init(Some(a_buf.as_bytes_mut()), &mut size).unwrap();
    let b = Instance::<TestStack>::init(Some(b_buf.as_bytes_mut()), &mut size).unwrap();

    a.register_state_changed_callback(noop_state, Context::NONE).unwrap();
    a.finalize();
    assert!(!a.is_initialized());
    assert!(b.is_initialized());
    assert_eq!(a.observers().len(), 1);
    assert!(b.observers().is_empty());
}

#[test]
fn observer_slots_fill_then_free_and_reuse() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();

    for i in 0..MAX_STATE_CALLBACKS {
        instance
            .register_state_changed_callback(noop_state, Context::new(i + 1))
            .unwrap();
    }
    assert_eq!(
        instance.register_state_changed_callback(noop_state, Context::new(100)),
        Err(Error::NoBufs)
    );
    assert_eq!(instance.observers().len(), MAX_STATE_CALLBACKS);
    assert_eq!(instance.mesh_interface().relays.len(), MAX_STATE_CALLBACKS);

    instance.remove_state_changed_callback(noop_state, Context::new(1));
    assert_eq!(count(Event::Remove(0)), 1);
    instance
        .register_state_changed_callback(noop_state, Context::new(100))
        .unwrap();
    assert_eq!(count(Event::Register(0)), 2);
}

#[test]
fn removing_unknown_observer_changes_nothing() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    instance
        .register_state_changed_callback(noop_state, Context::new(1))
        .unwrap();
    clear_journal();

    instance.remove_state_changed_callback(noop_state, Context::new(2));
    instance.remove_state_changed_callback(record_state, Context::new(1));
    assert_eq!(instance.observers().len(), 1);
    assert!(journal().is_empty());
}

#[test]
fn mesh_relays_state_changes_to_observers() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    instance
        .register_state_changed_callback(record_state, Context::new(7))
        .unwrap();
    instance
        .mesh_interface()
        .signal(ChangedFlags::ROLE | ChangedFlags::PARTITION_ID);
    let hits = STATE_HITS.with(|h| h.borrow().clone());
    assert_eq!(hits, vec![(ChangedFlags::ROLE | ChangedFlags::PARTITION_ID, 7)]);
}

#[test]
fn duplicate_observer_is_delivered_twice() {
    script(Script::default());
    STATE_HITS.with(|h| h.borrow_mut().clear());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    instance
        .register_state_changed_callback(record_state, Context::NONE)
        .unwrap();
    instance
        .register_state_changed_callback(record_state, Context::NONE)
        .unwrap();
    instance.mesh_interface().signal(ChangedFlags::ROLE);
    assert_eq!(STATE_HITS.with(|h| h.borrow().len()), 2);
}

#[test]
fn erase_refused_while_mesh_active() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    instance.mesh_interface_mut().role = DeviceRole::Router;
    clear_journal();

    assert_eq!(instance.erase_persistent_info(), Err(Error::InvalidState));
    assert_eq!(count(Event::SettingsWipe), 0);

    instance.mesh_interface_mut().role = DeviceRole::Detached;
    assert_eq!(instance.erase_persistent_info(), Err(Error::InvalidState));
    assert_eq!(count(Event::SettingsWipe), 0);
}

#[test]
fn erase_allowed_when_disabled() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    clear_journal();

    assert_eq!(instance.erase_persistent_info(), Ok(()));
    assert_eq!(journal(), vec![Event::SettingsWipe]);
}

#[test]
fn factory_reset_wipes_before_reset() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    instance.mesh_interface_mut().role = DeviceRole::Leader;
    clear_journal();

    instance.factory_reset();
    assert_eq!(journal(), vec![Event::SettingsWipe, Event::Reset]);
}

#[test]
fn reset_leaves_state_alone() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    instance
        .register_state_changed_callback(noop_state, Context::NONE)
        .unwrap();
    clear_journal();

    instance.reset();
    assert_eq!(journal(), vec![Event::Reset]);
    assert!(instance.is_initialized());
    assert_eq!(instance.observers().len(), 1);
}

#[test]
fn active_scan_without_subscriber_is_silent() {
    script(Script::default());
    SCAN_HITS.with(|h| h.borrow_mut().clear());
    let single = SingleInstance::<TestStack>::new();
    let instance = single.init_single().unwrap();
    instance.invoke_active_scan_callback(Some(&ActiveScanResult::default()));
    instance.invoke_active_scan_callback(None);
    assert!(SCAN_HITS.with(|h| h.borrow().is_empty()));
}

#[test]
fn active_scan_replacement_delivers_only_to_new() {
    script(Script::default());
    SCAN_HITS.with(|h| h.borrow_mut().clear());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    instance.register_active_scan_callback(Some(scan_old), Context::NONE);
    instance.register_active_scan_callback(Some(scan_new), Context::NONE);

    let result = ActiveScanResult {
        pan_id: 0xface,
        ..ActiveScanResult::default()
    };
    instance.invoke_active_scan_callback(Some(&result));
    assert_eq!(
        SCAN_HITS.with(|h| h.borrow().clone()),
        vec![("new", Some(0xface))]
    );
}

#[cfg(feature = "dynamic-log-level")]
#[test]
fn log_level_is_adjustable() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let mut instance = single.init_single().unwrap();
    assert_eq!(instance.log_level(), mesh_core::DEFAULT_LOG_LEVEL);
    instance.set_log_level(log::LevelFilter::Debug);
    assert_eq!(instance.log_level(), log::LevelFilter::Debug);
}

#[test]
fn init_single_while_handle_alive_is_busy() {
    script(Script::default());
    let single = SingleInstance::<TestStack>::new();
    let held = single.init_single().unwrap();
    assert_eq!(single.init_single().err(), Some(Error::Busy));
    assert!(single.get().is_none());
    assert_eq!(single.clear(), Err(Error::Busy));
    assert_eq!(count(Event::SettingsInit), 1);

    drop(held);
    assert!(single.get().is_some());
}

static REENTERED: SingleInstance<TestStack> = SingleInstance::new();

thread_local! {
    static REENTRY: RefCell<Vec<(bool, bool)>> = const { RefCell::new(Vec::new()) };
}

/// Observer that reaches back into its own region during dispatch.
fn query_region(_flags: ChangedFlags, _ctx: Context) {
    let got = REENTERED.get().is_some();
    let init_busy = REENTERED.init_single().err() == Some(Error::Busy);
    REENTRY.with(|r| r.borrow_mut().push((got, init_busy)));
}

#[test]
fn observer_reentering_region_during_finalize_does_not_hang() {
    script(Script {
        auto_start: true,
        ..Script::default()
    });
    {
        let mut instance = REENTERED.init_single().unwrap();
        instance
            .register_state_changed_callback(query_region, Context::NONE)
            .unwrap();
        instance.finalize();
        assert!(!instance.is_initialized());
    }
    // The role went back to disabled only when auto-start brought it up.
    let expected = if cfg!(feature = "auto-start") {
        vec![(false, true)]
    } else {
        Vec::new()
    };
    assert_eq!(REENTRY.with(|r| r.borrow().clone()), expected);
    assert!(REENTERED.get().is_some());
    REENTERED.clear().unwrap();
}

static SHARED: SingleInstance<TestStack> = SingleInstance::new();

#[test]
fn static_region_reused_across_cases_with_clear() {
    script(Script::default());
    assert!(SHARED.get().is_none());
    {
        let mut instance = SHARED.init_single().unwrap();
        instance
            .register_state_changed_callback(noop_state, Context::new(1))
            .unwrap();
        assert_eq!(instance.observers().len(), 1);
    }
    assert_eq!(SHARED.get().map(|i| i.observers().len()), Some(1));

    SHARED.clear().unwrap();
    assert!(SHARED.get().is_none());

    let instance = SHARED.init_single().unwrap();
    assert!(instance.is_initialized());
    assert!(instance.observers().is_empty());
    assert_eq!(count(Event::SettingsInit), 2);
    assert_eq!(count(Event::Construct("platform")), 2);
    drop(instance);
    SHARED.clear().unwrap();
}
