//! End-to-end scenarios for the device control core.
//!
//! These tests drive whole devices through the deterministic simulation:
//! simulated time, scripted APS behavior and DDF verdicts, no tokio
//! runtime. Same seed, same run.

use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;
use zigbridge_core::{Event, StateLevel};
use zigbridge_device::DeviceState;
use zigbridge_simulation::{ApsRecord, SimConfig, SimulationRunner};
use zigbridge_types::{
    item, Binding, BindingDestination, DeviceKey, NodeDescriptor, ReadParameters, ResourceItem,
    ResourcePrefix, SimpleDescriptor, SubDevice, Value, APS_SUCCESS, MIN_MAC_POLL_RX_ON,
};

const KEY: DeviceKey = DeviceKey(0x0021_2E00_0000_0001);

fn zcl_read_parameters(cluster_id: u16, attr: u16) -> ReadParameters {
    ReadParameters {
        function: "zcl".into(),
        endpoint: 0x01,
        cluster_id,
        attributes: vec![attr],
        manufacturer_code: None,
    }
}

/// Register the generic "zcl" read function: it issues a ZCL Read
/// Attributes request through the APS controller.
fn register_zcl_read_function(runner: &SimulationRunner) {
    runner.ddf().set_read_function(
        "zcl",
        Arc::new(
            |_sub: &SubDevice,
             _item: &ResourceItem,
             aps: &dyn zigbridge_types::ApsController,
             params: &ReadParameters| {
                let req = zigbridge_types::ZclReadReq {
                    endpoint: params.endpoint,
                    cluster_id: params.cluster_id,
                    attributes: params.attributes.clone(),
                };
                aps.zcl_read_attributes(&req, 0, 0)
            },
        ),
    );
}

/// Seed a fully discovered node (descriptor, endpoints, simple descriptor)
/// plus one sub-device carrying the Basic cluster identity, so that
/// verification completes without any radio traffic.
fn seed_verified_device(runner: &mut SimulationRunner, key: DeviceKey) -> Arc<SubDevice> {
    let node = runner.nodes().insert(key, key.0, 0x4A21);
    node.set_node_descriptor(NodeDescriptor {
        manufacturer_code: 0x1135,
        receiver_on_when_idle: true,
    });
    node.set_endpoints(vec![0x01]);
    node.upsert_simple_descriptor(SimpleDescriptor {
        endpoint: 0x01,
        profile_id: 0x0104,
        device_id: 0x0101,
        in_clusters: vec![0x0000, 0x0006],
        out_clusters: vec![],
    });

    let sub = Arc::new(SubDevice::new(
        ResourcePrefix::Lights,
        format!("{}-01", key.unique_id()),
    ));
    sub.add_item(ResourceItem::new(item::ATTR_MANUFACTURER_NAME));
    sub.add_item(ResourceItem::new(item::ATTR_MODEL_ID));
    sub.set_item_value(
        item::ATTR_MANUFACTURER_NAME,
        Value::Str("Acme".into()),
        Duration::from_millis(1),
    );
    sub.set_item_value(item::ATTR_MODEL_ID, Value::Str("X".into()), Duration::from_millis(1));

    runner.create_device(key);
    runner.attach_sub_device(key, Arc::clone(&sub));
    sub
}

/// Drive a seeded device into the operational idle state.
fn run_to_idle(runner: &mut SimulationRunner, key: DeviceKey) {
    runner.schedule(key, Duration::from_millis(1), Event::Poll);
    runner.run_for(Duration::from_secs(1));
    assert_eq!(
        runner.device_state(key, StateLevel::Top),
        Some(DeviceState::Idle),
        "device should be operational"
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Verification chain
// ═══════════════════════════════════════════════════════════════════════════

/// Happy path: with all ZDP data and Basic cluster identity already
/// present, a single poll tick walks the whole verification chain into
/// Idle, with exactly one DDF match round-trip and no radio traffic.
#[traced_test]
#[test]
fn happy_path_reaches_idle_with_one_ddf_round_trip() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    seed_verified_device(&mut runner, KEY);
    runner.schedule(KEY, Duration::from_millis(1), Event::Poll);

    runner.run_for(Duration::from_secs(1));

    assert_eq!(
        runner.device_state(KEY, StateLevel::Top),
        Some(DeviceState::Idle)
    );
    assert_eq!(runner.stats().ddf_requests, 1);
    assert_eq!(runner.stats().ddf_matches, 1);
    assert!(runner.aps().requests().is_empty(), "no radio traffic needed");

    // sub-machines are installed exactly while the top level is idle
    assert_eq!(
        runner.device_state(KEY, StateLevel::Binding),
        Some(DeviceState::BindingIdle)
    );
    assert_eq!(
        runner.device_state(KEY, StateLevel::Poll),
        Some(DeviceState::PollIdle)
    );

    let device = runner.device(KEY).unwrap();
    assert_eq!(device.item(item::ATTR_MANUFACTURER_NAME).unwrap().to_str(), "Acme");
    assert_eq!(device.item(item::ATTR_MODEL_ID).unwrap().to_str(), "X");
}

/// A ZDP request that is enqueued but never answered times out after
/// MinMacPollRxOn and funnels back to Init; the next wake tick re-issues
/// the same request without ever advancing to the next verification state.
#[traced_test]
#[test]
fn zdp_timeout_funnels_back_to_init_and_reissues() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    runner.nodes().insert(KEY, KEY.0, 0x4A21); // no node descriptor
    runner.create_device(KEY);

    // the device is briefly awake, the request goes out and vanishes
    runner.schedule(KEY, Duration::from_millis(1), Event::Awake);
    runner.run_for(Duration::from_millis(8500));

    assert_eq!(
        runner.device_state(KEY, StateLevel::Top),
        Some(DeviceState::Init),
        "timeout must fall back to init"
    );
    assert_eq!(
        runner.aps().requests(),
        vec![ApsRecord::NodeDescriptor { nwk: 0x4A21 }]
    );

    // second wake tick: same request again, still no progress past it
    runner.schedule(KEY, Duration::ZERO, Event::Awake);
    runner.run_for(Duration::from_secs(2));

    let requests = runner.aps().requests();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| matches!(r, ApsRecord::NodeDescriptor { .. })));
    assert_eq!(
        runner.device_state(KEY, StateLevel::Top),
        Some(DeviceState::NodeDescriptor)
    );
}

/// The coordinator (network address 0x0000) is parked dead on the first
/// init entry, before any ZDP request is issued.
#[traced_test]
#[test]
fn coordinator_is_parked_dead_without_radio_traffic() {
    let key = DeviceKey(0x0021_2E00_0000_0002);
    let mut runner = SimulationRunner::new(SimConfig::default());
    runner.nodes().insert(key, key.0, 0x0000);
    runner.create_device(key);

    runner.run_for(Duration::from_secs(1));

    assert_eq!(
        runner.device_state(key, StateLevel::Top),
        Some(DeviceState::Dead)
    );
    assert!(runner.aps().requests().is_empty());
    assert_eq!(runner.device_state(key, StateLevel::Binding), None);
    assert_eq!(runner.device_state(key, StateLevel::Poll), None);
}

/// A failed APS confirm for the in-flight ZDP request bounces the
/// verification state back to init.
#[traced_test]
#[test]
fn failed_zdp_confirm_bounces_to_init() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    runner.nodes().insert(KEY, KEY.0, 0x4A21);
    runner.aps().set_confirm_status(Some(0xE1)); // APS no-ack
    runner.create_device(KEY);

    runner.schedule(KEY, Duration::from_millis(1), Event::Awake);
    runner.run_for(Duration::from_millis(200));

    assert_eq!(
        runner.device_state(KEY, StateLevel::Top),
        Some(DeviceState::Init)
    );
    assert_eq!(runner.aps().request_count(), 1);
}

/// Completed verification with a negative DDF verdict parks the device
/// dead; the sub-machines never come up.
#[traced_test]
#[test]
fn unmatched_ddf_parks_device_dead() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    seed_verified_device(&mut runner, KEY);
    runner.ddf().set_matched(KEY, false);
    runner.schedule(KEY, Duration::from_millis(1), Event::Poll);

    runner.run_for(Duration::from_secs(1));

    assert_eq!(
        runner.device_state(KEY, StateLevel::Top),
        Some(DeviceState::Dead)
    );
    assert_eq!(runner.stats().ddf_mismatches, 1);
    assert_eq!(runner.device_state(KEY, StateLevel::Binding), None);
    assert_eq!(runner.device_state(KEY, StateLevel::Poll), None);
}

/// A DDF reload while idle re-initializes the device, clearing both
/// sub-machines, and the next poll tick re-verifies into idle again.
#[traced_test]
#[test]
fn ddf_reload_reinitializes_the_device() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    seed_verified_device(&mut runner, KEY);
    run_to_idle(&mut runner, KEY);

    runner.schedule(KEY, Duration::ZERO, Event::DdfReload);
    runner.run_for(Duration::from_millis(100));

    assert_eq!(
        runner.device_state(KEY, StateLevel::Top),
        Some(DeviceState::Init)
    );
    assert_eq!(runner.device_state(KEY, StateLevel::Binding), None);
    assert_eq!(runner.device_state(KEY, StateLevel::Poll), None);

    runner.schedule(KEY, Duration::ZERO, Event::Poll);
    runner.run_for(Duration::from_secs(1));
    assert_eq!(
        runner.device_state(KEY, StateLevel::Top),
        Some(DeviceState::Idle)
    );
    assert_eq!(runner.stats().ddf_requests, 2);
}

/// Full over-the-air discovery: every ZDP datum and both Basic cluster
/// attributes are fetched over the radio, each response funnels through
/// Init, and the device ends up idle.
#[traced_test]
#[test]
fn over_the_air_verification_completes() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    let node = runner.nodes().insert(KEY, KEY.0, 0x4A21);
    runner.create_device(KEY);

    runner.schedule(KEY, Duration::from_millis(1), Event::Awake);
    runner.run_for(Duration::from_millis(100));
    assert_eq!(
        runner.aps().requests().last(),
        Some(&ApsRecord::NodeDescriptor { nwk: 0x4A21 })
    );

    // node descriptor response arrives
    node.set_node_descriptor(NodeDescriptor {
        manufacturer_code: 0x1135,
        receiver_on_when_idle: false,
    });
    runner.schedule(KEY, Duration::from_millis(10), Event::NodeDescriptor);
    runner.run_for(Duration::from_millis(100));
    assert_eq!(
        runner.aps().requests().last(),
        Some(&ApsRecord::ActiveEndpoints { nwk: 0x4A21 })
    );

    // active endpoints response arrives
    node.set_endpoints(vec![0x01]);
    runner.schedule(KEY, Duration::from_millis(10), Event::ActiveEndpoints);
    runner.run_for(Duration::from_millis(100));
    assert_eq!(
        runner.aps().requests().last(),
        Some(&ApsRecord::SimpleDescriptor {
            nwk: 0x4A21,
            endpoint: 0x01
        })
    );

    // simple descriptor response arrives
    node.upsert_simple_descriptor(SimpleDescriptor {
        endpoint: 0x01,
        profile_id: 0x0104,
        device_id: 0x0101,
        in_clusters: vec![0x0000],
        out_clusters: vec![],
    });
    runner.schedule(KEY, Duration::from_millis(10), Event::SimpleDescriptor);
    runner.run_for(Duration::from_millis(100));

    // no sub-device carries the identity, so it is read over the air
    let reads: Vec<_> = runner
        .aps()
        .requests()
        .into_iter()
        .filter(|r| matches!(r, ApsRecord::ZclRead { .. }))
        .collect();
    assert_eq!(reads.len(), 1, "manufacturer name read in flight");

    // the parse layer stores the attribute and announces the change
    runner.set_device_item(KEY, item::ATTR_MANUFACTURER_NAME, Value::Str("Acme".into()));
    runner.schedule(
        KEY,
        Duration::from_millis(10),
        Event::ItemChanged {
            prefix: ResourcePrefix::Devices,
            id: KEY.unique_id(),
            suffix: item::ATTR_MANUFACTURER_NAME.into(),
        },
    );
    runner.run_for(Duration::from_millis(100));

    runner.set_device_item(KEY, item::ATTR_MODEL_ID, Value::Str("X".into()));
    runner.schedule(
        KEY,
        Duration::from_millis(10),
        Event::ItemChanged {
            prefix: ResourcePrefix::Devices,
            id: KEY.unique_id(),
            suffix: item::ATTR_MODEL_ID.into(),
        },
    );
    runner.run_for(Duration::from_secs(1));

    assert_eq!(
        runner.device_state(KEY, StateLevel::Top),
        Some(DeviceState::Idle)
    );
    assert_eq!(runner.stats().ddf_matches, 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Poll sub-machine
// ═══════════════════════════════════════════════════════════════════════════

/// Attach one pollable item whose value is stale.
fn seed_pollable_item(runner: &mut SimulationRunner, sub: &SubDevice, suffix: &str) {
    sub.add_item(ResourceItem::new(suffix));
    runner
        .ddf()
        .set_read_parameters(suffix, zcl_read_parameters(0x0006, 0x0000));
    register_zcl_read_function(runner);
}

/// A read that the APS controller keeps refusing is retried through the
/// level-2 timer and dropped at the retry cap; the queue drains back to
/// poll idle.
#[traced_test]
#[test]
fn refused_poll_read_is_dropped_at_retry_cap() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    let sub = seed_verified_device(&mut runner, KEY);
    seed_pollable_item(&mut runner, &sub, "state/on");
    run_to_idle(&mut runner, KEY);
    runner.set_device_item(KEY, item::STATE_REACHABLE, Value::Bool(true));

    runner.aps().set_accept_zcl(false);
    runner.schedule(KEY, Duration::ZERO, Event::Poll);
    runner.run_for(Duration::from_secs(40));

    assert_eq!(
        runner.device_state(KEY, StateLevel::Poll),
        Some(DeviceState::PollIdle)
    );
    assert_eq!(runner.device(KEY).unwrap().poll_queue_len(), 0);

    let read_attempts = runner
        .aps()
        .requests()
        .iter()
        .filter(|r| matches!(r, ApsRecord::ZclRead { .. }))
        .count();
    assert_eq!(read_attempts, 3, "one attempt per retry up to the cap");
}

/// A successful confirm pops the head item; a timeout leaves the queue
/// untouched and the next iteration re-attempts the read.
#[traced_test]
#[test]
fn confirm_pops_item_and_timeout_retries_it() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    let sub = seed_verified_device(&mut runner, KEY);
    seed_pollable_item(&mut runner, &sub, "state/on");
    sub.add_item(ResourceItem::new("state/bri"));
    runner
        .ddf()
        .set_read_parameters("state/bri", zcl_read_parameters(0x0008, 0x0000));
    run_to_idle(&mut runner, KEY);
    runner.set_device_item(KEY, item::STATE_REACHABLE, Value::Bool(true));

    runner.schedule(KEY, Duration::ZERO, Event::Poll);
    runner.run_for(Duration::from_millis(100));

    assert_eq!(
        runner.device_state(KEY, StateLevel::Poll),
        Some(DeviceState::PollBusy)
    );
    assert_eq!(runner.device(KEY).unwrap().poll_queue_len(), 2);

    // confirm the first read; its item is popped and the next read goes out
    let first_id = runner.aps().last_request_id();
    runner.schedule(
        KEY,
        Duration::from_millis(10),
        Event::ApsConfirm {
            request_id: first_id,
            status: APS_SUCCESS,
        },
    );
    runner.run_for(Duration::from_millis(100));

    assert_eq!(runner.device(KEY).unwrap().poll_queue_len(), 1);
    assert_eq!(
        runner.device_state(KEY, StateLevel::Poll),
        Some(DeviceState::PollBusy)
    );

    // no confirm this time: the busy timeout sends control back to
    // PollNext, which keeps the item and re-attempts the read
    runner.run_for(MIN_MAC_POLL_RX_ON + Duration::from_secs(1));

    assert_eq!(runner.device(KEY).unwrap().poll_queue_len(), 1);
    assert_eq!(runner.device(KEY).unwrap().poll_head_retry(), Some(0));

    let read_attempts = runner
        .aps()
        .requests()
        .iter()
        .filter(|r| matches!(r, ApsRecord::ZclRead { .. }))
        .count();
    assert!(read_attempts >= 3, "second item re-attempted after timeout");
}

/// A device that became unreachable drops its whole poll queue.
#[traced_test]
#[test]
fn unreachable_device_drops_poll_queue() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    let sub = seed_verified_device(&mut runner, KEY);
    seed_pollable_item(&mut runner, &sub, "state/on");
    run_to_idle(&mut runner, KEY);
    runner.set_device_item(KEY, item::STATE_REACHABLE, Value::Bool(true));

    runner.aps().set_accept_zcl(false); // keep PollNext cycling on its timer
    runner.schedule(KEY, Duration::ZERO, Event::Poll);
    runner.run_for(Duration::from_millis(100));
    assert_eq!(runner.device(KEY).unwrap().poll_queue_len(), 1);

    runner.set_device_item(KEY, item::STATE_REACHABLE, Value::Bool(false));
    runner.run_for(Duration::from_secs(10));

    assert_eq!(runner.device(KEY).unwrap().poll_queue_len(), 0);
    assert_eq!(
        runner.device_state(KEY, StateLevel::Poll),
        Some(DeviceState::PollIdle)
    );
}

/// Items whose read parameters select no known function are silently
/// discarded and the queue drains without radio traffic.
#[traced_test]
#[test]
fn missing_read_function_discards_items() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    let sub = seed_verified_device(&mut runner, KEY);
    sub.add_item(ResourceItem::new("state/custom"));
    runner.ddf().set_read_parameters(
        "state/custom",
        ReadParameters {
            function: "tuya".into(),
            ..ReadParameters::default()
        },
    );
    run_to_idle(&mut runner, KEY);
    runner.set_device_item(KEY, item::STATE_REACHABLE, Value::Bool(true));

    runner.schedule(KEY, Duration::ZERO, Event::Poll);
    runner.run_for(Duration::from_secs(1));

    assert_eq!(runner.device(KEY).unwrap().poll_queue_len(), 0);
    assert_eq!(
        runner.device_state(KEY, StateLevel::Poll),
        Some(DeviceState::PollIdle)
    );
    let read_attempts = runner
        .aps()
        .requests()
        .iter()
        .filter(|r| matches!(r, ApsRecord::ZclRead { .. }))
        .count();
    assert_eq!(read_attempts, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Binding sub-machine
// ═══════════════════════════════════════════════════════════════════════════

/// The binding table is verified on the first tick and then at most once
/// per verification interval, regardless of the poll cadence.
#[traced_test]
#[test]
fn binding_verification_cadence_is_bounded() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    seed_verified_device(&mut runner, KEY);
    let node = runner.nodes().get(KEY).unwrap();
    node.set_binding_table(vec![
        Binding {
            src_address: KEY.0,
            src_endpoint: 0x01,
            cluster_id: 0x0006,
            destination: BindingDestination::Extended {
                address: 0x0021_2E00_0000_00AA,
                endpoint: 0x01,
            },
            confirmed_at: None,
        },
        Binding {
            src_address: KEY.0,
            src_endpoint: 0x01,
            cluster_id: 0x0008,
            destination: BindingDestination::Group { group: 0x0010 },
            confirmed_at: Some(Duration::ZERO),
        },
    ]);
    run_to_idle(&mut runner, KEY);

    let mut verify_stamps = Vec::new();
    for minute in 1..=20u64 {
        runner.run_until(Duration::from_secs(minute * 60));
        runner.schedule(KEY, Duration::ZERO, Event::Poll);
        runner.run_for(Duration::from_millis(50));

        if let Some(at) = runner.device(KEY).unwrap().binding_verified_at() {
            if verify_stamps.last() != Some(&at) {
                verify_stamps.push(at);
            }
        }
    }

    assert_eq!(
        verify_stamps.len(),
        4,
        "twenty polls in twenty minutes, four verification passes"
    );
    for pair in verify_stamps.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_secs(5 * 60),
            "passes at least five minutes apart"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Item-change sweep
// ═══════════════════════════════════════════════════════════════════════════

/// A pending write recorded by the resource layer is verified by the sweep
/// when the target value shows up, and garbage-collected afterwards.
#[traced_test]
#[test]
fn item_change_sweep_verifies_pending_writes() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    let sub = seed_verified_device(&mut runner, KEY);
    sub.add_item(ResourceItem::new("state/on"));
    run_to_idle(&mut runner, KEY);

    sub.push_state_change(zigbridge_types::StateChange::new(
        "state/on",
        Value::Bool(true),
        runner.now(),
    ));
    assert_eq!(sub.state_change_count(), 1);

    // the reported value arrives and the resource layer announces it
    sub.set_item_value("state/on", Value::Bool(true), runner.now() + Duration::from_millis(5));
    runner.schedule(
        KEY,
        Duration::from_millis(10),
        Event::ItemChanged {
            prefix: sub.prefix(),
            id: sub.unique_id().to_string(),
            suffix: "state/on".into(),
        },
    );
    runner.run_for(Duration::from_millis(100));

    assert_eq!(
        sub.state_change_count(),
        0,
        "verified change is garbage-collected"
    );
}

/// A write that never verifies is timed out by the sweep on a later poll
/// tick and garbage-collected.
#[traced_test]
#[test]
fn item_change_sweep_times_out_stale_writes() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    let sub = seed_verified_device(&mut runner, KEY);
    sub.add_item(ResourceItem::new("state/on"));
    run_to_idle(&mut runner, KEY);

    sub.push_state_change(zigbridge_types::StateChange::new(
        "state/on",
        Value::Bool(true),
        runner.now(),
    ));

    // nothing reports back; a poll tick past the response window expires it
    runner.run_for(MIN_MAC_POLL_RX_ON + Duration::from_secs(1));
    runner.schedule(KEY, Duration::ZERO, Event::Poll);
    runner.run_for(Duration::from_millis(100));

    assert_eq!(sub.state_change_count(), 0);
}

/// A Mgmt_Bind_req status is recorded as capability information.
#[traced_test]
#[test]
fn binding_table_status_records_mgmt_bind_support() {
    let mut runner = SimulationRunner::new(SimConfig::default());
    seed_verified_device(&mut runner, KEY);
    run_to_idle(&mut runner, KEY);

    runner.schedule(
        KEY,
        Duration::ZERO,
        Event::BindingTable {
            status: zigbridge_types::ZDP_SUCCESS,
        },
    );
    runner.run_for(Duration::from_millis(50));
    assert!(runner.device(KEY).unwrap().mgmt_bind_supported());

    runner.schedule(
        KEY,
        Duration::ZERO,
        Event::BindingTable {
            status: zigbridge_types::ZDP_NOT_SUPPORTED,
        },
    );
    runner.run_for(Duration::from_millis(50));
    assert!(!runner.device(KEY).unwrap().mgmt_bind_supported());
}
