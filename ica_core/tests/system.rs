//! End-to-end runs of the assembled system with the simulated device
//! backend.

use ica_common::config::{LogLevel, SharedConfig};
use ica_common::event::RecordingEventSink;
use ica_common::prelude::*;
use ica_core::app::System;
use ica_core::config::{DeviceConfig, DeviceInstanceConfig, GateConfig, LongRunningVerb, MasterConfig, SystemConfig};
use ica_core::controller::lifecycle::LifecycleState;
use ica_core::master::MasterController;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Acks = Arc<Mutex<Vec<(Reference, Acknowledgment)>>>;

fn config(pool_capacity: usize, delay_ms: u64) -> SystemConfig {
    SystemConfig {
        shared: SharedConfig {
            log_level: LogLevel::Debug,
            service_name: "ica-test".into(),
        },
        master: MasterConfig {
            timer_tick_ms: 2,
            default_timeout_ms: 1000,
            shutdown_grace_ms: 1000,
        },
        gate: GateConfig::default(),
        device: DeviceConfig {
            pool_capacity,
            instances: vec![DeviceInstanceConfig {
                id: 7,
                name: "gripper".into(),
            }],
            long_running: vec![
                LongRunningVerb {
                    verb: "Attach".into(),
                    delay_ms,
                    completion_event: "AttachDone".into(),
                },
                LongRunningVerb {
                    verb: "Reattach".into(),
                    delay_ms,
                    completion_event: "AttachDone".into(),
                },
            ],
        },
    }
}

struct Rig {
    system: System,
    sink: Arc<RecordingEventSink>,
    acks: Acks,
}

/// Build, start and wait for Idle. Device acks land in `acks`.
fn started(pool_capacity: usize, delay_ms: u64) -> Rig {
    let sink = Arc::new(RecordingEventSink::new());
    let mut system = System::build(&config(pool_capacity, delay_ms), sink.clone()).unwrap();
    let acks: Acks = Arc::new(Mutex::new(Vec::new()));
    let a = acks.clone();
    system
        .master
        .register_ack_handler(
            names::DEVICE,
            Arc::new(move |_: &mut MasterController, reference: Reference, ack: &Acknowledgment| {
                a.lock().push((reference, ack.clone()));
            }),
        )
        .unwrap();
    system.startup().unwrap();
    pump_until(&mut system.master, |m| m.gate().read().operation() == OperationState::Idle);
    Rig { system, sink, acks }
}

fn pump_until(master: &mut MasterController, mut done: impl FnMut(&MasterController) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(master) {
        assert!(Instant::now() < deadline, "condition not reached");
        master.poll(Duration::from_millis(5));
    }
}

fn pump_for(master: &mut MasterController, span: Duration) {
    let end = Instant::now() + span;
    while Instant::now() < end {
        master.poll(Duration::from_millis(5));
    }
}

fn device(instance_id: u32, verb: &str) -> Command {
    Command::new(CommandKind::Device(DeviceCommand::new(instance_id, verb))).allowed_in(StatePermissions::IDLE)
}

fn ack_for(acks: &Acks, reference: Reference) -> Option<Acknowledgment> {
    acks.lock().iter().find(|(r, _)| *r == reference).map(|(_, a)| a.clone())
}

#[test]
fn startup_reaches_idle_and_logs_state_changes() {
    let Rig { mut system, sink, .. } = started(25, 10);

    assert!(!system.master.gate().read().software_init_failed());
    let (device, logging) = (system.device, system.logging);
    pump_until(&mut system.master, |m| {
        m.worker_state(device) == Some(LifecycleState::Running)
            && m.worker_state(logging) == Some(LifecycleState::Running)
    });

    let day_log = system.day_log.clone();
    pump_until(&mut system.master, |_| {
        day_log.texts().iter().any(|t| t == "operation state: Idle")
    });
    assert!(sink.count(EventCode::OperationChanged) >= 3);
    assert_eq!(sink.count(EventCode::InitStageFailed), 0);

    system.master.shutdown();
    assert_eq!(system.master.worker_state(system.device), Some(LifecycleState::Destroyed));
}

#[test]
fn reentering_init_waits_for_fresh_stage_reports() {
    let Rig { mut system, .. } = started(25, 10);
    let state = |kind| Command::new(kind).allowed_in(StatePermissions::ANYWHERE);

    system
        .master
        .submit(state(CommandKind::OperationEvent(OperationEvent::EnterInit)))
        .unwrap();
    pump_for(&mut system.master, Duration::from_millis(50));
    assert_eq!(system.master.gate().read().operation(), OperationState::Init);

    for stage in [InitStage::Settings, InitStage::DataLogging, InitStage::DeviceControl] {
        system
            .master
            .submit(state(CommandKind::InitStageProgress { stage, success: true }))
            .unwrap();
    }
    assert_eq!(system.master.gate().read().operation(), OperationState::Idle);
    system.master.shutdown();
}

#[test]
fn sync_verb_acks_with_payload() {
    let Rig { mut system, acks, .. } = started(25, 10);
    let cmd = Command::new(CommandKind::Device(DeviceCommand::new(7, "Home").with_payload(vec![1, 2])))
        .allowed_in(StatePermissions::IDLE);
    let r = system.master.submit(cmd).unwrap();

    pump_until(&mut system.master, |_| ack_for(&acks, r).is_some());
    let ack = ack_for(&acks, r).unwrap();
    assert!(ack.is_ok());
    assert_eq!(ack.payload, Some(AckPayload::Bytes(vec![1, 2])));
    system.master.shutdown();
}

#[test]
fn unknown_instance_is_nok() {
    let Rig { mut system, acks, .. } = started(25, 10);
    let r = system.master.submit(device(99, "Home")).unwrap();

    pump_until(&mut system.master, |_| ack_for(&acks, r).is_some());
    assert!(!ack_for(&acks, r).unwrap().is_ok());
    system.master.shutdown();
}

#[test]
fn long_running_verb_acks_on_completion() {
    let Rig { mut system, acks, .. } = started(25, 30);
    let r = system.master.submit(device(7, "Attach")).unwrap();

    pump_until(&mut system.master, |_| system.device_pool.active_count() == 1);
    assert!(ack_for(&acks, r).is_none());

    pump_until(&mut system.master, |_| ack_for(&acks, r).is_some());
    assert!(ack_for(&acks, r).unwrap().is_ok());
    assert_eq!(system.device_pool.active_count(), 0);
    assert!(!system.master.is_pending(r));
    system.master.shutdown();
}

#[test]
fn shared_completion_event_resolves_in_slot_order() {
    let Rig { mut system, acks, .. } = started(25, 40);
    let first = system.master.submit(device(7, "Attach")).unwrap();
    thread::sleep(Duration::from_millis(5));
    let second = system.master.submit(device(7, "Reattach")).unwrap();

    pump_until(&mut system.master, |_| acks.lock().len() == 2);
    let order: Vec<Reference> = acks.lock().iter().map(|(r, _)| *r).collect();
    assert_eq!(order, vec![first, second]);
    system.master.shutdown();
}

#[test]
fn pool_exhaustion_fails_fast() {
    let Rig { mut system, sink, acks } = started(1, 2000);
    let held = system.master.submit(device(7, "Attach")).unwrap();
    let rejected = system.master.submit(device(7, "Attach")).unwrap();

    pump_until(&mut system.master, |_| ack_for(&acks, rejected).is_some());
    let nok = ack_for(&acks, rejected).unwrap();
    assert!(nok.message().unwrap().contains("exhausted"));
    assert_eq!(sink.count(EventCode::PoolExhausted), 1);
    assert!(system.master.is_pending(held));
    assert_eq!(system.device_pool.active_count(), 1);
    system.master.shutdown();
}

#[test]
fn device_timeout_releases_slot_and_cancels() {
    let Rig { mut system, sink, acks } = started(25, 300);
    let cmd = device(7, "Attach").with_timeout(Duration::from_millis(40));
    let r = system.master.submit(cmd).unwrap();

    pump_until(&mut system.master, |m| !m.is_pending(r));
    assert_eq!(sink.count(EventCode::CommandTimeout), 1);
    pump_until(&mut system.master, |_| system.device_pool.active_count() == 0);

    // The cancelled operation never completes, so nothing arrives late.
    pump_for(&mut system.master, Duration::from_millis(400));
    assert!(ack_for(&acks, r).is_none());
    assert_eq!(sink.count(EventCode::UnknownReference), 0);
    assert_eq!(sink.count(EventCode::CommandTimeout), 1);
    system.master.shutdown();
}

#[test]
fn device_command_denied_outside_permitted_states() {
    let Rig { mut system, sink, acks } = started(25, 10);
    let cmd = Command::new(CommandKind::Device(DeviceCommand::new(7, "Home"))).allowed_in(StatePermissions::BUSY);
    let r = system.master.submit(cmd).unwrap();

    pump_until(&mut system.master, |_| ack_for(&acks, r).is_some());
    assert!(!ack_for(&acks, r).unwrap().is_ok());
    assert_eq!(sink.count(EventCode::CommandDenied), 1);
    system.master.shutdown();
}

#[test]
fn availability_error_blocks_device_commands() {
    let Rig { mut system, acks, .. } = started(25, 10);
    system
        .master
        .submit(Command::new(CommandKind::SetAvailability { active: true, cause: 4 }).allowed_in(StatePermissions::ANYWHERE))
        .unwrap();
    assert_eq!(system.master.gate().read().availability(), AvailabilityState::Error);

    let blocked = system.master.submit(device(7, "Home")).unwrap();
    let allowed = system
        .master
        .submit(device(7, "Home").allowed_in(StatePermissions::ERROR_STATE))
        .unwrap();
    pump_until(&mut system.master, |_| acks.lock().len() == 2);
    assert!(!ack_for(&acks, blocked).unwrap().is_ok());
    assert!(ack_for(&acks, allowed).unwrap().is_ok());
    system.master.shutdown();
}

#[test]
fn untimed_long_running_verb_is_refused() {
    let Rig { mut system, sink, acks } = started(25, 20);
    let r = system.master.submit(device(7, "Attach").fire_and_forget()).unwrap();
    assert!(!system.master.is_pending(r));

    pump_until(&mut system.master, |_| sink.count(EventCode::CommandDenied) == 1);
    pump_for(&mut system.master, Duration::from_millis(200));
    assert_eq!(system.device_pool.active_count(), 0);
    assert!(ack_for(&acks, r).is_none());
    assert_eq!(sink.count(EventCode::UnknownReference), 0);

    // Synchronous verbs may still be sent without a timeout.
    system.master.submit(device(7, "Home").fire_and_forget()).unwrap();
    pump_for(&mut system.master, Duration::from_millis(50));
    assert_eq!(sink.count(EventCode::UnknownReference), 0);
    assert_eq!(sink.count(EventCode::CommandDenied), 1);
    system.master.shutdown();
}

#[test]
fn power_fail_abandons_device_operations() {
    let Rig { mut system, sink, acks } = started(25, 150);
    let r = system.master.submit(device(7, "Attach")).unwrap();
    pump_until(&mut system.master, |_| system.device_pool.active_count() == 1);

    system.master.power_fail();
    pump_until(&mut system.master, |_| ack_for(&acks, r).is_some());
    let nok = ack_for(&acks, r).unwrap();
    assert!(matches!(nok.outcome, AckOutcome::Nok { severity: Severity::Fatal, .. }));
    assert_eq!(system.device_pool.active_count(), 0);

    // The operation was cancelled, so its completion never shows up.
    pump_for(&mut system.master, Duration::from_millis(300));
    assert_eq!(sink.count(EventCode::UnknownReference), 0);
    system.master.shutdown();
}

#[test]
fn master_loop_runs_on_its_own_thread() {
    let Rig { system, .. } = started(25, 10);
    let System {
        mut master, day_log, ..
    } = system;
    let handle = master.handle();
    let runner = thread::spawn(move || master.run());

    handle
        .submit(Command::new(CommandKind::DayLogEntry { text: "from handle".into() }).allowed_in(StatePermissions::IDLE))
        .unwrap();
    handle
        .submit(
            Command::new(CommandKind::DataChanged {
                key: "rack".into(),
                value: "loaded".into(),
            })
            .allowed_in(StatePermissions::ANYWHERE),
        )
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while day_log.texts().len() < 2 || !day_log.texts().iter().any(|t| t == "rack = loaded") {
        assert!(Instant::now() < deadline, "day log never filled");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(day_log.texts().iter().any(|t| t == "from handle"));

    assert!(handle.stop());
    runner.join().unwrap();
    assert!(!handle.stop());
}
