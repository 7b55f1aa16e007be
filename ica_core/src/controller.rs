//! Thread controller: one independently scheduled worker.
//!
//! A worker implements [`ThreadController`]; a [`WorkerRunner`] owns it
//! together with the worker end of its channel and drives the lifecycle:
//!
//! 1. `create_and_initialize_objects()` — Created → Initialized
//! 2. `Go` signal — Initialized → Running
//! 3. `Stop` signal — Running → Stopping
//! 4. `cleanup_and_destroy_objects()` — Stopping → Destroyed
//!
//! While Running, inbound commands are serviced strictly in arrival order.
//! The state gate is consulted before any handler runs, and at most one
//! acknowledgment is produced per command (fire-and-forget commands none).

pub mod lifecycle;

use ica_common::ack::Acknowledgment;
use ica_common::command::{Command, ComponentType};
use ica_common::error::{ChannelError, LifecycleError};
use ica_common::event::{Event, EventCode, Severity, SharedEventSink};
use ica_common::reference::{ChannelId, Reference, ReferenceGenerator};
use ica_common::state::{AvailabilityState, OperationState};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::channel::{ToWorker, WorkerEnd, WorkerSignal, WorkerWaker};
use crate::gate::SharedStateGate;
use crate::gate::operation::TransitionResult;
use lifecycle::{Lifecycle, LifecycleEvent, LifecycleState};

/// What a command handler hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledge now.
    Ack(Acknowledgment),
    /// The handler will acknowledge later through
    /// [`WorkerContext::send_acknowledge`].
    Deferred,
}

/// Everything a worker can reach from inside its handlers.
pub struct WorkerContext {
    end: WorkerEnd,
    refs: Arc<ReferenceGenerator>,
    gate: SharedStateGate,
    events: SharedEventSink,
}

impl WorkerContext {
    pub fn new(
        end: WorkerEnd,
        refs: Arc<ReferenceGenerator>,
        gate: SharedStateGate,
        events: SharedEventSink,
    ) -> Self {
        Self {
            end,
            refs,
            gate,
            events,
        }
    }

    #[inline]
    pub fn channel_id(&self) -> ChannelId {
        self.end.id()
    }

    /// Allocate a reference and send a command to the master.
    pub fn send_command(&self, command: Command) -> Result<Reference, ChannelError> {
        let reference = self.refs.next();
        debug!(channel = %self.end.id(), %reference, command = command.name(), "worker sending command");
        self.end.send(reference, command)?;
        Ok(reference)
    }

    /// Send an acknowledgment for a command this worker received.
    pub fn send_acknowledge(&self, reference: Reference, ack: Acknowledgment) -> Result<(), ChannelError> {
        self.end.send_ack(reference, ack)
    }

    pub fn events(&self) -> &SharedEventSink {
        &self.events
    }

    /// Current (operation, availability) snapshot.
    pub fn states(&self) -> (OperationState, AvailabilityState) {
        let gate = self.gate.read();
        (gate.operation(), gate.availability())
    }

    pub fn waker(&self) -> WorkerWaker {
        self.end.waker()
    }
}

/// Worker behaviour. Every hook except [`on_command`](Self::on_command)
/// has a default.
pub trait ThreadController: Send + 'static {
    fn name(&self) -> &str;

    fn component(&self) -> ComponentType;

    /// Build resources. Failure destroys the worker without running it.
    fn create_and_initialize_objects(&mut self, _ctx: &WorkerContext) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn on_go(&mut self, _ctx: &WorkerContext) {}

    fn on_stop(&mut self, _ctx: &WorkerContext) {}

    fn on_power_fail(&mut self, _ctx: &WorkerContext) {
        warn!(worker = self.name(), "power fail received");
    }

    fn cleanup_and_destroy_objects(&mut self, _ctx: &WorkerContext) {}

    /// Execute a command that passed the state gate.
    fn on_command(&mut self, ctx: &WorkerContext, reference: Reference, command: Command) -> Reply;

    /// Acknowledgment for a command this worker sent.
    fn on_acknowledge(&mut self, _ctx: &WorkerContext, reference: Reference, ack: Acknowledgment) {
        debug!(worker = self.name(), %reference, %ack, "acknowledgment received");
    }

    /// A command this worker was executing expired at the master.
    fn on_cmd_timeout(&mut self, _ctx: &WorkerContext, reference: Reference, name: &'static str) {
        warn!(worker = self.name(), %reference, command = name, "command timed out");
    }

    /// Out-of-band wake-up, see [`WorkerContext::waker`].
    fn on_wake(&mut self, _ctx: &WorkerContext) {}
}

/// Owns a controller and its channel end; runs the command loop.
pub struct WorkerRunner<C: ThreadController> {
    controller: C,
    ctx: WorkerContext,
    lifecycle: Lifecycle,
}

impl<C: ThreadController> WorkerRunner<C> {
    pub fn new(controller: C, ctx: WorkerContext) -> Self {
        Self {
            controller,
            ctx,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Run until `Stop` or until the master end disappears.
    pub fn run(mut self) -> Result<(), LifecycleError> {
        let name = self.controller.name().to_string();

        if let Err(e) = self.controller.create_and_initialize_objects(&self.ctx) {
            error!(worker = %name, "initialisation failed: {e}");
            self.advance(LifecycleEvent::Destroyed);
            return Err(e);
        }
        self.advance(LifecycleEvent::Initialized);
        info!(worker = %name, channel = %self.ctx.channel_id(), "worker initialised");

        while let Some(message) = self.ctx.end.recv() {
            match message {
                ToWorker::Command { reference, command } => self.process_command(reference, command),
                ToWorker::Ack { reference, ack } => {
                    self.controller.on_acknowledge(&self.ctx, reference, ack)
                }
                ToWorker::Timeout { reference, name } => {
                    self.controller.on_cmd_timeout(&self.ctx, reference, name)
                }
                ToWorker::Wake => self.controller.on_wake(&self.ctx),
                ToWorker::Signal(WorkerSignal::Go) => {
                    if self.advance(LifecycleEvent::Go) {
                        self.controller.on_go(&self.ctx);
                    }
                }
                ToWorker::Signal(WorkerSignal::PowerFail) => self.controller.on_power_fail(&self.ctx),
                ToWorker::Signal(WorkerSignal::Stop) => {
                    if self.advance(LifecycleEvent::Stop) {
                        self.controller.on_stop(&self.ctx);
                        break;
                    }
                }
            }
        }

        if self.lifecycle.state() != LifecycleState::Stopping {
            // Master end vanished without a Stop.
            self.advance(LifecycleEvent::Stop);
        }
        self.controller.cleanup_and_destroy_objects(&self.ctx);
        self.advance(LifecycleEvent::Destroyed);
        info!(worker = %name, "worker destroyed");
        Ok(())
    }

    fn process_command(&mut self, reference: Reference, command: Command) {
        let name = command.name();
        let fire_and_forget = command.timeout().is_fire_and_forget();

        let verdict = if !self.lifecycle.is_running() {
            Err(Acknowledgment::nok(
                format!("worker not running ({:?})", self.lifecycle.state()),
                Severity::Warning,
            ))
        } else {
            // Guard is released before the handler runs.
            let checked = self.ctx.gate.read().check(&command);
            checked.map_err(|e| Acknowledgment::nok(e.to_string(), Severity::Warning))
        };

        let reply = match verdict {
            Ok(()) => self.controller.on_command(&self.ctx, reference, command),
            Err(nok) => {
                debug!(%reference, command = name, "rejected locally: {nok}");
                Reply::Ack(nok)
            }
        };

        if let Reply::Ack(ack) = reply {
            if fire_and_forget {
                return;
            }
            if let Err(e) = self.ctx.send_acknowledge(reference, ack) {
                error!(%reference, command = name, "acknowledge failed: {e}");
                self.ctx.events.report(
                    Event::new(EventCode::ChannelClosed, Severity::Error)
                        .arg(self.ctx.channel_id())
                        .arg(reference),
                );
            }
        }
    }

    /// Apply a lifecycle event and tell the master. Returns whether it applied.
    fn advance(&mut self, event: LifecycleEvent) -> bool {
        match self.lifecycle.handle_event(event) {
            TransitionResult::Ok(state) => {
                // The master may already be gone during teardown.
                let _ = self.ctx.end.report_lifecycle(state);
                true
            }
            TransitionResult::Rejected(reason) => {
                warn!(worker = self.controller.name(), ?event, reason, "lifecycle event rejected");
                false
            }
        }
    }
}

/// Spawn a runner on its own named OS thread.
pub fn spawn<C: ThreadController>(
    runner: WorkerRunner<C>,
) -> Result<JoinHandle<Result<(), LifecycleError>>, LifecycleError> {
    let name = runner.controller.name().to_string();
    thread::Builder::new()
        .name(format!("ica-{name}"))
        .spawn(move || runner.run())
        .map_err(|e| LifecycleError::SpawnFailed {
            worker: name,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{self, ChannelInfo, MasterEnd, ToMaster};
    use crate::gate::StateGate;
    use crate::master::handle::MasterInbox;
    use crossbeam_channel::{Receiver, unbounded};
    use ica_common::command::CommandKind;
    use ica_common::event::RecordingEventSink;
    use ica_common::state::{OperationEvent, StatePermissions};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Echo {
        seen: Arc<Mutex<Vec<String>>>,
        timeouts: Arc<Mutex<Vec<(Reference, &'static str)>>>,
    }

    impl ThreadController for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn component(&self) -> ComponentType {
            ComponentType::DataLogging
        }

        fn on_command(&mut self, _ctx: &WorkerContext, _reference: Reference, command: Command) -> Reply {
            if let CommandKind::DayLogEntry { text } = command.kind() {
                self.seen.lock().push(text.clone());
            }
            Reply::Ack(Acknowledgment::ok())
        }

        fn on_cmd_timeout(&mut self, _ctx: &WorkerContext, reference: Reference, name: &'static str) {
            self.timeouts.lock().push((reference, name));
        }
    }

    struct Rig {
        master: MasterEnd,
        inbox: Receiver<MasterInbox>,
        gate: SharedStateGate,
        handle: JoinHandle<Result<(), LifecycleError>>,
    }

    fn start(echo: Echo) -> Rig {
        let (inbox_tx, inbox) = unbounded();
        let info = ChannelInfo {
            id: ChannelId(9),
            name: "echo".into(),
            component: ComponentType::DataLogging,
        };
        let (master, worker) = channel::pair(info, inbox_tx);
        let sink = Arc::new(RecordingEventSink::new());
        let gate = StateGate::new(&[], sink.clone()).shared();
        {
            let mut g = gate.write();
            g.fire(OperationEvent::MonitorStart).unwrap();
            g.fire(OperationEvent::SwitchPressed).unwrap();
        }
        let ctx = WorkerContext::new(worker, Arc::new(ReferenceGenerator::new()), gate.clone(), sink);
        let handle = spawn(WorkerRunner::new(echo, ctx)).unwrap();
        Rig {
            master,
            inbox,
            gate,
            handle,
        }
    }

    fn next_ack(inbox: &Receiver<MasterInbox>) -> (Reference, Acknowledgment) {
        loop {
            match inbox.recv_timeout(Duration::from_secs(2)).expect("no message from worker") {
                MasterInbox::Worker { message: ToMaster::Ack { reference, ack }, .. } => return (reference, ack),
                MasterInbox::Worker { message: ToMaster::Lifecycle(_), .. } => continue,
                _ => panic!("unexpected message"),
            }
        }
    }

    fn log(text: &str) -> Command {
        Command::new(CommandKind::DayLogEntry { text: text.into() }).allowed_in(StatePermissions::IDLE)
    }

    #[test]
    fn commands_before_go_are_rejected() {
        let rig = start(Echo::default());
        rig.master.send(Reference::from_raw(1), log("early")).unwrap();
        let (reference, ack) = next_ack(&rig.inbox);
        assert_eq!(reference.get(), 1);
        assert!(!ack.is_ok());
        rig.master.signal(WorkerSignal::Stop).unwrap();
        rig.handle.join().unwrap().unwrap();
    }

    #[test]
    fn running_worker_acks_in_order() {
        let echo = Echo::default();
        let seen = echo.seen.clone();
        let rig = start(echo);
        rig.master.signal(WorkerSignal::Go).unwrap();
        for i in 1..=3 {
            rig.master.send(Reference::from_raw(i), log(&format!("m{i}"))).unwrap();
        }
        for i in 1..=3 {
            let (reference, ack) = next_ack(&rig.inbox);
            assert_eq!(reference.get(), i);
            assert!(ack.is_ok());
        }
        assert_eq!(*seen.lock(), vec!["m1", "m2", "m3"]);
        rig.master.signal(WorkerSignal::Stop).unwrap();
        rig.handle.join().unwrap().unwrap();
    }

    #[test]
    fn gate_denial_becomes_nok() {
        let echo = Echo::default();
        let seen = echo.seen.clone();
        let rig = start(echo);
        rig.master.signal(WorkerSignal::Go).unwrap();
        let busy_only = Command::new(CommandKind::DayLogEntry { text: "x".into() })
            .allowed_in(StatePermissions::BUSY);
        rig.master.send(Reference::from_raw(5), busy_only).unwrap();
        let (_, ack) = next_ack(&rig.inbox);
        assert!(!ack.is_ok());
        assert!(seen.lock().is_empty());
        assert_eq!(rig.gate.read().operation(), OperationState::Idle);
        rig.master.signal(WorkerSignal::Stop).unwrap();
        rig.handle.join().unwrap().unwrap();
    }

    #[test]
    fn fire_and_forget_is_not_acked() {
        let rig = start(Echo::default());
        rig.master.signal(WorkerSignal::Go).unwrap();
        rig.master.send(Reference::from_raw(1), log("faf").fire_and_forget()).unwrap();
        rig.master.send(Reference::from_raw(2), log("acked")).unwrap();
        let (reference, _) = next_ack(&rig.inbox);
        assert_eq!(reference.get(), 2);
        rig.master.signal(WorkerSignal::Stop).unwrap();
        rig.handle.join().unwrap().unwrap();
    }

    #[test]
    fn timeout_reaches_handler() {
        let echo = Echo::default();
        let timeouts = echo.timeouts.clone();
        let rig = start(echo);
        rig.master.send_timeout(Reference::from_raw(77), "CmdDayLogEntry").unwrap();
        rig.master.signal(WorkerSignal::Stop).unwrap();
        rig.handle.join().unwrap().unwrap();
        assert_eq!(*timeouts.lock(), vec![(Reference::from_raw(77), "CmdDayLogEntry")]);
    }

    #[test]
    fn worker_exits_when_master_end_dropped() {
        let Rig { master, handle, .. } = start(Echo::default());
        drop(master);
        assert!(handle.join().unwrap().is_ok());
    }
}
