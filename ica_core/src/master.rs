//! Master controller: registries, pending-correlation table, broadcast and
//! the master loop.
//!
//! # Ownership
//!
//! The controller is owned by the thread that calls [`MasterController::run`].
//! Every mutation of the pending table happens on that thread, so the table
//! needs no lock. Other threads talk to it through a [`MasterHandle`].
//!
//! # Loop iteration
//!
//! 1. Wait for the inbox, bounded by the timer tick and the next deadline.
//! 2. Drain every queued inbox message (acknowledgments included).
//! 3. Fire expired deadlines.
//!
//! Step 2 before step 3 makes a racing acknowledgment win over its timeout.

pub mod handle;
pub mod pending;
pub mod registry;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use ica_common::ack::Acknowledgment;
use ica_common::command::{Command, CommandKind, ComponentType, names};
use ica_common::error::{ChannelError, DispatchError, LifecycleError, RegistrationError};
use ica_common::event::{Event, EventCode, Severity, SharedEventSink};
use ica_common::reference::{ChannelId, Reference, ReferenceGenerator};
use ica_common::state::StatePermissions;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::channel::{self, ChannelInfo, MasterEnd, ToMaster, WorkerSignal};
use crate::config::MasterConfig;
use crate::controller::lifecycle::LifecycleState;
use crate::controller::{self, ThreadController, WorkerContext, WorkerRunner};
use crate::gate::{GateChange, SharedStateGate};
use handle::{MasterHandle, MasterInbox};
use pending::{Origin, PendingEntry, PendingTable};
use registry::{AckHandler, ExecHandler, Registry, Route, TimeoutHook};

/// Channel id the master uses for itself in errors and events.
pub const MASTER_CHANNEL: ChannelId = ChannelId(0);

struct WorkerSlot {
    end: MasterEnd,
    thread: Option<JoinHandle<Result<(), LifecycleError>>>,
    state: LifecycleState,
}

pub struct MasterController {
    refs: Arc<ReferenceGenerator>,
    inbox_tx: Sender<MasterInbox>,
    inbox_rx: Receiver<MasterInbox>,
    workers: BTreeMap<ChannelId, WorkerSlot>,
    next_channel: u16,
    registry: Registry,
    pending: PendingTable,
    timeout_hook: Option<TimeoutHook>,
    gate: SharedStateGate,
    events: SharedEventSink,
    timer_tick: Duration,
    default_timeout: Duration,
    shutdown_grace: Duration,
    stop_requested: bool,
}

impl MasterController {
    pub fn new(config: &MasterConfig, gate: SharedStateGate, events: SharedEventSink) -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        Self {
            refs: Arc::new(ReferenceGenerator::new()),
            inbox_tx,
            inbox_rx,
            workers: BTreeMap::new(),
            next_channel: MASTER_CHANNEL.0 + 1,
            registry: Registry::new(),
            pending: PendingTable::new(),
            timeout_hook: None,
            gate,
            events,
            timer_tick: config.timer_tick(),
            default_timeout: config.default_timeout(),
            shutdown_grace: config.shutdown_grace(),
            stop_requested: false,
        }
    }

    pub fn handle(&self) -> MasterHandle {
        MasterHandle::new(self.refs.clone(), self.inbox_tx.clone())
    }

    pub fn references(&self) -> &Arc<ReferenceGenerator> {
        &self.refs
    }

    pub fn gate(&self) -> &SharedStateGate {
        &self.gate
    }

    pub fn events(&self) -> &SharedEventSink {
        &self.events
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, reference: Reference) -> bool {
        self.pending.contains(reference)
    }

    pub fn worker_state(&self, channel: ChannelId) -> Option<LifecycleState> {
        self.workers.get(&channel).map(|w| w.state)
    }

    pub fn worker_channels(&self) -> Vec<ChannelId> {
        self.workers.keys().copied().collect()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    // ─── Workers ────────────────────────────────────────────────────

    /// Create a channel for `controller`, spawn its runner and return the
    /// channel id. The worker stays Initialized until [`go`](Self::go).
    pub fn add_worker<C: ThreadController>(&mut self, controller: C) -> Result<ChannelId, DispatchError> {
        let id = ChannelId(self.next_channel);
        self.next_channel = self.next_channel.wrapping_add(1).max(MASTER_CHANNEL.0 + 1);
        let info = ChannelInfo {
            id,
            name: controller.name().to_string(),
            component: controller.component(),
        };
        let (end, worker_end) = channel::pair(info, self.inbox_tx.clone());
        let ctx = WorkerContext::new(worker_end, self.refs.clone(), self.gate.clone(), self.events.clone());
        let thread = controller::spawn(WorkerRunner::new(controller, ctx))?;
        info!(channel = %id, worker = %end.info().name, "worker added");
        self.workers.insert(
            id,
            WorkerSlot {
                end,
                thread: Some(thread),
                state: LifecycleState::Created,
            },
        );
        Ok(id)
    }

    /// Send `Go` to every worker.
    pub fn go(&mut self) {
        self.signal_all(WorkerSignal::Go);
    }

    /// Send `PowerFail` to every worker.
    pub fn power_fail(&mut self) {
        warn!("power fail: notifying workers");
        self.signal_all(WorkerSignal::PowerFail);
    }

    fn signal_all(&self, signal: WorkerSignal) {
        for (id, slot) in &self.workers {
            if let Err(e) = slot.end.signal(signal) {
                warn!(channel = %id, ?signal, "signal failed: {e}");
            }
        }
    }

    /// Cancel everything pending on `channel`, stop its worker and drop the
    /// channel along with its routes.
    pub fn remove_worker(&mut self, channel: ChannelId) -> Result<(), DispatchError> {
        if !self.workers.contains_key(&channel) {
            return Err(RegistrationError::UnknownChannel { channel }.into());
        }
        for (reference, entry) in self.pending.drain_channel(channel) {
            debug!(%reference, command = entry.name, %channel, "pending entry cancelled by worker removal");
            if let Origin::Worker(issuer) = entry.origin {
                if issuer != channel {
                    self.ack_worker(
                        issuer,
                        reference,
                        Acknowledgment::nok(format!("target {channel} removed"), Severity::Warning),
                    );
                }
            }
        }
        self.registry.forget_channel(channel);
        if let Some(mut slot) = self.workers.remove(&channel) {
            let _ = slot.end.signal(WorkerSignal::Stop);
            if let Some(thread) = slot.thread.take() {
                join_worker(channel, thread, self.shutdown_grace);
            }
        }
        info!(%channel, "worker removed");
        Ok(())
    }

    // ─── Registration ───────────────────────────────────────────────

    pub fn register_execution(&mut self, name: &'static str, handler: ExecHandler) -> Result<(), RegistrationError> {
        self.registry.register_execution(name, handler)
    }

    pub fn register_route(&mut self, name: &'static str, channel: ChannelId) -> Result<(), RegistrationError> {
        self.ensure_channel(channel)?;
        self.registry.register_route(name, channel)
    }

    pub fn register_component_route(
        &mut self,
        component: ComponentType,
        channel: ChannelId,
    ) -> Result<(), RegistrationError> {
        self.ensure_channel(channel)?;
        self.registry.register_component_route(component, channel)
    }

    pub fn set_default_route(&mut self, channel: ChannelId) -> Result<(), RegistrationError> {
        self.ensure_channel(channel)?;
        self.registry.set_default_route(channel);
        Ok(())
    }

    pub fn add_broadcast(&mut self, channel: ChannelId) -> Result<(), RegistrationError> {
        self.ensure_channel(channel)?;
        self.registry.add_broadcast(channel);
        Ok(())
    }

    pub fn designate_broadcast(&mut self, name: &'static str) {
        self.registry.designate_broadcast(name);
    }

    pub fn register_ack_handler(&mut self, name: &'static str, handler: AckHandler) -> Result<(), RegistrationError> {
        self.registry.register_ack_handler(name, handler)
    }

    pub fn set_timeout_hook(&mut self, hook: TimeoutHook) {
        self.timeout_hook = Some(hook);
    }

    /// Register the built-in handlers that drive the state gate, plus
    /// `CmdShutdown`. State changes are propagated to the broadcast list.
    pub fn register_state_handlers(&mut self) -> Result<(), RegistrationError> {
        self.registry
            .register_execution(names::OPERATION_EVENT, Arc::new(handle_operation_event))?;
        self.registry
            .register_execution(names::SET_AVAILABILITY, Arc::new(handle_set_availability))?;
        self.registry
            .register_execution(names::INIT_STAGE_PROGRESS, Arc::new(handle_init_stage_progress))?;
        self.registry.register_execution(
            names::SHUTDOWN,
            Arc::new(|master: &mut MasterController, _: Reference, _: &Command| {
                info!("shutdown requested");
                master.stop_requested = true;
                Acknowledgment::ok()
            }),
        )?;
        self.registry.designate_broadcast(names::DATA_CHANGED);
        Ok(())
    }

    fn ensure_channel(&self, channel: ChannelId) -> Result<(), RegistrationError> {
        if self.workers.contains_key(&channel) {
            Ok(())
        } else {
            Err(RegistrationError::UnknownChannel { channel })
        }
    }

    // ─── Sending ────────────────────────────────────────────────────

    /// Send to an explicit channel and track the reference.
    pub fn send_command(&mut self, command: Command, channel: ChannelId) -> Result<Reference, DispatchError> {
        let reference = self.refs.next();
        self.issue(reference, command, channel, Origin::Master)?;
        Ok(reference)
    }

    /// Dispatch by name: local handler, route, or broadcast.
    pub fn submit(&mut self, command: Command) -> Result<Reference, DispatchError> {
        let reference = self.refs.next();
        self.dispatch(reference, command, Origin::Master)?;
        Ok(reference)
    }

    /// One independent, independently correlated send per broadcast channel.
    pub fn broadcast_command(&mut self, command: &Command) -> Vec<Reference> {
        let targets = self.registry.broadcast_list().to_vec();
        targets
            .into_iter()
            .filter_map(|ch| match self.send_command(command.clone(), ch) {
                Ok(reference) => Some(reference),
                Err(e) => {
                    warn!(channel = %ch, command = command.name(), "broadcast send failed: {e}");
                    None
                }
            })
            .collect()
    }

    /// Drop a pending entry without waiting for its ack or timeout. A late
    /// ack for it is then reported as an unknown reference.
    pub fn cancel(&mut self, reference: Reference) -> bool {
        match self.pending.resolve(reference) {
            Some(entry) => {
                debug!(%reference, command = entry.name, "pending entry cancelled");
                true
            }
            None => false,
        }
    }

    fn dispatch(&mut self, reference: Reference, command: Command, origin: Origin) -> Result<(), DispatchError> {
        let name = command.name();
        let fire_and_forget = command.timeout().is_fire_and_forget();
        let designated = self.registry.is_broadcast(name);
        if designated {
            self.broadcast_command(&command);
        }

        match self.registry.resolve(name, command.component()) {
            Route::Local => {
                let ack = self.execute_local(reference, &command);
                if !fire_and_forget {
                    self.complete(reference, name, origin, ack);
                }
                Ok(())
            }
            Route::Channel(target) => {
                let sent = self.issue(reference, command, target, origin);
                if let Err(e) = &sent {
                    if !fire_and_forget && origin != Origin::Master {
                        self.complete(reference, name, origin, Acknowledgment::nok(e.to_string(), Severity::Error));
                    }
                }
                sent
            }
            Route::Unrouted if designated => {
                if !fire_and_forget {
                    self.complete(reference, name, origin, Acknowledgment::ok());
                }
                Ok(())
            }
            Route::Unrouted => {
                error!(%reference, command = name, "no handler or route");
                self.events
                    .report(Event::new(EventCode::NoRoute, Severity::Error).arg(name).arg(reference));
                let err = DispatchError::NoRoute { command: name };
                if !fire_and_forget && origin != Origin::Master {
                    self.complete(reference, name, origin, Acknowledgment::nok(err.to_string(), Severity::Error));
                }
                Err(err)
            }
        }
    }

    /// Record the pending entry (unless fire-and-forget) and hand the
    /// command to the target channel.
    fn issue(
        &mut self,
        reference: Reference,
        command: Command,
        target: ChannelId,
        origin: Origin,
    ) -> Result<(), DispatchError> {
        let name = command.name();
        let Some(slot) = self.workers.get(&target) else {
            return Err(self.channel_closed(target, reference, name).into());
        };

        if let Some(timeout) = command.timeout().duration() {
            let entry = PendingEntry::new(target, origin, name, timeout);
            if !self.pending.insert(reference, entry) {
                error!(%reference, command = name, "reference already pending");
                return Err(DispatchError::DuplicateReference { reference });
            }
        }

        debug!(%reference, command = name, channel = %target, "command sent");
        if slot.end.send(reference, command).is_err() {
            self.pending.resolve(reference);
            return Err(self.channel_closed(target, reference, name).into());
        }
        Ok(())
    }

    fn execute_local(&mut self, reference: Reference, command: &Command) -> Acknowledgment {
        let checked = self.gate.read().check(command);
        if let Err(e) = checked {
            return Acknowledgment::nok(e.to_string(), Severity::Warning);
        }
        match self.registry.execution_handler(command.name()) {
            Some(handler) => handler(self, reference, command),
            None => Acknowledgment::nok(
                DispatchError::NoRoute { command: command.name() }.to_string(),
                Severity::Error,
            ),
        }
    }

    /// Deliver an outcome to whoever issued `reference`.
    fn complete(&mut self, reference: Reference, name: &'static str, origin: Origin, ack: Acknowledgment) {
        match origin {
            Origin::Master => {
                debug!(%reference, command = name, %ack, "acknowledged");
                if let Some(handler) = self.registry.ack_handler(name) {
                    handler(self, reference, &ack);
                }
            }
            Origin::Worker(issuer) => self.ack_worker(issuer, reference, ack),
        }
    }

    fn ack_worker(&self, issuer: ChannelId, reference: Reference, ack: Acknowledgment) {
        let sent = match self.workers.get(&issuer) {
            Some(slot) => slot.end.send_ack(reference, ack).is_ok(),
            None => false,
        };
        if !sent {
            warn!(%reference, channel = %issuer, "issuer gone, acknowledgment dropped");
            self.events.report(
                Event::new(EventCode::ChannelClosed, Severity::Warning)
                    .arg(issuer)
                    .arg(reference),
            );
        }
    }

    fn channel_closed(&self, channel: ChannelId, reference: Reference, name: &'static str) -> ChannelError {
        error!(%reference, command = name, %channel, "channel closed");
        self.events.report(
            Event::new(EventCode::ChannelClosed, Severity::Error)
                .arg(channel)
                .arg(name)
                .arg(reference),
        );
        ChannelError::Closed { channel }
    }

    // ─── Acknowledgments & timeouts ─────────────────────────────────

    /// Resolve an acknowledgment. Unknown, late and duplicate references
    /// are reported and otherwise ignored.
    pub fn on_process_acknowledge(
        &mut self,
        from: ChannelId,
        reference: Reference,
        ack: Acknowledgment,
    ) -> Result<(), DispatchError> {
        let Some(entry) = self.pending.resolve(reference) else {
            warn!(%reference, channel = %from, %ack, "acknowledgment for unknown reference");
            self.events.report(
                Event::new(EventCode::UnknownReference, Severity::Warning)
                    .arg(reference)
                    .arg(from),
            );
            return Err(DispatchError::UnknownReference { reference });
        };
        if entry.target != from {
            warn!(%reference, expected = %entry.target, channel = %from, "acknowledgment from unexpected channel");
        }
        debug!(
            %reference,
            command = entry.name,
            elapsed_us = entry.issued_at.elapsed().as_micros() as u64,
            "pending entry resolved"
        );
        self.complete(reference, entry.name, entry.origin, ack);
        Ok(())
    }

    /// Expire a pending entry. A no-op when the entry was already resolved
    /// (the acknowledgment won). Returns whether the timeout took effect.
    pub fn on_process_timeout(&mut self, reference: Reference, name: &'static str) -> bool {
        let Some(entry) = self.pending.resolve(reference) else {
            debug!(%reference, command = name, "timeout after resolution ignored");
            return false;
        };
        warn!(%reference, command = name, channel = %entry.target, "command timed out");
        self.events.report(
            Event::new(EventCode::CommandTimeout, Severity::Warning)
                .arg(name)
                .arg(reference)
                .arg(entry.target),
        );

        if let Some(slot) = self.workers.get(&entry.target) {
            if let Err(e) = slot.end.send_timeout(reference, name) {
                warn!(%reference, "timeout notification failed: {e}");
            }
        }

        match entry.origin {
            Origin::Master => {
                if let Some(hook) = self.timeout_hook.clone() {
                    hook(self, reference, name);
                }
            }
            Origin::Worker(issuer) => {
                let err = DispatchError::CommandTimeout { reference, command: name };
                self.ack_worker(issuer, reference, Acknowledgment::nok(err.to_string(), Severity::Warning));
            }
        }
        true
    }

    fn process_timeouts(&mut self, now: Instant) {
        for (reference, name) in self.pending.expired(now) {
            self.on_process_timeout(reference, name);
        }
    }

    // ─── Loop ───────────────────────────────────────────────────────

    fn handle_inbox(&mut self, message: MasterInbox) {
        match message {
            MasterInbox::Worker { from, message } => match message {
                ToMaster::Ack { reference, ack } => {
                    // Unknown references are reported inside.
                    let _ = self.on_process_acknowledge(from, reference, ack);
                }
                ToMaster::Command { reference, command } => {
                    debug!(%reference, command = command.name(), channel = %from, "worker command");
                    if let Err(e) = self.dispatch(reference, command, Origin::Worker(from)) {
                        debug!(%reference, "worker command not dispatched: {e}");
                    }
                }
                ToMaster::Lifecycle(state) => {
                    if let Some(slot) = self.workers.get_mut(&from) {
                        slot.state = state;
                    }
                    self.events.report(
                        Event::new(EventCode::WorkerLifecycle, Severity::Info)
                            .arg(from)
                            .arg(format!("{state:?}")),
                    );
                }
            },
            MasterInbox::Submit {
                reference,
                command,
                target,
            } => {
                let name = command.name();
                let result = match target {
                    Some(channel) => self.issue(reference, command, channel, Origin::Master),
                    None => self.dispatch(reference, command, Origin::Master),
                };
                if let Err(e) = result {
                    warn!(%reference, command = name, "submit failed: {e}");
                }
            }
            MasterInbox::Broadcast(command) => {
                self.broadcast_command(&command);
            }
            MasterInbox::Cancel(reference) => {
                self.cancel(reference);
            }
            MasterInbox::RemoveWorker(channel) => {
                if let Err(e) = self.remove_worker(channel) {
                    warn!(%channel, "remove worker failed: {e}");
                }
            }
            MasterInbox::PowerFail => self.power_fail(),
            MasterInbox::Stop => self.stop_requested = true,
        }
    }

    /// One loop iteration, waiting at most `max_wait` for the inbox.
    /// Returns `false` once a stop was requested.
    pub fn poll(&mut self, max_wait: Duration) -> bool {
        let mut wait = max_wait;
        if let Some(deadline) = self.pending.next_deadline() {
            wait = wait.min(deadline.saturating_duration_since(Instant::now()));
        }

        match self.inbox_rx.recv_timeout(wait) {
            Ok(message) => self.handle_inbox(message),
            Err(RecvTimeoutError::Timeout) => {}
            // The controller holds a sender itself.
            Err(RecvTimeoutError::Disconnected) => self.stop_requested = true,
        }
        while let Ok(message) = self.inbox_rx.try_recv() {
            self.handle_inbox(message);
        }
        self.process_timeouts(Instant::now());
        !self.stop_requested
    }

    /// Run until stopped, then shut every worker down.
    pub fn run(&mut self) {
        info!(tick_ms = self.timer_tick.as_millis() as u64, workers = self.workers.len(), "master loop started");
        while self.poll(self.timer_tick) {}
        self.shutdown();
    }

    /// Stop every worker and join its thread, waiting at most the
    /// configured grace period per worker.
    pub fn shutdown(&mut self) {
        info!(pending = self.pending.len(), "master shutting down");
        self.signal_all(WorkerSignal::Stop);
        let grace = self.shutdown_grace;
        for (id, slot) in &mut self.workers {
            if let Some(thread) = slot.thread.take() {
                join_worker(*id, thread, grace);
            }
        }
        while let Ok(message) = self.inbox_rx.try_recv() {
            if let MasterInbox::Worker {
                from,
                message: ToMaster::Lifecycle(state),
            } = message
            {
                if let Some(slot) = self.workers.get_mut(&from) {
                    slot.state = state;
                }
            }
        }
        self.stop_requested = true;
    }

    // ─── State propagation ──────────────────────────────────────────

    /// Broadcast each gate change as a state-changed command.
    pub fn propagate(&mut self, changes: &[GateChange]) {
        for change in changes {
            let kind = match *change {
                GateChange::Operation(state) => CommandKind::OperationStateChanged(state),
                GateChange::Availability(state) => CommandKind::AvailabilityStateChanged(state),
            };
            let command = Command::new(kind)
                .with_timeout(self.default_timeout)
                .allowed_in(StatePermissions::ANYWHERE);
            self.broadcast_command(&command);
        }
    }
}

fn join_worker(channel: ChannelId, thread: JoinHandle<Result<(), LifecycleError>>, grace: Duration) {
    let deadline = Instant::now() + grace;
    while !thread.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    if !thread.is_finished() {
        warn!(%channel, "worker did not stop within grace period, detaching");
        return;
    }
    match thread.join() {
        Ok(Ok(())) => debug!(%channel, "worker joined"),
        Ok(Err(e)) => warn!(%channel, "worker ended with error: {e}"),
        Err(_) => error!(%channel, "worker panicked"),
    }
}

// ─── Built-in state handlers ────────────────────────────────────────

fn handle_operation_event(master: &mut MasterController, _: Reference, command: &Command) -> Acknowledgment {
    let CommandKind::OperationEvent(event) = command.kind() else {
        return Acknowledgment::nok("unexpected payload", Severity::Error);
    };
    let fired = master.gate.write().fire(*event);
    match fired {
        Ok(changes) => {
            master.propagate(&changes);
            Acknowledgment::ok()
        }
        Err(reason) => Acknowledgment::nok(reason, Severity::Warning),
    }
}

fn handle_set_availability(master: &mut MasterController, _: Reference, command: &Command) -> Acknowledgment {
    let CommandKind::SetAvailability { active, cause } = command.kind() else {
        return Acknowledgment::nok("unexpected payload", Severity::Error);
    };
    let change = master.gate.write().set_availability(*active, *cause);
    if let Some(change) = change {
        master.propagate(&[change]);
    }
    Acknowledgment::ok()
}

fn handle_init_stage_progress(master: &mut MasterController, _: Reference, command: &Command) -> Acknowledgment {
    let CommandKind::InitStageProgress { stage, success } = command.kind() else {
        return Acknowledgment::nok("unexpected payload", Severity::Error);
    };
    let changes = master.gate.write().set_init_stage_progress(*stage, *success);
    master.propagate(&changes);
    Acknowledgment::ok()
}

// ─── Tests ──────────────────────────────────────────────────────────
