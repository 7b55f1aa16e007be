//! Device-command worker.
//!
//! Executes `CmdDevice` through a [`DeviceDriver`]. Synchronous verbs are
//! acknowledged straight away. Long-running verbs claim a correlation
//! slot before the driver starts them and are acknowledged when the
//! matching completion arrives; a full pool fails the command at once.
//! A long-running verb needs a timeout to bound its slot, so one sent
//! fire-and-forget is refused.

use crossbeam_channel::{Receiver, Sender, unbounded};
use ica_common::ack::{AckPayload, Acknowledgment};
use ica_common::command::{CmdTimeout, Command, CommandKind, ComponentType, DeviceCommand};
use ica_common::error::{DispatchError, LifecycleError};
use ica_common::event::{Event, EventCode, Severity};
use ica_common::reference::Reference;
use ica_common::state::{InitStage, StatePermissions};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::driver::{CompletionSink, DeviceCompletion, DeviceDriver, DeviceResponse};
use super::pool::DevicePool;
use crate::config::DeviceConfig;
use crate::controller::{Reply, ThreadController, WorkerContext};

pub struct DeviceWorker<D: DeviceDriver> {
    driver: D,
    pool: Arc<DevicePool>,
    completions_tx: Sender<DeviceCompletion>,
    completions_rx: Receiver<DeviceCompletion>,
    /// Completion event → verbs it may finish.
    candidates: HashMap<String, Vec<String>>,
}

impl<D: DeviceDriver> DeviceWorker<D> {
    pub fn new(driver: D, config: &DeviceConfig) -> Self {
        let (completions_tx, completions_rx) = unbounded();
        let mut candidates: HashMap<String, Vec<String>> = HashMap::new();
        for lr in &config.long_running {
            candidates
                .entry(lr.completion_event.clone())
                .or_default()
                .push(lr.verb.clone());
        }
        Self {
            driver,
            pool: Arc::new(DevicePool::with_limit(config.pool_capacity)),
            completions_tx,
            completions_rx,
            candidates,
        }
    }

    /// Shared view of the correlation pool.
    pub fn pool(&self) -> Arc<DevicePool> {
        self.pool.clone()
    }

    fn report_stage(&self, ctx: &WorkerContext, success: bool) {
        let command = Command::new(CommandKind::InitStageProgress {
            stage: InitStage::DeviceControl,
            success,
        })
        .allowed_in(StatePermissions::ANYWHERE);
        if let Err(e) = ctx.send_command(command) {
            warn!("init stage report failed: {e}");
        }
    }

    fn execute(&mut self, ctx: &WorkerContext, reference: Reference, device: DeviceCommand, timeout: CmdTimeout) -> Reply {
        let long_running = self.driver.is_long_running(&device.verb);
        if long_running && timeout.is_fire_and_forget() {
            warn!(%reference, instance = device.instance_id, verb = %device.verb, "long-running verb sent without a timeout");
            ctx.events().report(
                Event::new(EventCode::CommandDenied, Severity::Warning)
                    .arg(&device.verb)
                    .arg(device.instance_id)
                    .arg("no timeout"),
            );
            return Reply::Ack(Acknowledgment::nok(
                format!("long-running verb '{}' needs a timeout", device.verb),
                Severity::Warning,
            ));
        }
        if long_running {
            if let Err(e) = self.pool.allocate(reference, device.instance_id, &device.verb) {
                return Reply::Ack(self.pool_failure(ctx, reference, &device, e.into()));
            }
        }

        match self.driver.execute(&device) {
            DeviceResponse::Completed(result) => {
                if long_running {
                    self.pool.release_reference(reference);
                }
                Reply::Ack(result_ack(result))
            }
            DeviceResponse::Accepted if long_running => {
                debug!(%reference, instance = device.instance_id, verb = %device.verb, "awaiting completion");
                Reply::Deferred
            }
            DeviceResponse::Accepted => match self.pool.allocate(reference, device.instance_id, &device.verb) {
                Ok(_) => Reply::Deferred,
                Err(e) => {
                    self.driver.cancel(device.instance_id, &device.verb);
                    Reply::Ack(self.pool_failure(ctx, reference, &device, e.into()))
                }
            },
        }
    }

    fn pool_failure(
        &self,
        ctx: &WorkerContext,
        reference: Reference,
        device: &DeviceCommand,
        err: DispatchError,
    ) -> Acknowledgment {
        warn!(%reference, instance = device.instance_id, verb = %device.verb, "{err}");
        ctx.events().report(
            Event::new(EventCode::PoolExhausted, Severity::Error)
                .arg(&device.verb)
                .arg(device.instance_id)
                .arg(reference),
        );
        Acknowledgment::nok(err.to_string(), Severity::Error)
    }

    fn drain_completions(&mut self, ctx: &WorkerContext) {
        while let Ok(done) = self.completions_rx.try_recv() {
            let fallback = [done.event.clone()];
            let names: Vec<&str> = match self.candidates.get(&done.event) {
                Some(verbs) => verbs.iter().map(String::as_str).collect(),
                None => fallback.iter().map(String::as_str).collect(),
            };
            match self.pool.resolve(done.instance_id, &names) {
                Some((slot, reference)) => {
                    debug!(%reference, slot, event = %done.event, "completion matched");
                    if let Err(e) = ctx.send_acknowledge(reference, result_ack(done.result)) {
                        error!(%reference, "acknowledge failed: {e}");
                    }
                }
                None => {
                    warn!(instance = done.instance_id, event = %done.event, "completion matches no pending command");
                    ctx.events().report(
                        Event::new(EventCode::UnknownReference, Severity::Warning)
                            .arg(done.instance_id)
                            .arg(&done.event),
                    );
                }
            }
        }
    }
}

fn result_ack(result: Result<Vec<u8>, String>) -> Acknowledgment {
    match result {
        Ok(bytes) if bytes.is_empty() => Acknowledgment::ok(),
        Ok(bytes) => Acknowledgment::ok().with_payload(AckPayload::Bytes(bytes)),
        Err(message) => Acknowledgment::nok(message, Severity::Error),
    }
}

impl<D: DeviceDriver> ThreadController for DeviceWorker<D> {
    fn name(&self) -> &str {
        "device_control"
    }

    fn component(&self) -> ComponentType {
        ComponentType::DeviceControl
    }

    fn create_and_initialize_objects(&mut self, ctx: &WorkerContext) -> Result<(), LifecycleError> {
        let sink = CompletionSink::new(self.completions_tx.clone(), ctx.waker());
        match self.driver.init(sink) {
            Ok(()) => {
                info!(driver = self.driver.name(), slots = self.pool.capacity(), "device worker ready");
                self.report_stage(ctx, true);
                Ok(())
            }
            Err(e) => {
                error!(driver = self.driver.name(), "driver init failed: {e}");
                self.report_stage(ctx, false);
                Err(LifecycleError::InitFailed {
                    worker: self.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn on_command(&mut self, ctx: &WorkerContext, reference: Reference, command: Command) -> Reply {
        let timeout = command.timeout();
        match command.into_kind() {
            CommandKind::Device(device) => self.execute(ctx, reference, device, timeout),
            other => Reply::Ack(Acknowledgment::nok(
                format!("device worker cannot execute {}", other.name()),
                Severity::Warning,
            )),
        }
    }

    fn on_wake(&mut self, ctx: &WorkerContext) {
        self.drain_completions(ctx);
    }

    fn on_cmd_timeout(&mut self, _ctx: &WorkerContext, reference: Reference, name: &'static str) {
        match self.pool.lookup(reference) {
            Some((instance_id, verb)) => {
                warn!(%reference, command = name, instance = instance_id, %verb, "device command timed out, cancelling");
                self.pool.release_reference(reference);
                self.driver.cancel(instance_id, &verb);
            }
            None => debug!(%reference, command = name, "timeout for a command no longer in the pool"),
        }
    }

    fn on_power_fail(&mut self, ctx: &WorkerContext) {
        let in_flight = self.pool.clear();
        warn!(count = in_flight.len(), "power fail: abandoning device operations");
        for (reference, instance_id, verb) in in_flight {
            self.driver.cancel(instance_id, &verb);
            if let Err(e) = ctx.send_acknowledge(reference, Acknowledgment::nok("power fail", Severity::Fatal)) {
                error!(%reference, "acknowledge failed: {e}");
            }
        }
    }

    fn cleanup_and_destroy_objects(&mut self, _ctx: &WorkerContext) {
        let abandoned = self.pool.clear();
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "device worker destroyed with operations in flight");
        }
        if let Err(e) = self.driver.shutdown() {
            warn!(driver = self.driver.name(), "driver shutdown failed: {e}");
        }
    }
}
