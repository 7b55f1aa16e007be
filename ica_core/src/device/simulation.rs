//! Simulated device backend.
//!
//! `SimulatedDriver` answers configured long-running verbs asynchronously:
//! a helper thread sleeps for the configured delay and then pushes the
//! verb's completion event through the sink. Every other verb completes
//! immediately, echoing the payload. Instance ids not in the configuration
//! fail synchronously.

use ica_common::command::DeviceCommand;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::driver::{CompletionSink, DeviceCompletion, DeviceDriver, DeviceError, DeviceResponse};
use crate::config::DeviceConfig;

/// Long-running verb behaviour.
#[derive(Debug, Clone)]
struct AsyncVerb {
    delay: Duration,
    completion_event: String,
}

/// One accepted operation. The flag is claimed exactly once, either by the
/// helper thread (completion) or by `cancel` (abort).
#[derive(Debug)]
struct InFlight {
    instance_id: u32,
    verb: String,
    claimed: Arc<AtomicBool>,
}

pub struct SimulatedDriver {
    instances: HashSet<u32>,
    verbs: HashMap<String, AsyncVerb>,
    sink: Option<CompletionSink>,
    in_flight: Vec<InFlight>,
}

impl SimulatedDriver {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            instances: config.instances.iter().map(|i| i.id).collect(),
            verbs: config
                .long_running
                .iter()
                .map(|lr| {
                    (
                        lr.verb.clone(),
                        AsyncVerb {
                            delay: lr.delay(),
                            completion_event: lr.completion_event.clone(),
                        },
                    )
                })
                .collect(),
            sink: None,
            in_flight: Vec::new(),
        }
    }

    /// Operations accepted and neither completed nor cancelled yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .iter()
            .filter(|op| !op.claimed.load(Ordering::Acquire))
            .count()
    }

    fn prune(&mut self) {
        self.in_flight.retain(|op| !op.claimed.load(Ordering::Acquire));
    }
}

impl DeviceDriver for SimulatedDriver {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn init(&mut self, completions: CompletionSink) -> Result<(), DeviceError> {
        info!(
            instances = self.instances.len(),
            long_running = self.verbs.len(),
            "simulated device driver initialised"
        );
        self.sink = Some(completions);
        Ok(())
    }

    fn is_long_running(&self, verb: &str) -> bool {
        self.verbs.contains_key(verb)
    }

    fn execute(&mut self, command: &DeviceCommand) -> DeviceResponse {
        if !self.instances.contains(&command.instance_id) {
            return DeviceResponse::Completed(Err(DeviceError::UnknownInstance(command.instance_id).to_string()));
        }

        let Some(spec) = self.verbs.get(&command.verb).cloned() else {
            debug!(instance = command.instance_id, verb = %command.verb, "sync verb completed");
            return DeviceResponse::Completed(Ok(command.payload.clone()));
        };
        let Some(sink) = self.sink.clone() else {
            return DeviceResponse::Completed(Err(
                DeviceError::CommunicationError("driver not initialised".into()).to_string(),
            ));
        };

        self.prune();
        let claimed = Arc::new(AtomicBool::new(false));
        self.in_flight.push(InFlight {
            instance_id: command.instance_id,
            verb: command.verb.clone(),
            claimed: claimed.clone(),
        });

        let completion = DeviceCompletion {
            instance_id: command.instance_id,
            event: spec.completion_event,
            result: Ok(command.payload.clone()),
        };
        let spawned = thread::Builder::new()
            .name("ica-sim-device".into())
            .spawn(move || {
                thread::sleep(spec.delay);
                if !claimed.swap(true, Ordering::AcqRel) {
                    sink.complete(completion);
                }
            });
        if let Err(e) = spawned {
            self.in_flight.pop();
            return DeviceResponse::Completed(Err(DeviceError::CommunicationError(e.to_string()).to_string()));
        }
        debug!(instance = command.instance_id, verb = %command.verb, "async verb accepted");
        DeviceResponse::Accepted
    }

    fn cancel(&mut self, instance_id: u32, verb: &str) {
        let cancelled = self
            .in_flight
            .iter()
            .filter(|op| op.instance_id == instance_id && op.verb == verb)
            .any(|op| !op.claimed.swap(true, Ordering::AcqRel));
        if cancelled {
            debug!(instance = instance_id, verb, "operation cancelled");
        } else {
            warn!(instance = instance_id, verb, "cancel: no operation in flight");
        }
        self.prune();
    }

    fn shutdown(&mut self) -> Result<(), DeviceError> {
        for op in &self.in_flight {
            op.claimed.store(true, Ordering::Release);
        }
        self.in_flight.clear();
        self.sink = None;
        info!("simulated device driver shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{self, ChannelInfo};
    use crate::config::{DeviceInstanceConfig, LongRunningVerb};
    use crossbeam_channel::{Receiver, unbounded};
    use ica_common::command::ComponentType;
    use ica_common::reference::ChannelId;

    fn config(delay_ms: u64) -> DeviceConfig {
        DeviceConfig {
            pool_capacity: 4,
            instances: vec![DeviceInstanceConfig {
                id: 7,
                name: "gripper".into(),
            }],
            long_running: vec![LongRunningVerb {
                verb: "Attach".into(),
                delay_ms,
                completion_event: "AttachDone".into(),
            }],
        }
    }

    fn driver(delay_ms: u64) -> (SimulatedDriver, Receiver<DeviceCompletion>, channel::WorkerEnd) {
        let (inbox_tx, _) = unbounded();
        let info = ChannelInfo {
            id: ChannelId(1),
            name: "dev".into(),
            component: ComponentType::DeviceControl,
        };
        let (_master, worker) = channel::pair(info, inbox_tx);
        let (tx, rx) = unbounded();
        let mut d = SimulatedDriver::new(&config(delay_ms));
        d.init(CompletionSink::new(tx, worker.waker())).unwrap();
        (d, rx, worker)
    }

    #[test]
    fn sync_verb_echoes_payload() {
        let (mut d, _, _w) = driver(0);
        let resp = d.execute(&DeviceCommand::new(7, "Ping").with_payload(vec![1, 2]));
        assert_eq!(resp, DeviceResponse::Completed(Ok(vec![1, 2])));
    }

    #[test]
    fn unknown_instance_fails() {
        let (mut d, _, _w) = driver(0);
        assert!(matches!(
            d.execute(&DeviceCommand::new(99, "Ping")),
            DeviceResponse::Completed(Err(_))
        ));
    }

    #[test]
    fn long_running_completes_later() {
        let (mut d, rx, _w) = driver(5);
        assert!(d.is_long_running("Attach"));
        assert_eq!(d.execute(&DeviceCommand::new(7, "Attach")), DeviceResponse::Accepted);
        let done = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(done.instance_id, 7);
        assert_eq!(done.event, "AttachDone");
    }

    #[test]
    fn cancelled_operation_never_completes() {
        let (mut d, rx, _w) = driver(50);
        d.execute(&DeviceCommand::new(7, "Attach"));
        assert_eq!(d.in_flight(), 1);
        d.cancel(7, "Attach");
        assert_eq!(d.in_flight(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }
}
