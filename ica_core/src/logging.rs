//! Data-logging worker.
//!
//! Keeps a bounded day log of operator entries, data changes and state
//! propagation broadcasts, and mirrors every record to `tracing`.

use ica_common::ack::Acknowledgment;
use ica_common::command::{Command, CommandKind, ComponentType};
use ica_common::error::LifecycleError;
use ica_common::event::Severity;
use ica_common::reference::Reference;
use ica_common::state::{InitStage, StatePermissions};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

use crate::controller::{Reply, ThreadController, WorkerContext};

/// Records kept before the oldest is dropped.
pub const DAY_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub at: SystemTime,
    pub reference: Reference,
    pub text: String,
}

/// Shared, bounded record list.
#[derive(Debug, Clone, Default)]
pub struct DayLog {
    records: Arc<Mutex<VecDeque<LogRecord>>>,
}

impl DayLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, reference: Reference, text: String) {
        let mut records = self.records.lock();
        if records.len() == DAY_LOG_CAPACITY {
            records.pop_front();
        }
        records.push_back(LogRecord {
            at: SystemTime::now(),
            reference,
            text,
        });
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Record texts, oldest first.
    pub fn texts(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.text.clone()).collect()
    }
}

pub struct LoggingWorker {
    log: DayLog,
}

impl LoggingWorker {
    pub fn new(log: DayLog) -> Self {
        Self { log }
    }
}

impl ThreadController for LoggingWorker {
    fn name(&self) -> &str {
        "data_logging"
    }

    fn component(&self) -> ComponentType {
        ComponentType::DataLogging
    }

    fn create_and_initialize_objects(&mut self, ctx: &WorkerContext) -> Result<(), LifecycleError> {
        let report = Command::new(CommandKind::InitStageProgress {
            stage: InitStage::DataLogging,
            success: true,
        })
        .allowed_in(StatePermissions::ANYWHERE);
        if let Err(e) = ctx.send_command(report) {
            warn!("init stage report failed: {e}");
        }
        Ok(())
    }

    fn on_command(&mut self, _ctx: &WorkerContext, reference: Reference, command: Command) -> Reply {
        let text = match command.into_kind() {
            CommandKind::DayLogEntry { text } => text,
            CommandKind::DataChanged { key, value } => format!("{key} = {value}"),
            CommandKind::OperationStateChanged(state) => format!("operation state: {}", state.name()),
            CommandKind::AvailabilityStateChanged(state) => format!("availability state: {}", state.name()),
            other => {
                return Reply::Ack(Acknowledgment::nok(
                    format!("logging worker cannot execute {}", other.name()),
                    Severity::Warning,
                ));
            }
        };
        info!(%reference, "day log: {text}");
        self.log.push(reference, text);
        Reply::Ack(Acknowledgment::ok())
    }
}
