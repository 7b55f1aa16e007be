//! Bidirectional master↔worker channel.
//!
//! ```text
//!            MasterEnd                              WorkerEnd
//!  send(ref, cmd)      ── ToWorker::Command ──►  inbound queue
//!  send_ack(ref, ack)  ── ToWorker::Ack ──────►  inbound queue
//!  master inbox  ◄── MasterInbox::Worker(Command) ── send(ref, cmd)
//!  master inbox  ◄── MasterInbox::Worker(Ack) ────── send_ack(ref, ack)
//! ```
//!
//! Per-channel FIFO holds for any two messages sent from the same end;
//! nothing is ordered across channels. Sending to a torn-down peer fails
//! with [`ChannelError::Closed`] instead of dropping the message.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, select, unbounded};
use ica_common::ack::Acknowledgment;
use ica_common::command::{Command, ComponentType};
use ica_common::error::ChannelError;
use ica_common::reference::{ChannelId, Reference};
use std::time::Duration;

use crate::controller::lifecycle::LifecycleState;
use crate::master::handle::MasterInbox;

/// Lifecycle signals the master sends to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    Go,
    Stop,
    PowerFail,
}

/// Master → worker message.
#[derive(Debug)]
pub enum ToWorker {
    /// Command to execute.
    Command { reference: Reference, command: Command },
    /// Acknowledgment for a command this worker sent.
    Ack { reference: Reference, ack: Acknowledgment },
    /// A command this worker was executing timed out at the master.
    Timeout { reference: Reference, name: &'static str },
    Signal(WorkerSignal),
    /// Out-of-band wake-up (driver completions and similar).
    Wake,
}

/// Worker → master message.
#[derive(Debug)]
pub enum ToMaster {
    Command { reference: Reference, command: Command },
    Ack { reference: Reference, ack: Acknowledgment },
    Lifecycle(LifecycleState),
}

/// Static description of the worker behind a channel.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub component: ComponentType,
}

/// Master side of a channel.
#[derive(Debug)]
pub struct MasterEnd {
    info: ChannelInfo,
    tx: Sender<ToWorker>,
}

impl MasterEnd {
    #[inline]
    pub fn id(&self) -> ChannelId {
        self.info.id
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    /// Deliver a command into the worker's inbound queue.
    pub fn send(&self, reference: Reference, command: Command) -> Result<(), ChannelError> {
        self.push(ToWorker::Command { reference, command })
    }

    /// Deliver an acknowledgment for a worker-originated command.
    pub fn send_ack(&self, reference: Reference, ack: Acknowledgment) -> Result<(), ChannelError> {
        self.push(ToWorker::Ack { reference, ack })
    }

    pub fn send_timeout(&self, reference: Reference, name: &'static str) -> Result<(), ChannelError> {
        self.push(ToWorker::Timeout { reference, name })
    }

    pub fn signal(&self, signal: WorkerSignal) -> Result<(), ChannelError> {
        self.push(ToWorker::Signal(signal))
    }

    fn push(&self, message: ToWorker) -> Result<(), ChannelError> {
        self.tx
            .send(message)
            .map_err(|_| ChannelError::Closed { channel: self.info.id })
    }
}

/// Worker side of a channel.
#[derive(Debug)]
pub struct WorkerEnd {
    info: ChannelInfo,
    inbound: Receiver<ToWorker>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    to_master: Sender<MasterInbox>,
}

impl WorkerEnd {
    #[inline]
    pub fn id(&self) -> ChannelId {
        self.info.id
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    /// Send a worker-originated command to the master.
    pub fn send(&self, reference: Reference, command: Command) -> Result<(), ChannelError> {
        self.push(ToMaster::Command { reference, command })
    }

    /// Send an acknowledgment toward the master.
    pub fn send_ack(&self, reference: Reference, ack: Acknowledgment) -> Result<(), ChannelError> {
        self.push(ToMaster::Ack { reference, ack })
    }

    pub fn report_lifecycle(&self, state: LifecycleState) -> Result<(), ChannelError> {
        self.push(ToMaster::Lifecycle(state))
    }

    /// Block until the next inbound message or a wake-up. `None` once the
    /// master end is gone.
    pub fn recv(&self) -> Option<ToWorker> {
        select! {
            recv(self.inbound) -> msg => msg.ok(),
            recv(self.wake_rx) -> _ => Some(ToWorker::Wake),
        }
    }

    /// Like [`recv`](Self::recv) with an upper bound on the wait.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ToWorker, RecvTimeoutError> {
        select! {
            recv(self.inbound) -> msg => msg.map_err(|_| RecvTimeoutError::Disconnected),
            recv(self.wake_rx) -> _ => Ok(ToWorker::Wake),
            default(timeout) => Err(RecvTimeoutError::Timeout),
        }
    }

    /// Handle that wakes this worker's loop with [`ToWorker::Wake`].
    pub fn waker(&self) -> WorkerWaker {
        WorkerWaker {
            tx: self.wake_tx.clone(),
        }
    }

    fn push(&self, message: ToMaster) -> Result<(), ChannelError> {
        self.to_master
            .send(MasterInbox::Worker {
                from: self.info.id,
                message,
            })
            .map_err(|_| ChannelError::Closed { channel: self.info.id })
    }
}

/// Wakes a worker loop from another thread. Wake-ups coalesce: several
/// calls before the worker runs produce a single [`ToWorker::Wake`].
#[derive(Debug, Clone)]
pub struct WorkerWaker {
    tx: Sender<()>,
}

impl WorkerWaker {
    /// Returns `false` when the worker is gone.
    pub fn wake(&self) -> bool {
        !matches!(self.tx.try_send(()), Err(TrySendError::Disconnected(_)))
    }
}

/// Create both ends of a channel. `to_master` is the master's shared inbox.
pub fn pair(info: ChannelInfo, to_master: Sender<MasterInbox>) -> (MasterEnd, WorkerEnd) {
    let (tx, rx) = unbounded();
    let (wake_tx, wake_rx) = bounded(1);
    let master = MasterEnd {
        info: info.clone(),
        tx,
    };
    let worker = WorkerEnd {
        info,
        inbound: rx,
        wake_tx,
        wake_rx,
        to_master,
    };
    (master, worker)
}
