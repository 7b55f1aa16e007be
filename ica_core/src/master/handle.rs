//! Cross-thread access to the master loop.
//!
//! The master controller is owned by its loop thread; nothing else touches
//! its pending table or registries. Producers on other threads hold a
//! [`MasterHandle`], which allocates references synchronously and posts
//! requests into the master's inbox.

use crossbeam_channel::Sender;
use ica_common::command::Command;
use ica_common::error::ChannelError;
use ica_common::reference::{ChannelId, Reference, ReferenceGenerator};
use std::sync::Arc;

use super::MASTER_CHANNEL;
use crate::channel::ToMaster;

/// Everything the master loop consumes.
#[derive(Debug)]
pub enum MasterInbox {
    /// Traffic from a worker channel.
    Worker { from: ChannelId, message: ToMaster },
    /// Master-originated command. `target: None` routes by name.
    Submit {
        reference: Reference,
        command: Command,
        target: Option<ChannelId>,
    },
    Broadcast(Command),
    Cancel(Reference),
    RemoveWorker(ChannelId),
    PowerFail,
    Stop,
}

#[derive(Debug, Clone)]
pub struct MasterHandle {
    refs: Arc<ReferenceGenerator>,
    tx: Sender<MasterInbox>,
}

impl MasterHandle {
    pub(crate) fn new(refs: Arc<ReferenceGenerator>, tx: Sender<MasterInbox>) -> Self {
        Self { refs, tx }
    }

    /// Send to an explicit channel. The returned reference can be cancelled.
    pub fn send_command(&self, command: Command, channel: ChannelId) -> Result<Reference, ChannelError> {
        let reference = self.refs.next();
        self.post(MasterInbox::Submit {
            reference,
            command,
            target: Some(channel),
        })?;
        Ok(reference)
    }

    /// Route by command name (local handler or registered route).
    pub fn submit(&self, command: Command) -> Result<Reference, ChannelError> {
        let reference = self.refs.next();
        self.post(MasterInbox::Submit {
            reference,
            command,
            target: None,
        })?;
        Ok(reference)
    }

    pub fn broadcast(&self, command: Command) -> Result<(), ChannelError> {
        self.post(MasterInbox::Broadcast(command))
    }

    pub fn cancel(&self, reference: Reference) -> Result<(), ChannelError> {
        self.post(MasterInbox::Cancel(reference))
    }

    pub fn remove_worker(&self, channel: ChannelId) -> Result<(), ChannelError> {
        self.post(MasterInbox::RemoveWorker(channel))
    }

    pub fn power_fail(&self) -> Result<(), ChannelError> {
        self.post(MasterInbox::PowerFail)
    }

    /// Ask the loop to stop. Returns `false` when it is already gone.
    pub fn stop(&self) -> bool {
        self.post(MasterInbox::Stop).is_ok()
    }

    fn post(&self, message: MasterInbox) -> Result<(), ChannelError> {
        self.tx
            .send(message)
            .map_err(|_| ChannelError::Closed { channel: MASTER_CHANNEL })
    }
}
