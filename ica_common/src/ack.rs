//! Acknowledgments.
//!
//! An [`Acknowledgment`] is created by the handler that processed a command
//! and consumed exactly once by the pending entry matching its reference.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::Severity;

/// OK, or NOK with free-form text and a severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckOutcome {
    Ok,
    Nok { message: String, severity: Severity },
}

/// Optional typed payload carried back with an acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckPayload {
    /// Raw result bytes (device results).
    Bytes(Vec<u8>),
    /// Free text.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub outcome: AckOutcome,
    pub payload: Option<AckPayload>,
}

impl Acknowledgment {
    pub fn ok() -> Self {
        Self {
            outcome: AckOutcome::Ok,
            payload: None,
        }
    }

    pub fn nok(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            outcome: AckOutcome::Nok {
                message: message.into(),
                severity,
            },
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: AckPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, AckOutcome::Ok)
    }

    /// NOK text, if any.
    pub fn message(&self) -> Option<&str> {
        match &self.outcome {
            AckOutcome::Ok => None,
            AckOutcome::Nok { message, .. } => Some(message),
        }
    }
}

impl fmt::Display for Acknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AckOutcome::Ok => f.write_str("OK"),
            AckOutcome::Nok { message, severity } => write!(f, "NOK({severity:?}): {message}"),
        }
    }
}
