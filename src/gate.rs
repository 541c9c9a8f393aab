//! Cross-task rendezvous for blocking human decisions.
//!
//! A worker needing confirmation parks on the gate while the presentation
//! layer renders the prompt and answers it. Only one confirmation may be
//! outstanding system-wide at a time; the slot is the single piece of
//! shared mutable state.

use crate::error::{CoworkError, Result};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// The human's answer: a boolean decision, or free text treated as a
/// follow-up utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approved,
    Denied,
    Reply(String),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved)
    }
}

#[derive(Default)]
pub struct ConfirmationGate {
    slot: Mutex<Option<oneshot::Sender<Decision>>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot. Fails if a confirmation is already outstanding.
    /// The caller emits its "confirmation requested" event after reserving,
    /// then awaits the returned receiver.
    pub fn request(&self) -> Result<oneshot::Receiver<Decision>> {
        let mut slot = self.slot.lock().expect("gate lock poisoned");
        if slot.is_some() {
            return Err(CoworkError::GateBusy);
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(tx);
        Ok(rx)
    }

    /// Resolve the outstanding confirmation exactly once. Returns false if
    /// no confirmation was pending (or the asker went away).
    pub fn respond(&self, decision: Decision) -> bool {
        let sender = self.slot.lock().expect("gate lock poisoned").take();
        match sender {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().expect("gate lock poisoned").is_some()
    }
}
