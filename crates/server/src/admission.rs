//! Session admission controller
//!
//! The single process-wide shared mutable resource: one slot limiting
//! the server to one active work session at a time. Acquisition never
//! blocks and never queues: a second caller is rejected immediately.
//! Status reads are lock-free via an `ArcSwap` snapshot.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use workbay_protocol::{AdmissionStatus, SessionStatus};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("another work session is already being processed")]
    Conflict,
}

struct ActiveSlot {
    owner_id: String,
    cancel: CancellationToken,
}

/// Result of an owner-checked abort request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The caller owns the active session and cancellation was signalled
    /// (or had already been signalled).
    Aborted,
    /// A session is active but belongs to a different caller.
    NotOwner,
    /// No session is active.
    Idle,
}

/// Single-flight admission gate.
///
/// Holds only the owner id and a cancel handle for the running session;
/// session content is owned exclusively by the orchestration task.
pub struct AdmissionController {
    slot: Mutex<Option<ActiveSlot>>,
    status: ArcSwap<AdmissionStatus>,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            status: ArcSwap::from_pointee(AdmissionStatus::default()),
        }
    }

    /// Try to claim the slot for `owner_id`.
    ///
    /// On success, atomically records the owner and returns the
    /// cancellation token the orchestration task must carry. Fails with
    /// `Conflict` while any session is active.
    pub fn try_acquire(&self, owner_id: &str) -> Result<CancellationToken, AdmissionError> {
        let mut slot = self.slot.lock().expect("admission slot lock poisoned");
        if slot.is_some() {
            return Err(AdmissionError::Conflict);
        }

        let cancel = CancellationToken::new();
        *slot = Some(ActiveSlot {
            owner_id: owner_id.to_string(),
            cancel: cancel.clone(),
        });
        self.status.store(Arc::new(AdmissionStatus {
            active: true,
            owner_id: Some(owner_id.to_string()),
            phase: Some(SessionStatus::Pending),
        }));

        info!(
            component = "admission",
            event = "admission.acquired",
            owner_id = %owner_id,
            "Admission slot acquired"
        );
        Ok(cancel)
    }

    /// Clear the slot. Safe to call when already released; the exit
    /// discipline calls this on every path.
    pub fn release(&self) {
        let mut slot = self.slot.lock().expect("admission slot lock poisoned");
        if let Some(active) = slot.take() {
            self.status.store(Arc::new(AdmissionStatus::default()));
            info!(
                component = "admission",
                event = "admission.released",
                owner_id = %active.owner_id,
                "Admission slot released"
            );
        }
    }

    /// Signal cooperative cancellation to the current owner's task.
    ///
    /// Returns `true` if this call fired a not-yet-cancelled token;
    /// repeated aborts and aborts while idle are no-ops.
    pub fn abort(&self) -> bool {
        let slot = self.slot.lock().expect("admission slot lock poisoned");
        match slot.as_ref() {
            Some(active) if !active.cancel.is_cancelled() => {
                warn!(
                    component = "admission",
                    event = "admission.abort",
                    owner_id = %active.owner_id,
                    "Abort requested for active session"
                );
                active.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Record the lifecycle phase of the active session for status
    /// queries. No-op when the slot is empty (the session may have
    /// been released concurrently).
    pub fn set_phase(&self, phase: SessionStatus) {
        let slot = self.slot.lock().expect("admission slot lock poisoned");
        if let Some(active) = slot.as_ref() {
            self.status.store(Arc::new(AdmissionStatus {
                active: true,
                owner_id: Some(active.owner_id.clone()),
                phase: Some(phase),
            }));
        }
    }

    /// Abort only if `caller_id` owns the active session.
    ///
    /// The owner comparison and the cancellation happen under the slot
    /// lock, so the slot cannot change hands between check and signal.
    pub fn abort_if_owner(&self, caller_id: &str) -> AbortOutcome {
        let slot = self.slot.lock().expect("admission slot lock poisoned");
        match slot.as_ref() {
            None => AbortOutcome::Idle,
            Some(active) if active.owner_id != caller_id => AbortOutcome::NotOwner,
            Some(active) => {
                if !active.cancel.is_cancelled() {
                    warn!(
                        component = "admission",
                        event = "admission.abort",
                        owner_id = %active.owner_id,
                        "Abort requested for active session"
                    );
                    active.cancel.cancel();
                }
                AbortOutcome::Aborted
            }
        }
    }

    /// Lock-free snapshot of the slot
    pub fn status(&self) -> AdmissionStatus {
        AdmissionStatus::clone(&self.status.load())
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}
