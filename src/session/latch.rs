//! Single-resolution latch for one session
//!
//! Activation callbacks, the deadline timer, delivery failures and signals
//! all race to finish a session. The latch owns both the session state and
//! the sending half of a oneshot channel; the first `resolve` moves the
//! state to a terminal one and sends, every later call is a no-op.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use super::{Outcome, SessionState};

struct Slot {
    state: SessionState,
    sender: Option<oneshot::Sender<Outcome>>,
}

pub struct SessionLatch {
    slot: Mutex<Slot>,
}

impl SessionLatch {
    /// Create a latch in `Created` state and the receiver for its outcome
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (sender, receiver) = oneshot::channel();
        let latch = Self {
            slot: Mutex::new(Slot {
                state: SessionState::Created,
                sender: Some(sender),
            }),
        };
        (Arc::new(latch), receiver)
    }

    /// `Created -> AwaitingActivation`
    pub fn begin_waiting(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.state == SessionState::Created {
            slot.state = SessionState::AwaitingActivation;
        }
    }

    /// Finish the session with `outcome` unless it already finished
    ///
    /// Returns `true` only for the call that resolved the session.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.state.is_terminal() {
            tracing::trace!(?outcome, "Session already resolved, ignoring");
            return false;
        }

        slot.state = outcome.state();
        if let Some(sender) = slot.sender.take() {
            // The receiver may be gone if the coordinator was dropped; the
            // state still records how the session ended.
            let _ = sender.send(outcome);
        }
        true
    }

    pub fn state(&self) -> SessionState {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }
}
