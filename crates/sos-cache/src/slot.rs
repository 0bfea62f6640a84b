//! Lifecycle of an admitted complete update

use crate::completion::Completion;
use crate::update::ContentCacheUpdate;
use derive_more::Display;
use sos_common::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// State of a complete update slot
///
/// ```text
/// Waiting -> Running -> ApplyingUpdates -> Finished
///               |
///               +--> Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum SlotState {
    #[display("WAITING")]
    Waiting,
    #[display("RUNNING")]
    Running,
    #[display("APPLYING_UPDATES")]
    ApplyingUpdates,
    #[display("FINISHED")]
    Finished,
    #[display("FAILED")]
    Failed,
}

impl SlotState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Partial updates that run while the slot is in this state must be
    /// replayed on the rebuilt cache
    #[must_use]
    pub const fn accepts_partial_updates(self) -> bool {
        matches!(self, Self::Waiting | Self::Running)
    }

    const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Running)
                | (Self::Running, Self::ApplyingUpdates | Self::Failed)
                | (Self::ApplyingUpdates, Self::Finished)
        )
    }
}

/// Label and completion handle of a slot, usable without holding its lock
#[derive(Clone, Debug)]
pub struct Ticket {
    pub label: String,
    pub completion: Arc<Completion>,
}

/// A complete update admitted to the controller together with the partial
/// updates buffered for replay
#[derive(Debug)]
pub struct Slot {
    id: u64,
    update: Arc<dyn ContentCacheUpdate>,
    state: SlotState,
    buffered: VecDeque<Arc<dyn ContentCacheUpdate>>,
    completion: Arc<Completion>,
}

impl Slot {
    pub fn new(id: u64, update: Arc<dyn ContentCacheUpdate>) -> Self {
        Self {
            id,
            update,
            state: SlotState::Waiting,
            buffered: VecDeque::new(),
            completion: Arc::new(Completion::new()),
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn state(&self) -> SlotState {
        self.state
    }

    pub fn update(&self) -> Arc<dyn ContentCacheUpdate> {
        Arc::clone(&self.update)
    }

    pub fn label(&self) -> String {
        format!("CompleteUpdate[#{}]", self.id)
    }

    pub fn ticket(&self) -> Ticket {
        Ticket {
            label: self.label(),
            completion: Arc::clone(&self.completion),
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Move to `next`, rejecting edges outside the lifecycle
    pub fn transition(&mut self, next: SlotState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(Error::illegal_state(format!(
                "{} cannot move from {} to {}",
                self.label(),
                self.state,
                next
            )));
        }
        trace!("{}: state change: {} -> {}", self.label(), self.state, next);
        self.state = next;
        Ok(())
    }

    /// Remember a partial update for replay after the rebuild
    pub fn buffer(&mut self, update: Arc<dyn ContentCacheUpdate>) -> Result<()> {
        if !self.state.accepts_partial_updates() {
            return Err(Error::illegal_state(format!(
                "{} does not accept partial updates in state {}",
                self.label(),
                self.state
            )));
        }
        self.buffered.push_back(update);
        Ok(())
    }

    /// Take the buffered partial updates in arrival order
    pub fn drain_buffered(&mut self) -> Vec<Arc<dyn ContentCacheUpdate>> {
        self.buffered.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::FnUpdate;

    fn noop(name: &str) -> Arc<dyn ContentCacheUpdate> {
        Arc::new(FnUpdate::partial(name, |_| Ok(())))
    }

    #[test]
    fn test_lifecycle() {
        let mut slot = Slot::new(3, noop("complete"));
        assert_eq!(slot.label(), "CompleteUpdate[#3]");
        assert_eq!(slot.state(), SlotState::Waiting);

        slot.buffer(noop("a")).unwrap();
        slot.transition(SlotState::Running).unwrap();
        slot.buffer(noop("b")).unwrap();
        slot.transition(SlotState::ApplyingUpdates).unwrap();
        assert!(slot.buffer(noop("c")).is_err());

        let drained = slot.drain_buffered();
        assert_eq!(drained.len(), 2);
        assert_eq!(slot.buffered_len(), 0);

        slot.transition(SlotState::Finished).unwrap();
        assert!(slot.state().is_terminal());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut slot = Slot::new(1, noop("complete"));
        assert!(matches!(
            slot.transition(SlotState::Finished),
            Err(Error::IllegalState(_))
        ));
        slot.transition(SlotState::Running).unwrap();
        assert!(slot.transition(SlotState::Running).is_err());
        slot.transition(SlotState::Failed).unwrap();
        assert!(slot.transition(SlotState::ApplyingUpdates).is_err());
        assert_eq!(SlotState::ApplyingUpdates.to_string(), "APPLYING_UPDATES");
    }
}
