//! One-shot completion signal shared by everyone waiting on a complete update

use parking_lot::{Condvar, Mutex};
use sos_common::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a complete update, shared by all of its waiters
pub type Outcome = Result<(), Arc<Error>>;

/// Resolved exactly once; every waiter observes the same outcome
#[derive(Debug, Default)]
pub struct Completion {
    outcome: Mutex<Option<Outcome>>,
    resolved: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome and wake all waiters
    ///
    /// Returns false if the completion was already resolved; the first
    /// outcome wins.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.resolved.notify_all();
        true
    }

    /// Block until resolved
    pub fn wait(&self) -> Outcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.resolved.wait(&mut slot);
        }
    }

    /// Block until resolved or `timeout` elapses; `None` on timeout
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Some(outcome.clone());
            }
            if self.resolved.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_all_waiters_see_first_outcome() {
        let completion = Arc::new(Completion::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&completion);
                thread::spawn(move || c.wait())
            })
            .collect();

        let cause = Arc::new(Error::datasource("offline"));
        assert!(completion.resolve(Err(Arc::clone(&cause))));
        assert!(!completion.resolve(Ok(())));

        for waiter in waiters {
            let err = waiter.join().unwrap().unwrap_err();
            assert!(Arc::ptr_eq(&err, &cause));
        }
        assert!(completion.wait().is_err());
    }

    #[test]
    fn test_wait_timeout() {
        let completion = Completion::new();
        assert!(completion.wait_timeout(Duration::from_millis(20)).is_none());

        assert!(completion.resolve(Ok(())));
        assert!(matches!(completion.wait_timeout(Duration::from_millis(20)), Some(Ok(()))));
    }
}
