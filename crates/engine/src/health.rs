//! Store health tracking
//!
//! A tid regression means the backend or its clock is corrupt; once one is
//! observed the store refuses further commits until it is rebuilt. The flag
//! is shared between the poller (which detects) and the facade (which
//! enforces).

use parking_lot::Mutex;
use riverbed_core::{Error, Result, Tid};

/// Shared poisoned-state flag
#[derive(Debug, Default)]
pub struct Health {
    regression: Mutex<Option<(Tid, Tid)>>,
}

impl Health {
    /// Create a healthy flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tid regression; first observation wins
    pub fn poison(&self, last: Tid, observed: Tid) {
        let mut slot = self.regression.lock();
        if slot.is_none() {
            *slot = Some((last, observed));
            tracing::error!(
                last = last.as_u64(),
                observed = observed.as_u64(),
                "tid regression observed; store refuses further commits"
            );
        }
    }

    /// True once a regression has been observed
    pub fn is_poisoned(&self) -> bool {
        self.regression.lock().is_some()
    }

    /// Error out if the store is poisoned
    pub fn check(&self) -> Result<()> {
        match *self.regression.lock() {
            Some((last, observed)) => Err(Error::TidWentBackwards { last, observed }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_by_default() {
        let health = Health::new();
        assert!(!health.is_poisoned());
        health.check().unwrap();
    }

    #[test]
    fn test_poison_sticks_and_first_wins() {
        let health = Health::new();
        health.poison(Tid::from_u64(10), Tid::from_u64(9));
        health.poison(Tid::from_u64(20), Tid::from_u64(19));
        match health.check().unwrap_err() {
            Error::TidWentBackwards { last, observed } => {
                assert_eq!(last, Tid::from_u64(10));
                assert_eq!(observed, Tid::from_u64(9));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
