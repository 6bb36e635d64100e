//! The process-wide "one active match" slot.
//!
//! Only one match may be in `Waiting`/`Running` state at a time. Instead
//! of a bare static, the invariant lives in an [`ActiveMatchSlot`] value
//! the embedding application owns and passes to match creation; acquiring
//! it returns an RAII guard, and a second acquisition fails fast with
//! [`Error::MatchAlreadyRunning`] rather than queuing.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Guarded optional slot tracking whether a match is active.
#[derive(Debug, Clone, Default)]
pub struct ActiveMatchSlot {
    busy: Arc<Mutex<bool>>,
}

impl ActiveMatchSlot {
    /// Fresh, unoccupied slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot, or fails fast when a match is already active.
    pub fn try_acquire(&self) -> Result<ActiveMatchGuard> {
        let mut busy = self.busy.lock().expect("poisoned");
        if *busy {
            return Err(Error::MatchAlreadyRunning);
        }
        *busy = true;
        Ok(ActiveMatchGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    /// Whether a match currently holds the slot.
    pub fn is_busy(&self) -> bool {
        *self.busy.lock().expect("poisoned")
    }
}

/// Releases the slot on drop.
#[derive(Debug)]
pub struct ActiveMatchGuard {
    busy: Arc<Mutex<bool>>,
}

impl Drop for ActiveMatchGuard {
    fn drop(&mut self) {
        *self.busy.lock().expect("poisoned") = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_fast() {
        let slot = ActiveMatchSlot::new();
        let guard = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert!(matches!(
            slot.try_acquire(),
            Err(Error::MatchAlreadyRunning)
        ));
        drop(guard);
        assert!(!slot.is_busy());
        let _second = slot.try_acquire().unwrap();
    }
}
