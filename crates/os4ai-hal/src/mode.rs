//! Process-wide operating mode: real hardware or simulated (cloud).
//!
//! The mode is read once per poll cycle via [`ModeSwitch::snapshot`] and the
//! resulting [`OperatingMode`] value is carried through that cycle, so a
//! toggle mid-poll only takes effect on the next cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    Hardware,
    Simulated,
}

impl OperatingMode {
    pub fn is_simulated(&self) -> bool {
        matches!(self, OperatingMode::Simulated)
    }
}

/// Shared handle on the mode flag.  Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct ModeSwitch {
    simulated: Arc<AtomicBool>,
}

impl ModeSwitch {
    pub fn new(simulated: bool) -> Self {
        Self {
            simulated: Arc::new(AtomicBool::new(simulated)),
        }
    }

    pub fn snapshot(&self) -> OperatingMode {
        if self.simulated.load(Ordering::Acquire) {
            OperatingMode::Simulated
        } else {
            OperatingMode::Hardware
        }
    }

    /// Set the flag and return the previous mode.
    pub fn set(&self, simulated: bool) -> OperatingMode {
        if self.simulated.swap(simulated, Ordering::AcqRel) {
            OperatingMode::Simulated
        } else {
            OperatingMode::Hardware
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let a = ModeSwitch::new(false);
        let b = a.clone();
        assert_eq!(b.set(true), OperatingMode::Hardware);
        assert_eq!(a.snapshot(), OperatingMode::Simulated);
    }

    #[test]
    fn snapshot_is_a_value() {
        let switch = ModeSwitch::new(true);
        let taken = switch.snapshot();
        switch.set(false);
        assert!(taken.is_simulated());
        assert!(!switch.snapshot().is_simulated());
    }
}
