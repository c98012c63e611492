//! Domain lifecycle state machine
//!
//! The table is pure data. Stores call [`validate_transition`] inside the
//! same atomic operation that writes the new status, so validation and write
//! never separate.
//!
//! ```text
//! pending     -> active | unreachable
//! active      -> active | exhausted | blocked | unreachable
//! exhausted   -> pending | active        (refresh due)
//! blocked     -> pending | active        (cooldown expired)
//! unreachable -> pending | active        (cooldown expired)
//! ```

use crate::error::{Error, Result};
use crate::models::DomainStatus;

/// Statuses reachable from `from` in one step
pub fn allowed_targets(from: DomainStatus) -> &'static [DomainStatus] {
    use DomainStatus::*;
    match from {
        Pending => &[Active, Unreachable],
        Active => &[Active, Exhausted, Blocked, Unreachable],
        Exhausted | Blocked | Unreachable => &[Pending, Active],
    }
}

pub fn can_transition(from: DomainStatus, to: DomainStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Reject any transition outside the table
pub fn validate_transition(from: DomainStatus, to: DomainStatus) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}
