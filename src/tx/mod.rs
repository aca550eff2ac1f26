//! Transaction sessions and generations.

pub mod handover;
pub mod session;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use handover::HandoverToken;
pub use session::Session;
pub(crate) use session::SessionShared;

/// Monotonically increasing identifier of one committed snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}
