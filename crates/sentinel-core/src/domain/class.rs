//! Priority classes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer grouping of tasks by urgency; lower is more urgent.
///
/// Engines service a set of classes and the board hands pending jobs out in
/// class order, so class 1 work never queues behind class 3 work on an engine
/// that services both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityClass(u8);

impl PriorityClass {
    pub const REALTIME: PriorityClass = PriorityClass(1);
    pub const ANALYSIS: PriorityClass = PriorityClass(2);
    pub const MAINTENANCE: PriorityClass = PriorityClass(3);

    /// Returns `None` for 0, which is not a valid class.
    pub fn new(value: u8) -> Option<Self> {
        (value >= 1).then_some(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class-{}", self.0)
    }
}
