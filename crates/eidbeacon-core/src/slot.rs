//! Slot addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of broadcast slots.
pub const MAX_SLOTS: usize = 5;

/// Index of a broadcast slot, always in `[0, MAX_SLOTS)`.
///
/// Raw values from a peer are clamped rather than rejected: an out-of-range
/// index addresses the last slot.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "u8", into = "u8")]
pub struct SlotIndex(u8);

impl SlotIndex {
    /// First slot; carries the global advertising interval.
    pub const FIRST: Self = Self(0);

    /// Last slot.
    pub const LAST: Self = Self(MAX_SLOTS as u8 - 1);

    /// Index for `raw`, clamped to the last slot.
    #[must_use]
    pub const fn clamped(raw: u8) -> Self {
        if raw as usize >= MAX_SLOTS { Self::LAST } else { Self(raw) }
    }

    /// Position in slot arrays.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Wire value.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self.0
    }

    /// Every slot in order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..MAX_SLOTS as u8).map(Self)
    }
}

impl From<u8> for SlotIndex {
    fn from(raw: u8) -> Self {
        Self::clamped(raw)
    }
}

impl From<SlotIndex> for u8 {
    fn from(slot: SlotIndex) -> Self {
        slot.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
