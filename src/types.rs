//! Core types shared across the crate

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of hash slots in a clustered backplane store.
pub const CLUSTER_SLOTS: u16 = 16384;

/// Inclusive range of cluster hash slots owned by one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// The full keyspace, used when the store is not clustered.
    pub fn full() -> Self {
        Self::new(0, CLUSTER_SLOTS - 1)
    }

    pub fn contains(&self, slot: u16) -> bool {
        self.start <= slot && slot <= self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Position in a paged listing.
///
/// `Initial` is distinct from the empty string the server returns on its last
/// page, so a loop can tell "not started" from "finished".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageToken {
    #[default]
    Initial,
    Next(String),
}

impl PageToken {
    /// Token as it goes on the wire. The first request carries an empty token.
    pub fn as_wire(&self) -> &str {
        match self {
            PageToken::Initial => "",
            PageToken::Next(token) => token,
        }
    }

    /// Token to continue from, or `None` once the server reports the last page.
    pub fn from_response(next_page_token: String) -> Option<Self> {
        if next_page_token.is_empty() {
            None
        } else {
            Some(PageToken::Next(next_page_token))
        }
    }
}
