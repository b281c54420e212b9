//! The atomic unit of the store: [`Token`], its [`Role`], and the
//! [`ChunkTuple`] identity chunks are grouped and pruned by.

use serde::{Deserialize, Serialize};

/// Conversational role a token was produced under.
///
/// Ordering matters: pruning ties are broken `system < user < assistant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// `(turn_id, sentence_id, role)` — the unit of pruning, indexing, and
/// resurrection. Chunk membership is immutable once a token is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkTuple {
    pub turn_id: u64,
    pub sentence_id: u32,
    pub role: Role,
}

impl ChunkTuple {
    pub fn new(turn_id: u64, sentence_id: u32, role: Role) -> Self {
        Self {
            turn_id,
            sentence_id,
            role,
        }
    }

    /// A chunk is an anchor iff it opens its turn+role (`sentence_id == 0`).
    pub fn is_anchor(&self) -> bool {
        self.sentence_id == 0
    }

    /// `true` for the one chunk that is never automatically pruned.
    pub fn is_system_root(&self) -> bool {
        self.turn_id == 0 && self.role == Role::System
    }

    /// The anchor of this chunk's own `(turn_id, role)`.
    pub fn same_turn_anchor(&self) -> ChunkTuple {
        ChunkTuple::new(self.turn_id, 0, self.role)
    }

    /// The anchor of the paired turn+role: for an assistant chunk in turn
    /// `t`, the user anchor of turn `t - 1`; for a user chunk in turn `t`,
    /// the user anchor of turn `t` itself.
    ///
    /// Returns `None` for system chunks, and for assistant chunks in turn 0
    /// (no preceding user turn can exist).
    pub fn cross_turn_anchor(&self) -> Option<ChunkTuple> {
        match self.role {
            Role::System => None,
            Role::Assistant => {
                let paired_turn = self.turn_id.checked_sub(1)?;
                Some(ChunkTuple::new(paired_turn, 0, Role::User))
            }
            Role::User => Some(ChunkTuple::new(self.turn_id, 0, Role::User)),
        }
    }

    /// The anchor this chunk is paired with for atomic anchor pruning: the
    /// user anchor of turn `N` pairs with the assistant anchor of turn
    /// `N + 1`.
    pub fn paired_anchor(&self) -> Option<ChunkTuple> {
        if !self.is_anchor() {
            return None;
        }
        match self.role {
            Role::System => None,
            Role::User => Some(ChunkTuple::new(self.turn_id + 1, 0, Role::Assistant)),
            Role::Assistant => {
                let paired_turn = self.turn_id.checked_sub(1)?;
                Some(ChunkTuple::new(paired_turn, 0, Role::User))
            }
        }
    }
}

/// Atomic conversational unit. Never destroyed, only soft-deleted (moved
/// between the live and dead partitions of the store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub position: u64,
    pub token_id: u32,
    pub text: String,
    pub turn_id: u64,
    pub sentence_id: u32,
    pub role: Role,
    pub brightness: i64,
    pub deleted: bool,
    pub brightness_at_deletion: Option<i64>,
    pub pinned: bool,
}

impl Token {
    /// Construct a freshly-created, fail-bright, live token.
    pub fn new(
        position: u64,
        token_id: u32,
        text: String,
        turn_id: u64,
        sentence_id: u32,
        role: Role,
        b0: i64,
    ) -> Self {
        Self {
            position,
            token_id,
            text,
            turn_id,
            sentence_id,
            role,
            brightness: b0,
            deleted: false,
            brightness_at_deletion: None,
            pinned: false,
        }
    }

    pub fn tuple(&self) -> ChunkTuple {
        ChunkTuple::new(self.turn_id, self.sentence_id, self.role)
    }
}
