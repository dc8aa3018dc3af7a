use crate::lexicon::Key;
use crate::payload::Payload;

/// Stable handle to a cache entry. Handles of destructed entries are
/// detected and rejected, even after their slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Read-only; any number of handles.
    Unlocked,
    /// Checked out for update, nothing changed yet.
    LockedClean,
    /// Checked out for update and marked modified.
    LockedDirty,
    /// A private snapshot, never reachable through key resolution.
    PendingCopy,
}

impl LockState {
    /// Held by a writer.
    pub fn is_locked(self) -> bool {
        matches!(self, LockState::LockedClean | LockState::LockedDirty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Known,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    /// Neighbour toward the most recently admitted end.
    pub up: Option<EntryId>,
    /// Neighbour toward the least recently admitted end.
    pub next: Option<EntryId>,
}

/// Which list owns an entry. An entry is in at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Detached,
    Known(Link),
    Locked(Link),
}

impl Membership {
    pub fn kind(&self) -> Option<ListKind> {
        match self {
            Membership::Detached => None,
            Membership::Known(_) => Some(ListKind::Known),
            Membership::Locked(_) => Some(ListKind::Locked),
        }
    }

    pub fn link(&self) -> Option<&Link> {
        match self {
            Membership::Detached => None,
            Membership::Known(link) | Membership::Locked(link) => Some(link),
        }
    }

    pub fn link_mut(&mut self) -> Option<&mut Link> {
        match self {
            Membership::Detached => None,
            Membership::Known(link) | Membership::Locked(link) => Some(link),
        }
    }
}

#[derive(Debug)]
pub struct CacheEntry {
    pub(crate) key: Key,
    pub(crate) payload: Payload,
    /// Budget units charged for `payload` the last time it was measured.
    pub(crate) cost: usize,
    pub(crate) ref_count: u32,
    pub(crate) lock: LockState,
    /// Committed modifications not yet written back.
    pub(crate) modified: u32,
    pub(crate) membership: Membership,
}

impl CacheEntry {
    pub(crate) fn new(key: Key, payload: Payload) -> Self {
        Self {
            key,
            cost: payload.cost(),
            payload,
            ref_count: 0,
            lock: LockState::Unlocked,
            modified: 0,
            membership: Membership::Detached,
        }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn lock(&self) -> LockState {
        self.lock
    }

    pub fn is_dirty(&self) -> bool {
        self.modified > 0
    }
}
