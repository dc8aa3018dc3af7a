//! The secondary object cache.
//!
//! Decoded objects are kept in [`CacheEntry`] records handed out through
//! [`EntryId`] handles. Entries sit in one of two lists:
//!
//! - **known**: unlocked entries, evictable once nobody references them
//! - **locked**: entries checked out for update, and private snapshots
//!
//! Per key, the lexicon points at exactly one *current* entry. Writers work
//! either on the current entry itself or on a copy, and committing makes their
//! entry current, turning the one it replaces into a lame duck.
//!
//! Broken caller contracts panic. Only load, codec and block store failures
//! come back as [`CacheError`].

pub mod entry;
pub mod error;
pub mod eviction;
pub mod list;
pub mod pool;
pub mod status;

pub use entry::{CacheEntry, EntryId, ListKind, LockState};
pub use error::{CacheError, CacheResult};
pub use status::{Counters, StatusSnapshot};

use crate::config::{CacheConfig, LoadFailurePolicy};
use crate::lexicon::{Key, KeyType, Lexicon};
use crate::payload::Payload;
use crate::storage::BlockStore;
use entry::Membership;
use list::EntryLists;
use log::{debug, info, warn};
use pool::EntryPool;
use std::collections::HashSet;

pub struct ObjectCache<L: Lexicon, S: BlockStore> {
    config: CacheConfig,
    lexicon: L,
    store: S,
    pool: EntryPool,
    lists: EntryLists,
    locked_keys: HashSet<Key>,
    usage: usize,
    limit: usize,
    counters: Counters,
}

impl<L: Lexicon, S: BlockStore> ObjectCache<L, S> {
    pub fn new(config: CacheConfig, lexicon: L, store: S) -> Self {
        Self {
            pool: EntryPool::new(config.pool_block),
            lists: EntryLists::default(),
            locked_keys: HashSet::new(),
            usage: 0,
            limit: config.memory_limit.max(1),
            counters: Counters::default(),
            config,
            lexicon,
            store,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn lexicon(&self) -> &L {
        &self.lexicon
    }

    pub fn lexicon_mut(&mut self) -> &mut L {
        &mut self.lexicon
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Budget units charged by every resident entry.
    pub fn usage(&self) -> usize {
        self.usage
    }

    /// Current budget; may have been doubled since construction.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The entry key resolution currently yields for `key`.
    pub fn current(&self, key: Key) -> Option<EntryId> {
        self.lexicon.entry_for(key)
    }

    pub fn entry(&self, id: EntryId) -> &CacheEntry {
        self.checked(id, "entry")
    }

    pub fn payload(&self, id: EntryId) -> &Payload {
        &self.checked(id, "payload").payload
    }

    /// Mutable access for writers and private copies.
    pub fn payload_mut(&mut self, id: EntryId) -> &mut Payload {
        let (key, lock) = self.state(id, "payload_mut");
        if lock == LockState::Unlocked {
            panic!(
                "payload_mut called on a read-only handle for {}",
                self.describe(key)
            );
        }
        &mut self.checked_mut(id, "payload_mut").payload
    }

    pub fn is_locked(&self, id: EntryId) -> bool {
        self.checked(id, "is_locked").lock.is_locked()
    }

    pub fn is_modified(&self, id: EntryId) -> bool {
        self.checked(id, "is_modified").lock == LockState::LockedDirty
    }

    /// Read-only handle on `key`.
    ///
    /// An unlocked current entry is shared. If a writer holds the key but has
    /// not changed anything, the reader gets a copy; if the writer has marked
    /// changes, the object is loaded afresh so uncommitted state never leaks.
    pub fn get(&mut self, key: Key) -> CacheResult<EntryId> {
        self.create(key, false)
    }

    /// A private snapshot of `key` in the locked list. It never becomes the
    /// current entry and is discarded on release.
    ///
    /// Isolated snapshots are read-side copies: any number may coexist with
    /// each other and with a writer, and none of them holds the key's update
    /// lock, so `begin_update` still succeeds while they are out.
    pub fn get_isolated(&mut self, key: Key) -> CacheResult<EntryId> {
        self.create(key, true)
    }

    fn create(&mut self, key: Key, isolated: bool) -> CacheResult<EntryId> {
        self.expect_cacheable(key, "get");
        self.counters.served += 1;

        let current = self
            .lexicon
            .entry_for(key)
            .map(|id| (id, self.checked(id, "get").lock));

        let id = match current {
            Some((id, LockState::Unlocked)) if !isolated => {
                self.checked_mut(id, "get").ref_count += 1;
                self.lists.remove(&mut self.pool, id);
                if let Err(e) = self.admit(id) {
                    self.drop_reference(id);
                    return Err(e);
                }
                return Ok(id);
            }
            Some((id, LockState::Unlocked | LockState::LockedClean)) => self.copy_entry(id),
            _ => self.load_entry(key)?,
        };
        self.check(key, id);

        let entry = self.checked_mut(id, "get");
        entry.ref_count = 1;
        if isolated {
            entry.lock = LockState::PendingCopy;
            self.lists.push_top(&mut self.pool, ListKind::Locked, id);
            return Ok(id);
        }

        entry.lock = LockState::Unlocked;
        self.lexicon.set_entry_for(key, Some(id));
        if let Err(e) = self.admit(id) {
            self.drop_reference(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Checks `key` out for update. Returns `Ok(None)` if another writer
    /// already holds it.
    ///
    /// An idle, unmodified current entry is taken over directly; otherwise
    /// the writer works on a copy. `in_xref` allows taking over an entry that
    /// still holds unflushed modifications.
    pub fn begin_update(&mut self, key: Key, in_xref: bool) -> CacheResult<Option<EntryId>> {
        self.expect_cacheable(key, "begin_update");

        if self.locked_keys.contains(&key) {
            warn!("Sorry, {} is already locked", self.describe(key));
            return Ok(None);
        }

        let id = match self.lexicon.entry_for(key) {
            Some(id) => {
                let entry = self.checked(id, "begin_update");
                let idle = entry.ref_count == 0
                    && (!entry.is_dirty() || in_xref)
                    && entry.membership.kind() == Some(ListKind::Known);
                if idle {
                    self.lists.remove(&mut self.pool, id);
                    id
                } else {
                    self.copy_entry(id)
                }
            }
            None => {
                let id = self.load_entry(key)?;
                self.lexicon.set_entry_for(key, Some(id));
                id
            }
        };
        self.check(key, id);

        self.locked_keys.insert(key);
        let entry = self.checked_mut(id, "begin_update");
        entry.ref_count = 1;
        entry.lock = LockState::LockedClean;
        self.lists.push_top(&mut self.pool, ListKind::Locked, id);

        self.counters.served += 1;
        Ok(Some(id))
    }

    /// Flags a writer's entry as changed so that committing it counts.
    pub fn mark_modified(&mut self, id: EntryId) {
        let (key, lock) = self.state(id, "mark_modified");
        match lock {
            LockState::Unlocked => panic!(
                "mark_modified called on cache entry {} that is not locked",
                self.describe(key)
            ),
            LockState::LockedClean => self.checked_mut(id, "mark_modified").lock = LockState::LockedDirty,
            LockState::LockedDirty | LockState::PendingCopy => {}
        }
    }

    /// Commits a writer's entry: it becomes the current entry for its key and
    /// returns to the known list.
    pub fn save(&mut self, id: EntryId) -> CacheResult<()> {
        let (key, lock) = self.state(id, "save");
        if !lock.is_locked() {
            panic!(
                "Attempt to save an unlocked cache entry {}",
                self.describe(key)
            );
        }
        if lock == LockState::LockedDirty {
            self.counters.saved += 1;
        }

        self.unlock_key(key);
        self.lists.remove(&mut self.pool, id);
        self.refresh_cost(id);

        if let Some(old) = self.lexicon.entry_for(key).filter(|&old| old != id) {
            // Lame duck: superseded, so never written back.
            let old_entry = self.checked_mut(old, "save");
            old_entry.modified = 0;
            if old_entry.ref_count == 0 {
                if old_entry.membership != Membership::Detached {
                    self.lists.remove(&mut self.pool, old);
                }
                self.destruct(old);
            }
        }

        self.lexicon.set_entry_for(key, Some(id));
        let entry = self.checked_mut(id, "save");
        if lock == LockState::LockedDirty {
            entry.modified += 1;
        }
        entry.lock = LockState::Unlocked;

        let admitted = self.admit(id);
        self.drop_reference(id);
        admitted
    }

    /// Gives a handle back without committing anything.
    ///
    /// A writer that changed nothing returns its entry to the known list;
    /// one that marked changes loses them along with the entry. Entries that
    /// are no longer current are destructed once unreferenced.
    pub fn release(&mut self, id: EntryId) -> CacheResult<()> {
        let (key, lock) = self.state(id, "release");
        let present = self.lexicon.entry_for(key);
        self.drop_reference(id);

        let mut admitted = Ok(());
        match lock {
            LockState::Unlocked => {}
            LockState::LockedClean => {
                self.unlock_key(key);
                self.lists.remove(&mut self.pool, id);
                self.checked_mut(id, "release").lock = LockState::Unlocked;
                self.refresh_cost(id);
                admitted = self.admit(id);
            }
            LockState::LockedDirty | LockState::PendingCopy => {
                if lock == LockState::LockedDirty {
                    self.unlock_key(key);
                }
                self.lists.remove(&mut self.pool, id);
                self.destruct(id);
                return Ok(());
            }
        }

        let superseded = present.is_some_and(|p| p != id);
        if superseded && self.checked(id, "release").ref_count == 0 {
            self.lists.remove(&mut self.pool, id);
            self.destruct(id);
        }
        admitted
    }

    /// Unlocks an entry checked out for update whose handle is already gone.
    ///
    /// # Panics
    /// If the entry is not locked, has been marked modified, or is still
    /// referenced.
    pub fn force_unlock(&mut self, id: EntryId) -> CacheResult<()> {
        let (key, lock) = self.state(id, "force_unlock");
        match lock {
            LockState::LockedClean => {}
            LockState::LockedDirty => panic!(
                "Attempt to force unlock cache entry {} that has been modified",
                self.describe(key)
            ),
            LockState::Unlocked | LockState::PendingCopy => panic!(
                "Attempt to unlock cache entry {} that is already unlocked",
                self.describe(key)
            ),
        }
        let ref_count = self.checked(id, "force_unlock").ref_count;
        if ref_count != 0 {
            panic!(
                "Attempt to unlock cache entry {} that is still in use, ref_count = {}",
                self.describe(key),
                ref_count
            );
        }

        self.unlock_key(key);
        self.lists.remove(&mut self.pool, id);
        self.checked_mut(id, "force_unlock").lock = LockState::Unlocked;
        self.refresh_cost(id);

        if self.lexicon.entry_for(key) == Some(id) {
            self.admit(id)
        } else {
            self.destruct(id);
            Ok(())
        }
    }

    /// Drops the cached entry of an object that has been destroyed.
    ///
    /// # Panics
    /// If the entry is referenced or locked.
    pub fn kill(&mut self, key: Key) {
        let Some(id) = self.lexicon.entry_for(key) else {
            return;
        };
        let entry = self.checked(id, "kill");
        if entry.ref_count > 0 || entry.lock != LockState::Unlocked {
            panic!("Illicit call to kill {}: entry is in use", self.describe(key));
        }

        self.checked_mut(id, "kill").modified = 0;
        self.lists.remove(&mut self.pool, id);
        self.destruct(id);
    }

    /// # Panics
    /// If `id` is not an entry for `key`.
    pub fn check(&self, key: Key, id: EntryId) {
        let found = self.checked(id, "check").key;
        if found != key {
            panic!(
                "Cache mismatch {} != {}",
                self.describe(key),
                self.describe(found)
            );
        }
    }

    /// Replaces a writer's payload with a copy of `source`'s.
    pub fn clone_into(&mut self, source: EntryId, dest: EntryId) {
        let payload = self.checked(source, "clone_into").payload.clone();
        let (key, lock) = self.state(dest, "clone_into");
        if lock == LockState::Unlocked {
            panic!(
                "clone_into target {} is a read-only handle",
                self.describe(key)
            );
        }
        self.checked_mut(dest, "clone_into").payload = payload;
        self.refresh_cost(dest);
    }

    /// Writes every modified known entry back, oldest first, flushing the
    /// block store in batches. Entries stay resident. Returns how many
    /// objects were written.
    pub fn save_all(&mut self) -> CacheResult<usize> {
        let batch = self.config.flush_batch.max(1);
        let mut stored = 0;

        let mut cursor = self.lists.known.end;
        while let Some(id) = cursor {
            let entry = self.checked(id, "save_all");
            cursor = entry.membership.link().and_then(|l| l.up);
            if entry.is_dirty() {
                self.store_entry(id)?;
                stored += 1;
                if stored % batch == 0 {
                    self.store.flush()?;
                }
            }
        }
        self.store.flush()?;

        info!("Saved {} modified objects", stored);
        Ok(stored)
    }

    pub fn status(&self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot {
            allocated: self.pool.capacity(),
            resident: self.pool.live(),
            usage: self.usage,
            limit: self.limit,
            counters: self.counters,
            ..Default::default()
        };

        for id in self.lists.iter(&self.pool, ListKind::Known) {
            let entry = self.checked(id, "status");
            if entry.ref_count > 0 {
                snapshot.locked += 1;
            } else {
                snapshot.unlocked += 1;
            }
            if entry.is_dirty() {
                snapshot.dirty += 1;
            }
        }
        for id in self.lists.iter(&self.pool, ListKind::Locked) {
            snapshot.locked += 1;
            if self.checked(id, "status").is_dirty() {
                snapshot.dirty += 1;
            }
        }
        snapshot
    }

    /// Sorted keys of the known list.
    pub fn known_keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .lists
            .iter(&self.pool, ListKind::Known)
            .map(|id| self.checked(id, "known_keys").key)
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Drops every entry, modified or not, and resets key resolution.
    pub fn clear(&mut self) {
        let resident: Vec<(Key, EntryId, bool)> = self
            .pool
            .iter()
            .map(|(id, e)| (e.key, id, e.is_dirty()))
            .collect();

        let discarded = resident.iter().filter(|(_, _, dirty)| *dirty).count();
        if discarded > 0 {
            warn!("Clearing the cache discards {} modified objects", discarded);
        }

        for (key, id, _) in resident {
            if self.lexicon.entry_for(key) == Some(id) {
                self.lexicon.set_entry_for(key, None);
            }
        }

        self.pool = EntryPool::new(self.config.pool_block);
        self.lists = EntryLists::default();
        self.locked_keys.clear();
        self.usage = 0;
    }

    fn load_entry(&mut self, key: Key) -> CacheResult<EntryId> {
        let key_type = self.lexicon.key_type(key);
        let swap = self.config.disk_byte_order.needs_swap();

        let loaded = match self.store.load_object(key) {
            Ok(Some(bytes)) => {
                Payload::decode(key, &key_type, &bytes, swap).map_err(|e| e.to_string())
            }
            Ok(None) => Ok(Payload::empty(key, &key_type)),
            Err(e) => Err(format!("{:#}", e)),
        };
        let payload = match loaded {
            Ok(payload) => payload,
            Err(reason) => return Err(self.load_failed(key, reason)),
        };

        self.counters.disk_reads += 1;
        debug!("Loaded {} from the block store", self.describe(key));
        Ok(self.insert_entry(CacheEntry::new(key, payload)))
    }

    fn load_failed(&self, key: Key, reason: String) -> CacheError {
        let name = self.describe(key);
        match self.config.load_failure {
            LoadFailurePolicy::Fatal => panic!("Cannot load {} ({}): {}", name, key, reason),
            LoadFailurePolicy::Report => {
                warn!("Cannot load {}: {}", name, reason);
                CacheError::LoadFailed { key, name, reason }
            }
        }
    }

    fn copy_entry(&mut self, id: EntryId) -> EntryId {
        let source = self.checked(id, "copy");
        let mut copy = CacheEntry::new(source.key, source.payload.clone());
        copy.modified = source.modified;
        self.insert_entry(copy)
    }

    fn insert_entry(&mut self, entry: CacheEntry) -> EntryId {
        self.usage += entry.cost;
        self.pool.insert(entry)
    }

    /// Writes a modified current entry back and marks it clean. Lame ducks
    /// are just marked clean. Empty arrays are deleted instead of stored.
    pub(crate) fn store_entry(&mut self, id: EntryId) -> CacheResult<()> {
        let swap = self.config.disk_byte_order.needs_swap();
        let (key, write_back, encoded) = {
            let entry = self.checked(id, "store");
            let write_back = entry.is_dirty() && self.lexicon.entry_for(entry.key) == Some(id);
            let encoded = if write_back && !entry.payload.is_void() {
                Some(entry.payload.encode(swap)?)
            } else {
                None
            };
            (entry.key, write_back, encoded)
        };

        if write_back {
            match encoded {
                Some(bytes) => self.store.store_object(key, &bytes, false)?,
                None => self.store.delete_object(key)?,
            }
            self.counters.disk_writes += 1;
            debug!("Wrote {} back to the block store", self.describe(key));
        }

        self.checked_mut(id, "store").modified = 0;
        Ok(())
    }

    /// Frees an unreferenced, unlinked entry and its payload.
    pub(crate) fn destruct(&mut self, id: EntryId) {
        let entry = self.checked(id, "destruct");
        let key = entry.key;
        if entry.ref_count != 0 {
            panic!(
                "Destructing cache entry {} with {} outstanding references",
                self.describe(key),
                entry.ref_count
            );
        }
        if entry.membership != Membership::Detached {
            panic!(
                "Destructing cache entry {} that is still linked",
                self.describe(key)
            );
        }

        if self.lexicon.entry_for(key) == Some(id) {
            self.lexicon.set_entry_for(key, None);
        }
        if let Some(entry) = self.pool.remove(id) {
            self.usage -= entry.cost;
        }
    }

    fn refresh_cost(&mut self, id: EntryId) {
        let entry = self
            .pool
            .get_mut(id)
            .unwrap_or_else(|| panic!("refresh_cost received a bad cache handle"));
        let cost = entry.payload.cost();
        self.usage = self.usage - entry.cost + cost;
        entry.cost = cost;
    }

    fn drop_reference(&mut self, id: EntryId) {
        let entry = self.checked_mut(id, "release");
        if entry.ref_count == 0 {
            let key = entry.key;
            warn!("Unbalanced release of cache entry {}", self.describe(key));
        } else {
            entry.ref_count -= 1;
        }
    }

    fn unlock_key(&mut self, key: Key) {
        if !self.locked_keys.remove(&key) {
            panic!("Attempt to unlock {} which is not locked", self.describe(key));
        }
    }

    fn expect_cacheable(&self, key: Key, op: &str) {
        match self.lexicon.key_type(key) {
            KeyType::Tree | KeyType::Array(_) => {}
            KeyType::Unknown => panic!("{} called with unknown key {}", op, key),
            KeyType::Vocabulary => panic!(
                "{} called with {}, which has no object",
                op,
                self.describe(key)
            ),
        }
    }

    fn state(&self, id: EntryId, op: &str) -> (Key, LockState) {
        let entry = self.checked(id, op);
        (entry.key, entry.lock)
    }

    fn checked(&self, id: EntryId, op: &str) -> &CacheEntry {
        self.pool
            .get(id)
            .unwrap_or_else(|| panic!("{} received a bad cache handle", op))
    }

    fn checked_mut(&mut self, id: EntryId, op: &str) -> &mut CacheEntry {
        self.pool
            .get_mut(id)
            .unwrap_or_else(|| panic!("{} received a bad cache handle", op))
    }

    fn describe(&self, key: Key) -> String {
        self.lexicon.describe(key)
    }
}
