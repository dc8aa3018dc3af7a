//! Admission and eviction.
//!
//! Every entry that (re)enters the known list goes in at the top and then
//! the list is swept from its least recently admitted end until usage fits
//! the budget again. Sweeps escalate:
//!
//! 1. [`Pass::Cheap`] drops unreferenced clean entries and skips dirty ones.
//! 2. [`Pass::WriteBack`] also writes dirty entries back before dropping them.
//! 3. [`Pass::Aggressive`] writes back and drops anything unreferenced.
//!
//! A pass gives way to the next once it has skipped too many entries or it
//! reaches the entry being admitted, which is never a victim of its own
//! admission.

use super::entry::{EntryId, ListKind};
use super::error::CacheResult;
use super::ObjectCache;
use crate::lexicon::{Key, Lexicon};
use crate::storage::BlockStore;
use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Cheap,
    WriteBack,
    Aggressive,
}

impl<L: Lexicon, S: BlockStore> ObjectCache<L, S> {
    /// Links `id` in at the top of the known list and brings usage back under
    /// the limit. Always ends with a block store flush.
    pub(crate) fn admit(&mut self, id: EntryId) -> CacheResult<()> {
        self.lists.push_top(&mut self.pool, ListKind::Known, id);

        let shrunk = self.shrink();
        let flushed = self.store.flush();
        shrunk?;
        flushed?;
        Ok(())
    }

    fn shrink(&mut self) -> CacheResult<()> {
        let batch = self.config.flush_batch.max(1);
        let mut pass = Pass::Cheap;
        let mut written = 0;

        'sweep: loop {
            let mut skipped = 1;
            let mut cursor = self.lists.known.end;

            while let Some(victim) = cursor {
                if self.usage <= self.limit {
                    return Ok(());
                }

                let entry = self
                    .pool
                    .get(victim)
                    .unwrap_or_else(|| panic!("Known list holds a bad cache handle"));
                cursor = entry.membership.link().and_then(|l| l.up);
                let (ref_count, dirty) = (entry.ref_count, entry.is_dirty());

                if cursor.is_none() {
                    // Only the newcomer is left.
                    pass = match pass {
                        Pass::Cheap => Pass::WriteBack,
                        Pass::WriteBack => {
                            self.store.flush()?;
                            Pass::Aggressive
                        }
                        Pass::Aggressive => {
                            self.relieve_starvation();
                            Pass::Aggressive
                        }
                    };
                    debug!("Cache still over budget, sweeping again in {:?} mode", pass);
                    continue 'sweep;
                }

                if skipped > batch || 4 * skipped > self.lists.known.len {
                    match pass {
                        Pass::Cheap => {
                            pass = Pass::WriteBack;
                            continue 'sweep;
                        }
                        Pass::WriteBack => {
                            self.store.flush()?;
                            pass = Pass::Aggressive;
                            continue 'sweep;
                        }
                        Pass::Aggressive => {}
                    }
                }

                if ref_count > 0 {
                    continue;
                }
                if dirty {
                    match pass {
                        Pass::Cheap => {
                            skipped += 1;
                            continue;
                        }
                        Pass::WriteBack => skipped += 1,
                        Pass::Aggressive => {}
                    }
                    self.store_entry(victim)?;
                    written += 1;
                    if written % batch == 0 {
                        self.store.flush()?;
                    }
                }

                self.lists.remove(&mut self.pool, victim);
                self.destruct(victim);
                self.counters.evicted += 1;
            }
            return Ok(());
        }
    }

    /// Called when even an aggressive sweep cannot get under the limit.
    ///
    /// With only a handful of entries known, a few very large objects are to
    /// blame and the limit is doubled. Otherwise too many entries are held
    /// and that is a caller bug.
    fn relieve_starvation(&mut self) {
        if self.lists.known.len < self.config.starvation_floor {
            self.limit = self.limit.saturating_mul(2);
            self.counters.limit_doublings += 1;
            info!(
                "A few large objects fill the cache, raising its limit to {}",
                self.limit
            );
            return;
        }

        let culprit = self
            .held_key()
            .map(|key| self.lexicon.describe(key))
            .unwrap_or_default();
        panic!(
            "Object cache is full: {} known and {} locked entries use {} of {}. \
             Every get needs a release; {} is still held",
            self.lists.known.len,
            self.lists.locked.len,
            self.usage,
            self.limit,
            culprit
        );
    }

    /// The least recently admitted entry somebody still holds.
    fn held_key(&self) -> Option<Key> {
        self.lists
            .iter(&self.pool, ListKind::Known)
            .filter_map(|id| self.pool.get(id))
            .filter(|e| e.ref_count > 0)
            .last()
            .or_else(|| {
                self.lists
                    .iter(&self.pool, ListKind::Locked)
                    .filter_map(|id| self.pool.get(id))
                    .last()
            })
            .map(|e| e.key)
    }
}
