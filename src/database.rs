use crate::cache::{EntryId, ObjectCache, StatusSnapshot};
use crate::codec;
use crate::config::CacheConfig;
use crate::lexicon::{Key, Lexicon, MemoryLexicon};
use crate::payload::Payload;
use crate::storage::FileBlockStore;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type FileCache = ObjectCache<MemoryLexicon, FileBlockStore>;

const OBJECTS_FILE: &str = "objects.db";
const LEXICON_FILE: &str = "lexicon.bin";

/// An object database on disk: a lexicon, a block store and the object cache
/// in front of them.
pub struct Database {
    cache: Arc<Mutex<FileCache>>,
    dir: PathBuf,
}

impl Database {
    /// Create a new database in `dir`
    pub fn create(dir: &Path, config: CacheConfig) -> Result<Self> {
        let objects = dir.join(OBJECTS_FILE);
        if objects.exists() {
            bail!("Database already exists at {:?}", dir);
        }
        std::fs::create_dir_all(dir).context("Failed to create data directory")?;

        let store = FileBlockStore::create(&objects)?;
        let lexicon = MemoryLexicon::new();
        lexicon.save(&dir.join(LEXICON_FILE))?;

        info!("Created database at {:?}", dir);
        Ok(Self::assemble(dir, config, lexicon, store))
    }

    /// Open an existing database in `dir`
    pub fn open(dir: &Path, config: CacheConfig) -> Result<Self> {
        let objects = dir.join(OBJECTS_FILE);
        if !objects.exists() {
            bail!("Database does not exist at {:?}", dir);
        }

        let store = FileBlockStore::open(&objects)?;
        let lexicon = MemoryLexicon::load(&dir.join(LEXICON_FILE))?;

        info!(
            "Opened database at {:?} with {} keys and {} stored objects",
            dir,
            lexicon.len(),
            store.object_count()
        );
        Ok(Self::assemble(dir, config, lexicon, store))
    }

    fn assemble(
        dir: &Path,
        config: CacheConfig,
        lexicon: MemoryLexicon,
        store: FileBlockStore,
    ) -> Self {
        Self {
            cache: Arc::new(Mutex::new(ObjectCache::new(config, lexicon, store))),
            dir: dir.to_path_buf(),
        }
    }

    /// Runs `f` against the lexicon, e.g. to define classes and keys.
    pub fn lexicon<R>(&self, f: impl FnOnce(&mut MemoryLexicon) -> R) -> R {
        f(self.cache.lock().lexicon_mut())
    }

    /// Read-only access to the object behind `key`, following aliases.
    pub fn read(&self, key: Key) -> Result<ObjectReadGuard> {
        let mut cache = self.cache.lock();
        let key = cache.lexicon().alias_of(key);
        let id = cache.get(key)?;
        Ok(ObjectReadGuard {
            cache: Arc::clone(&self.cache),
            id,
        })
    }

    /// Checks `key` out for update. `None` if somebody else holds it.
    pub fn update(&self, key: Key) -> Result<Option<ObjectWriteGuard>> {
        let mut cache = self.cache.lock();
        let key = cache.lexicon().alias_of(key);
        Ok(cache
            .begin_update(key, false)?
            .map(|id| ObjectWriteGuard {
                cache: Arc::clone(&self.cache),
                id,
                committed: false,
            }))
    }

    pub fn status(&self) -> StatusSnapshot {
        self.cache.lock().status()
    }

    /// Write every modified object and the lexicon to disk
    pub fn flush(&self) -> Result<usize> {
        let mut cache = self.cache.lock();
        let stored = cache.save_all()?;
        cache.lexicon().save(&self.dir.join(LEXICON_FILE))?;
        Ok(stored)
    }

    /// Human-readable listing of a formatted array.
    pub fn dump(&self, key: Key) -> Result<String> {
        let guard = self.read(key)?;
        let cache = self.cache.lock();
        match cache.payload(guard.id) {
            Payload::Array(array) => Ok(codec::dump(array, cache.lexicon())),
            Payload::Tree(_) => bail!("{} is not an array", cache.lexicon().describe(key)),
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort flush on drop
        if let Err(e) = self.flush() {
            warn!("Failed to flush database at {:?}: {:#}", self.dir, e);
        }
    }
}

/// A read handle; released when dropped.
pub struct ObjectReadGuard {
    cache: Arc<Mutex<FileCache>>,
    id: EntryId,
}

impl ObjectReadGuard {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn with<R>(&self, f: impl FnOnce(&Payload) -> R) -> R {
        f(self.cache.lock().payload(self.id))
    }
}

impl Drop for ObjectReadGuard {
    fn drop(&mut self) {
        if let Err(e) = self.cache.lock().release(self.id) {
            warn!("Failed to release cache entry: {}", e);
        }
    }
}

/// A write handle. Changes only become visible through [`commit`]; dropping
/// the guard discards them.
///
/// [`commit`]: ObjectWriteGuard::commit
pub struct ObjectWriteGuard {
    cache: Arc<Mutex<FileCache>>,
    id: EntryId,
    committed: bool,
}

impl ObjectWriteGuard {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn with<R>(&self, f: impl FnOnce(&Payload) -> R) -> R {
        f(self.cache.lock().payload(self.id))
    }

    /// Mutates the payload and marks the object modified.
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut Payload) -> R) -> R {
        let mut cache = self.cache.lock();
        let result = f(cache.payload_mut(self.id));
        cache.mark_modified(self.id);
        result
    }

    pub fn commit(mut self) -> Result<()> {
        self.committed = true;
        self.cache.lock().save(self.id)?;
        Ok(())
    }
}

impl Drop for ObjectWriteGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = self.cache.lock().release(self.id) {
            warn!("Failed to release cache entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FieldValue, Format};
    use crate::lexicon::KeyType;
    use crate::payload::Value;
    use tempfile::tempdir;

    fn define(db: &Database, name: &str) -> Key {
        db.lexicon(|lex| {
            if lex.class_by_name("Sequence").is_none() {
                lex.define_class(1, "Sequence");
            }
            lex.add_key(1, name, KeyType::Tree)
        })
    }

    fn title(guard: &ObjectReadGuard, tag: Key) -> Option<Value> {
        guard.with(|payload| {
            payload
                .as_tree()
                .and_then(|tree| tree.get(tag))
                .map(|values| values[0].clone())
        })
    }

    #[test]
    fn test_create_duplicate_database() -> Result<()> {
        let dir = tempdir()?;
        let _db = Database::create(dir.path(), CacheConfig::default())?;

        let result = Database::create(dir.path(), CacheConfig::default());
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("already exists"));
        Ok(())
    }

    #[test]
    fn test_open_nonexistent_database() -> Result<()> {
        let dir = tempdir()?;
        let result = Database::open(&dir.path().join("missing"), CacheConfig::default());
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("does not exist"));
        Ok(())
    }

    #[test]
    fn test_objects_survive_reopen() -> Result<()> {
        let dir = tempdir()?;
        let tag = Key::new(2, 1);

        let key = {
            let db = Database::create(dir.path(), CacheConfig::default())?;
            let key = define(&db, "seq1");
            let mut guard = db.update(key)?.unwrap();
            guard.with_mut(|payload| {
                payload
                    .as_tree_mut()
                    .unwrap()
                    .set(tag, vec![Value::Text("hello".into())]);
            });
            guard.commit()?;
            assert_eq!(db.flush()?, 1);
            key
        };

        let db = Database::open(dir.path(), CacheConfig::default())?;
        assert_eq!(db.lexicon(|lex| lex.lookup(1, "seq1")), Some(key));
        let guard = db.read(key)?;
        assert_eq!(title(&guard, tag), Some(Value::Text("hello".into())));
        Ok(())
    }

    #[test]
    fn test_dropped_write_guard_discards_changes() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::create(dir.path(), CacheConfig::default())?;
        let key = define(&db, "seq1");
        let tag = Key::new(2, 1);

        {
            let mut guard = db.update(key)?.unwrap();
            guard.with_mut(|payload| {
                payload.as_tree_mut().unwrap().set(tag, vec![Value::Int(1)]);
            });
        }

        let guard = db.read(key)?;
        assert_eq!(title(&guard, tag), None);
        assert!(db.update(key)?.is_some());
        Ok(())
    }

    #[test]
    fn test_update_is_exclusive() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::create(dir.path(), CacheConfig::default())?;
        let key = define(&db, "seq1");

        let guard = db.update(key)?;
        assert!(guard.is_some());
        assert!(db.update(key)?.is_none());
        drop(guard);
        assert!(db.update(key)?.is_some());
        Ok(())
    }

    #[test]
    fn test_read_follows_alias() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::create(dir.path(), CacheConfig::default())?;
        let target = define(&db, "seq1");
        let alias = define(&db, "old-name");
        db.lexicon(|lex| lex.set_alias(alias, target));

        let guard = db.read(alias)?;
        let status = db.status();
        assert_eq!(status.resident, 1);
        assert!(guard.with(|payload| payload.as_tree().is_some()));
        drop(guard);
        assert_eq!(db.status().unlocked, 1);
        Ok(())
    }

    #[test]
    fn test_dump_array() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::create(dir.path(), CacheConfig::default())?;
        let seq = define(&db, "seq1");
        let table = db.lexicon(|lex| {
            lex.add_key(1, "table", KeyType::Array(Format::parse("ki").unwrap()))
        });

        let mut guard = db.update(table)?.unwrap();
        guard.with_mut(|payload| {
            payload
                .as_array_mut()
                .unwrap()
                .push(&[FieldValue::Key(seq), FieldValue::Int(42)]);
        });
        guard.commit()?;

        let text = db.dump(table)?;
        assert!(text.contains("Sequence : \"seq1\""));
        assert!(text.contains(" 42 "));

        assert!(db.dump(seq).is_err());
        Ok(())
    }
}
