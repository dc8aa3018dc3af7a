//! Key resolution.
//!
//! Every stored object is addressed by a stable 32-bit [`Key`] whose top byte
//! names its class. The [`Lexicon`] trait is everything the object cache needs
//! to know about keys: which kind of payload a key holds, what it is an alias
//! of, how to print it, and which cache entry currently serves it.

use crate::cache::EntryId;
use crate::codec::Format;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const CLASS_SHIFT: u32 = 24;
const INDEX_MASK: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub u32);

impl Key {
    pub fn new(class: u8, index: u32) -> Self {
        Key(((class as u32) << CLASS_SHIFT) | (index & INDEX_MASK))
    }

    pub fn class(self) -> u8 {
        (self.0 >> CLASS_SHIFT) as u8
    }

    pub fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class(), self.index())
    }
}

/// What kind of object a key refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// Not known to the lexicon at all.
    Unknown,
    /// A name only; never carries a payload.
    Vocabulary,
    /// A structured object tree.
    Tree,
    /// A formatted record array with the given layout.
    Array(Format),
}

impl KeyType {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, KeyType::Tree | KeyType::Array(_))
    }
}

pub trait Lexicon: Send {
    /// The current cache entry serving `key`, if any.
    fn entry_for(&self, key: Key) -> Option<EntryId>;

    fn set_entry_for(&mut self, key: Key, entry: Option<EntryId>);

    fn key_type(&self, key: Key) -> KeyType;

    /// Follows the alias chain of `key` to its end.
    fn alias_of(&self, key: Key) -> Key;

    fn name(&self, key: Key) -> String;

    fn class_name(&self, key: Key) -> String;

    /// `Class:"name"`, the form used in diagnostics.
    fn describe(&self, key: Key) -> String {
        format!("{}:\"{}\"", self.class_name(key), self.name(key))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Word {
    name: String,
    key_type: KeyType,
    alias: Option<Key>,
}

/// A lexicon held entirely in memory, persisted with bincode.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MemoryLexicon {
    classes: HashMap<u8, String>,
    words: HashMap<Key, Word>,
    by_name: HashMap<(u8, String), Key>,
    next_index: HashMap<u8, u32>,
    #[serde(skip)]
    current: HashMap<Key, EntryId>,
}

impl MemoryLexicon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_class(&mut self, class: u8, name: &str) {
        self.classes.insert(class, name.to_string());
    }

    pub fn class_by_name(&self, name: &str) -> Option<u8> {
        self.classes
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(&c, _)| c)
    }

    /// Adds `name` to `class`, returning the existing key if the name is
    /// already known there.
    pub fn add_key(&mut self, class: u8, name: &str, key_type: KeyType) -> Key {
        if let Some(&key) = self.by_name.get(&(class, name.to_string())) {
            return key;
        }

        let next = self.next_index.entry(class).or_insert(1);
        let key = Key::new(class, *next);
        *next += 1;

        self.words.insert(
            key,
            Word {
                name: name.to_string(),
                key_type,
                alias: None,
            },
        );
        self.by_name.insert((class, name.to_string()), key);
        key
    }

    pub fn lookup(&self, class: u8, name: &str) -> Option<Key> {
        self.by_name.get(&(class, name.to_string())).copied()
    }

    /// Parses `Class:name` and looks the key up.
    pub fn lookup_qualified(&self, qualified: &str) -> Option<Key> {
        let (class, name) = qualified.split_once(':')?;
        let class = self.class_by_name(class.trim())?;
        self.lookup(class, name.trim().trim_matches('"'))
    }

    pub fn set_alias(&mut self, key: Key, target: Key) {
        if let Some(word) = self.words.get_mut(&key) {
            word.alias = Some(target);
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create lexicon file: {:?}", path))?;
        bincode::serialize_into(BufWriter::new(file), self).context("Failed to write lexicon")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open lexicon file: {:?}", path))?;
        let lexicon = bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("Failed to read lexicon: {:?}", path))?;
        Ok(lexicon)
    }
}

impl Lexicon for MemoryLexicon {
    fn entry_for(&self, key: Key) -> Option<EntryId> {
        self.current.get(&key).copied()
    }

    fn set_entry_for(&mut self, key: Key, entry: Option<EntryId>) {
        match entry {
            Some(id) => {
                self.current.insert(key, id);
            }
            None => {
                self.current.remove(&key);
            }
        }
    }

    fn key_type(&self, key: Key) -> KeyType {
        self.words
            .get(&key)
            .map(|w| w.key_type.clone())
            .unwrap_or(KeyType::Unknown)
    }

    fn alias_of(&self, key: Key) -> Key {
        let mut key = key;
        // A chain can never be longer than the lexicon itself.
        for _ in 0..=self.words.len() {
            match self.words.get(&key).and_then(|w| w.alias) {
                Some(target) if target != key => key = target,
                _ => return key,
            }
        }
        panic!("Alias cycle detected at {}", self.describe(key));
    }

    fn name(&self, key: Key) -> String {
        self.words
            .get(&key)
            .map(|w| w.name.clone())
            .unwrap_or_else(|| format!("#{}", key.index()))
    }

    fn class_name(&self, key: Key) -> String {
        self.classes
            .get(&key.class())
            .cloned()
            .unwrap_or_else(|| format!("class{}", key.class()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_packing() {
        let key = Key::new(7, 1234);
        assert_eq!(key.class(), 7);
        assert_eq!(key.index(), 1234);
        assert_eq!(key.to_string(), "7#1234");
    }

    #[test]
    fn test_add_and_lookup() {
        let mut lex = MemoryLexicon::new();
        lex.define_class(2, "Gene");

        let a = lex.add_key(2, "unc-32", KeyType::Tree);
        let b = lex.add_key(2, "unc-33", KeyType::Tree);
        assert_ne!(a, b);
        assert_eq!(lex.add_key(2, "unc-32", KeyType::Tree), a);

        assert_eq!(lex.lookup(2, "unc-33"), Some(b));
        assert_eq!(lex.lookup_qualified("Gene:\"unc-32\""), Some(a));
        assert_eq!(lex.describe(a), "Gene:\"unc-32\"");
        assert_eq!(lex.key_type(a), KeyType::Tree);
        assert_eq!(lex.key_type(Key::new(2, 99)), KeyType::Unknown);
    }

    #[test]
    fn test_alias_chain() {
        let mut lex = MemoryLexicon::new();
        let a = lex.add_key(1, "a", KeyType::Tree);
        let b = lex.add_key(1, "b", KeyType::Tree);
        let c = lex.add_key(1, "c", KeyType::Tree);
        lex.set_alias(a, b);
        lex.set_alias(b, c);

        assert_eq!(lex.alias_of(a), c);
        assert_eq!(lex.alias_of(c), c);
    }

    #[test]
    #[should_panic(expected = "Alias cycle")]
    fn test_alias_cycle_is_fatal() {
        let mut lex = MemoryLexicon::new();
        let a = lex.add_key(1, "a", KeyType::Tree);
        let b = lex.add_key(1, "b", KeyType::Tree);
        lex.set_alias(a, b);
        lex.set_alias(b, a);
        lex.alias_of(a);
    }

    #[test]
    fn test_persistence() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("lexicon.bin");

        let key = {
            let mut lex = MemoryLexicon::new();
            lex.define_class(3, "Map");
            let format: Format = "kif".parse()?;
            let key = lex.add_key(3, "chrIII", KeyType::Array(format));
            lex.save(&path)?;
            key
        };

        let lex = MemoryLexicon::load(&path)?;
        assert_eq!(lex.lookup(3, "chrIII"), Some(key));
        assert_eq!(lex.key_type(key), KeyType::Array("kif".parse()?));
        assert_eq!(lex.entry_for(key), None);

        Ok(())
    }
}
