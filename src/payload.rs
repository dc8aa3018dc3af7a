//! Payloads held by cache entries.
//!
//! The cache only stores two kinds of object: structured trees and formatted
//! arrays. Each knows how to copy itself, what it costs against the memory
//! budget, and how to go to and from its disk representation.

use crate::codec::{self, CodecError, CodecResult, FormattedArray};
use crate::lexicon::{Key, KeyType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Key(Key),
    Int(i32),
    Float(f32),
    Text(String),
    Time(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub tag: Key,
    pub values: Vec<Value>,
}

/// A decoded object: an ordered list of tagged rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectTree {
    nodes: Vec<TreeNode>,
}

impl ObjectTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, tag: Key) -> Option<&[Value]> {
        self.nodes
            .iter()
            .find(|n| n.tag == tag)
            .map(|n| n.values.as_slice())
    }

    /// Replaces the row for `tag`, appending it if absent.
    pub fn set(&mut self, tag: Key, values: Vec<Value>) {
        match self.nodes.iter_mut().find(|n| n.tag == tag) {
            Some(node) => node.values = values,
            None => self.nodes.push(TreeNode { tag, values }),
        }
    }

    pub fn remove(&mut self, tag: Key) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.tag != tag);
        before != self.nodes.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Tree(ObjectTree),
    Array(FormattedArray),
}

impl Payload {
    /// The payload of a key that has never been stored.
    ///
    /// # Panics
    /// If `key_type` cannot carry a payload.
    pub fn empty(key: Key, key_type: &KeyType) -> Self {
        match key_type {
            KeyType::Tree => Payload::Tree(ObjectTree::new()),
            KeyType::Array(format) => Payload::Array(FormattedArray::new(format.clone())),
            other => panic!("No payload for key {} of type {:?}", key, other),
        }
    }

    /// # Panics
    /// If `key_type` cannot carry a payload.
    pub fn decode(key: Key, key_type: &KeyType, bytes: &[u8], swap: bool) -> CodecResult<Self> {
        match key_type {
            KeyType::Tree => bincode::deserialize(bytes)
                .map(Payload::Tree)
                .map_err(|e| CodecError::Serialization(e.to_string())),
            KeyType::Array(format) => {
                codec::decode_with_text(bytes, format, swap).map(Payload::Array)
            }
            other => panic!("Cannot decode key {} of type {:?}", key, other),
        }
    }

    pub fn encode(&self, swap: bool) -> CodecResult<Vec<u8>> {
        match self {
            Payload::Tree(tree) => {
                bincode::serialize(tree).map_err(|e| CodecError::Serialization(e.to_string()))
            }
            Payload::Array(array) => Ok(codec::encode_with_text(array, swap)),
        }
    }

    /// Budget units charged while resident. Never zero.
    pub fn cost(&self) -> usize {
        match self {
            Payload::Tree(tree) => tree.len(),
            Payload::Array(array) => array.len() + array.text().len().div_ceil(64),
        }
        .max(1)
    }

    /// An array with neither records nor text is deleted rather than stored.
    pub fn is_void(&self) -> bool {
        match self {
            Payload::Tree(_) => false,
            Payload::Array(array) => array.is_empty() && array.text().is_empty(),
        }
    }

    pub fn as_tree(&self) -> Option<&ObjectTree> {
        match self {
            Payload::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_tree_mut(&mut self) -> Option<&mut ObjectTree> {
        match self {
            Payload::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&FormattedArray> {
        match self {
            Payload::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut FormattedArray> {
        match self {
            Payload::Array(array) => Some(array),
            _ => None,
        }
    }
}
