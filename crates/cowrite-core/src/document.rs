//! Document identifiers and the live content tree

use crate::error::{Error, Result};
use crate::node::{parse_index, Node, Path};
use crate::operation::{ArrayEdit, Edit, IntegerEdit, ObjectEdit, Operation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

/// Document identifier - UTF-8 string, max 512 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new document ID, validating the format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidDocumentId("Document ID cannot be empty".into()));
        }

        if id.len() > 512 {
            return Err(Error::InvalidDocumentId("Document ID exceeds 512 bytes".into()));
        }

        // Validate pattern: [a-zA-Z0-9:_-]+
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-') {
            return Err(Error::InvalidDocumentId(
                "Document ID must match pattern [a-zA-Z0-9:_-]+".into()
            ));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DocumentId::new(s)
    }
}

/// A document's content tree.
///
/// Leaf edits reach their target through a memoized path to structural
/// index translation. Every structural edit (array insert/update/remove,
/// object insert/remove) clears the whole cache, so a cached index path never
/// points at a node that has moved.
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    content: Node,
    index_cache: HashMap<String, Vec<usize>>,
}

impl Document {
    pub fn new(id: DocumentId, content: Node) -> Self {
        Self {
            id,
            content,
            index_cache: HashMap::new(),
        }
    }

    /// A document with empty array content
    pub fn empty(id: DocumentId) -> Self {
        Self::new(id, Node::Array(Vec::new()))
    }

    /// Decode stored JSON; blank input yields an empty document.
    pub fn from_bytes(id: DocumentId, bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::empty(id));
        }
        let content: Node = serde_json::from_slice(bytes)?;
        Ok(Self::new(id, content))
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn content(&self) -> &Node {
        &self.content
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.content)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.content)?)
    }

    /// Node at `path`
    pub fn get(&self, path: &Path) -> Result<&Node> {
        self.content.descend(path.segments())
    }

    /// Resolve `path` to its parent node and final segment.
    pub fn resolve_path<'p>(&self, path: &'p Path) -> Result<(&Node, &'p str)> {
        let last = path
            .last()
            .ok_or_else(|| Error::InvalidPath("the document root has no parent".into()))?;
        let parent = self.content.descend(path.parent())?;
        if !parent.is_composite() {
            return Err(Error::InvalidPath(format!(
                "'{}' addresses a child of a {} leaf",
                last,
                parent.type_name()
            )));
        }
        Ok((parent, last))
    }

    fn resolve_path_mut<'p>(&mut self, path: &'p Path) -> Result<(&mut Node, &'p str)> {
        let last = path
            .last()
            .ok_or_else(|| Error::InvalidPath("the document root has no parent".into()))?;
        let parent = self.content.descend_mut(path.parent())?;
        Ok((parent, last))
    }

    /// Translate a textual path into structural child positions, memoized.
    pub fn translate_to_index_path(&mut self, path: &Path) -> Result<Vec<usize>> {
        let key = path.to_string();
        if let Some(indices) = self.index_cache.get(&key) {
            return Ok(indices.clone());
        }

        let mut indices = Vec::with_capacity(path.len());
        let mut node = &self.content;
        for segment in path.segments() {
            let position = node.child_position(segment)?;
            node = node
                .child_at(position)
                .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
            indices.push(position);
        }

        trace!(path = %key, ?indices, "memoized index path");
        self.index_cache.insert(key, indices.clone());
        Ok(indices)
    }

    /// Node reached by following structural positions
    pub fn node_at_index_path(&self, indices: &[usize]) -> Option<&Node> {
        indices
            .iter()
            .try_fold(&self.content, |node, &position| node.child_at(position))
    }

    fn node_at_index_path_mut(&mut self, indices: &[usize]) -> Option<&mut Node> {
        let mut node = &mut self.content;
        for &position in indices {
            node = node.child_at_mut(position)?;
        }
        Some(node)
    }

    /// Number of memoized index paths
    pub fn cached_paths(&self) -> usize {
        self.index_cache.len()
    }

    fn invalidate_index_cache(&mut self) {
        self.index_cache.clear();
    }

    fn leaf_mut(&mut self, path: &Path) -> Result<&mut Node> {
        if path.is_root() {
            return Err(Error::InvalidPath("leaf edits cannot target the document root".into()));
        }
        let indices = self.translate_to_index_path(path)?;
        if self.node_at_index_path(&indices).is_none() {
            self.invalidate_index_cache();
            return Err(Error::InvalidPath(path.to_string()));
        }
        self.node_at_index_path_mut(&indices)
            .ok_or_else(|| Error::InvalidPath(path.to_string()))
    }

    /// Replace the character range `[start, end)` of a string leaf.
    pub fn text_replace(&mut self, path: &Path, start: usize, end: usize, insert: &str) -> Result<()> {
        match self.leaf_mut(path)? {
            Node::String(text) => {
                let len = text.chars().count();
                if end > len {
                    return Err(Error::IndexOutOfRange { index: end, len });
                }
                if start > end {
                    return Err(Error::IndexOutOfRange { index: start, len: end });
                }
                let from = byte_offset(text, start);
                let to = byte_offset(text, end);
                text.replace_range(from..to, insert);
                Ok(())
            }
            other => Err(Error::type_mismatch("string", other.type_name())),
        }
    }

    pub fn set_integer(&mut self, path: &Path, value: i64) -> Result<()> {
        match self.leaf_mut(path)? {
            node @ (Node::Integer(_) | Node::Null) => {
                *node = Node::Integer(value);
                Ok(())
            }
            other => Err(Error::type_mismatch("integer", other.type_name())),
        }
    }

    /// Add `delta` to an integer leaf, returning the new value.
    pub fn add_integer(&mut self, path: &Path, delta: i64) -> Result<i64> {
        match self.leaf_mut(path)? {
            Node::Integer(n) => {
                *n = n
                    .checked_add(delta)
                    .ok_or_else(|| Error::InvalidOperation(format!("integer overflow adding {}", delta)))?;
                Ok(*n)
            }
            other => Err(Error::type_mismatch("integer", other.type_name())),
        }
    }

    pub fn set_boolean(&mut self, path: &Path, value: bool) -> Result<()> {
        match self.leaf_mut(path)? {
            node @ (Node::Bool(_) | Node::Null) => {
                *node = Node::Bool(value);
                Ok(())
            }
            other => Err(Error::type_mismatch("boolean", other.type_name())),
        }
    }

    pub fn set_string(&mut self, path: &Path, value: &str) -> Result<()> {
        match self.leaf_mut(path)? {
            node @ (Node::String(_) | Node::Null) => {
                *node = Node::String(value.to_string());
                Ok(())
            }
            other => Err(Error::type_mismatch("string", other.type_name())),
        }
    }

    /// Insert (or replace) an object key.
    pub fn object_insert(&mut self, path: &Path, value: Node) -> Result<()> {
        let (parent, key) = self.resolve_path_mut(path)?;
        match parent {
            Node::Object(map) => {
                map.insert(key.to_string(), value);
            }
            other => return Err(Error::type_mismatch("object", other.type_name())),
        }
        self.invalidate_index_cache();
        Ok(())
    }

    /// Insert a key at `position` unless it is already present, in which
    /// case its value is replaced in place.
    pub fn object_restore(&mut self, path: &Path, value: Node, position: usize) -> Result<()> {
        let (parent, key) = self.resolve_path_mut(path)?;
        match parent {
            Node::Object(map) => match map.get_mut(key) {
                Some(existing) => *existing = value,
                None => {
                    let at = position.min(map.len());
                    map.shift_insert(at, key.to_string(), value);
                }
            },
            other => return Err(Error::type_mismatch("object", other.type_name())),
        }
        self.invalidate_index_cache();
        Ok(())
    }

    /// Fill in where the key of an object remove currently sits.
    ///
    /// Other operations are returned unchanged, as is a remove whose key
    /// does not resolve; applying it reports the error.
    pub fn record_position(&self, op: &Operation) -> Operation {
        if !matches!(op.edit(), Edit::Object(ObjectEdit::Remove(None))) {
            return op.clone();
        }
        let position = match self.resolve_path(op.path()) {
            Ok((Node::Object(map), key)) => map.get_index_of(key),
            _ => None,
        };
        match position {
            Some(position) => op.with_edit(Edit::Object(ObjectEdit::Remove(Some(position)))),
            None => op.clone(),
        }
    }

    pub fn object_remove(&mut self, path: &Path) -> Result<Node> {
        let (parent, key) = self.resolve_path_mut(path)?;
        let removed = match parent {
            Node::Object(map) => map
                .shift_remove(key)
                .ok_or_else(|| Error::InvalidPath(format!("no key '{}'", key)))?,
            other => return Err(Error::type_mismatch("object", other.type_name())),
        };
        self.invalidate_index_cache();
        Ok(removed)
    }

    pub fn array_insert(&mut self, path: &Path, value: Node) -> Result<()> {
        let (parent, segment) = self.resolve_path_mut(path)?;
        match parent {
            Node::Array(items) => {
                let index = parse_index(segment)?;
                if index > items.len() {
                    return Err(Error::IndexOutOfRange { index, len: items.len() });
                }
                items.insert(index, value);
            }
            other => return Err(Error::type_mismatch("array", other.type_name())),
        }
        self.invalidate_index_cache();
        Ok(())
    }

    pub fn array_update(&mut self, path: &Path, value: Node) -> Result<Node> {
        let (parent, segment) = self.resolve_path_mut(path)?;
        let previous = match parent {
            Node::Array(items) => {
                let index = parse_index(segment)?;
                let len = items.len();
                let slot = items
                    .get_mut(index)
                    .ok_or(Error::IndexOutOfRange { index, len })?;
                std::mem::replace(slot, value)
            }
            other => return Err(Error::type_mismatch("array", other.type_name())),
        };
        self.invalidate_index_cache();
        Ok(previous)
    }

    pub fn array_remove(&mut self, path: &Path) -> Result<Node> {
        let (parent, segment) = self.resolve_path_mut(path)?;
        let removed = match parent {
            Node::Array(items) => {
                let index = parse_index(segment)?;
                if index >= items.len() {
                    return Err(Error::IndexOutOfRange { index, len: items.len() });
                }
                items.remove(index)
            }
            other => return Err(Error::type_mismatch("array", other.type_name())),
        };
        self.invalidate_index_cache();
        Ok(removed)
    }

    /// Apply an already transformed operation. No-ops change nothing.
    pub fn apply(&mut self, op: &Operation) -> Result<()> {
        op.validate()?;
        let path = op.path();
        match op.edit() {
            Edit::Noop(_) => Ok(()),
            Edit::Integer(IntegerEdit::Add(delta)) => self.add_integer(path, *delta).map(|_| ()),
            Edit::Integer(IntegerEdit::Set(value)) => self.set_integer(path, *value),
            Edit::Boolean(value) => self.set_boolean(path, *value),
            Edit::String(value) => self.set_string(path, value),
            Edit::Text(edit) => self.text_replace(path, edit.start, edit.end, &edit.insert),
            Edit::Array(ArrayEdit::Insert(value)) => self.array_insert(path, value.clone()),
            Edit::Array(ArrayEdit::Update(value)) => self.array_update(path, value.clone()).map(|_| ()),
            Edit::Array(ArrayEdit::Remove) => self.array_remove(path).map(|_| ()),
            Edit::Object(ObjectEdit::Insert(value)) => self.object_insert(path, value.clone()),
            Edit::Object(ObjectEdit::Restore(value, position)) => {
                self.object_restore(path, value.clone(), *position)
            }
            Edit::Object(ObjectEdit::Remove(_)) => self.object_remove(path).map(|_| ()),
        }
    }
}

/// Byte offset of the `chars`-th character of `text`
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(offset, _)| offset)
}
