//! Edit operations submitted by clients

use crate::error::{Error, Result};
use crate::node::{parse_index, Node, Path};
use serde::{Deserialize, Serialize};

/// Identifier of a client session within one document server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of node an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Integer,
    Boolean,
    String,
    Array,
    Object,
    Text,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Integer => write!(f, "integer"),
            OperationKind::Boolean => write!(f, "boolean"),
            OperationKind::String => write!(f, "string"),
            OperationKind::Array => write!(f, "array"),
            OperationKind::Object => write!(f, "object"),
            OperationKind::Text => write!(f, "text"),
        }
    }
}

impl std::str::FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "integer" | "int" => Ok(OperationKind::Integer),
            "boolean" | "bool" => Ok(OperationKind::Boolean),
            "string" => Ok(OperationKind::String),
            "array" => Ok(OperationKind::Array),
            "object" => Ok(OperationKind::Object),
            "text" => Ok(OperationKind::Text),
            _ => Err(Error::InvalidOperation(format!("Unknown operation kind: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerEdit {
    /// Commutative increment
    Add(i64),
    Set(i64),
}

/// Replace the character range `[start, end)` of a string leaf with `insert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub start: usize,
    pub end: usize,
    pub insert: String,
}

impl TextEdit {
    /// Number of characters inserted
    pub fn inserted_len(&self) -> usize {
        self.insert.chars().count()
    }

    /// Change in leaf length once applied
    pub fn delta(&self) -> isize {
        self.inserted_len() as isize - (self.end - self.start) as isize
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayEdit {
    Insert(Node),
    Update(Node),
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEdit {
    /// Insert a key, replacing any existing value
    Insert(Node),
    /// Insert a key that a concurrent remove deleted back at its old position
    Restore(Node, usize),
    /// Remove a key; the position is filled in once the server has seen
    /// where the key sat.
    Remove(Option<usize>),
}

/// Kind dependent payload of an operation
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Integer(IntegerEdit),
    Boolean(bool),
    String(String),
    Text(TextEdit),
    Array(ArrayEdit),
    Object(ObjectEdit),
    /// An edit cancelled by transformation; applies nothing.
    Noop(OperationKind),
}

impl Edit {
    pub fn kind(&self) -> OperationKind {
        match self {
            Edit::Integer(_) => OperationKind::Integer,
            Edit::Boolean(_) => OperationKind::Boolean,
            Edit::String(_) => OperationKind::String,
            Edit::Text(_) => OperationKind::Text,
            Edit::Array(_) => OperationKind::Array,
            Edit::Object(_) => OperationKind::Object,
            Edit::Noop(kind) => *kind,
        }
    }
}

/// An edit against a target path, tagged with the history index its sender
/// had already seen.
///
/// Operations are values: transformation returns new operations and never
/// modifies one in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    path: Path,
    edit: Edit,
    base_history_index: usize,
    origin: ClientId,
}

impl Operation {
    pub fn new(path: impl Into<Path>, edit: Edit, base_history_index: usize) -> Self {
        Self {
            path: path.into(),
            edit,
            base_history_index,
            origin: ClientId::default(),
        }
    }

    pub fn integer_add(path: impl Into<Path>, delta: i64, base: usize) -> Self {
        Self::new(path, Edit::Integer(IntegerEdit::Add(delta)), base)
    }

    pub fn integer_set(path: impl Into<Path>, value: i64, base: usize) -> Self {
        Self::new(path, Edit::Integer(IntegerEdit::Set(value)), base)
    }

    pub fn boolean_set(path: impl Into<Path>, value: bool, base: usize) -> Self {
        Self::new(path, Edit::Boolean(value), base)
    }

    pub fn string_set(path: impl Into<Path>, value: impl Into<String>, base: usize) -> Self {
        Self::new(path, Edit::String(value.into()), base)
    }

    pub fn text_replace(
        path: impl Into<Path>,
        start: usize,
        end: usize,
        insert: impl Into<String>,
        base: usize,
    ) -> Self {
        let edit = TextEdit {
            start,
            end,
            insert: insert.into(),
        };
        Self::new(path, Edit::Text(edit), base)
    }

    pub fn array_insert(path: impl Into<Path>, value: impl Into<Node>, base: usize) -> Self {
        Self::new(path, Edit::Array(ArrayEdit::Insert(value.into())), base)
    }

    pub fn array_update(path: impl Into<Path>, value: impl Into<Node>, base: usize) -> Self {
        Self::new(path, Edit::Array(ArrayEdit::Update(value.into())), base)
    }

    pub fn array_remove(path: impl Into<Path>, base: usize) -> Self {
        Self::new(path, Edit::Array(ArrayEdit::Remove), base)
    }

    pub fn object_insert(path: impl Into<Path>, value: impl Into<Node>, base: usize) -> Self {
        Self::new(path, Edit::Object(ObjectEdit::Insert(value.into())), base)
    }

    pub fn object_remove(path: impl Into<Path>, base: usize) -> Self {
        Self::new(path, Edit::Object(ObjectEdit::Remove(None)), base)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn edit(&self) -> &Edit {
        &self.edit
    }

    pub fn kind(&self) -> OperationKind {
        self.edit.kind()
    }

    pub fn base_history_index(&self) -> usize {
        self.base_history_index
    }

    pub fn origin(&self) -> ClientId {
        self.origin
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.edit, Edit::Noop(_))
    }

    /// Same operation attributed to `origin`
    pub fn with_origin(mut self, origin: ClientId) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_path(&self, path: Path) -> Self {
        Self {
            path,
            ..self.clone()
        }
    }

    pub fn with_edit(&self, edit: Edit) -> Self {
        Self {
            edit,
            ..self.clone()
        }
    }

    /// The cancelled form of this operation
    pub fn to_noop(&self) -> Self {
        self.with_edit(Edit::Noop(self.kind()))
    }

    /// Check the operation is well formed before it reaches a document.
    pub fn validate(&self) -> Result<()> {
        match &self.edit {
            Edit::Array(_) => {
                let last = self
                    .path
                    .last()
                    .ok_or_else(|| Error::InvalidOperation("array operation needs an element path".into()))?;
                parse_index(last)?;
            }
            Edit::Text(edit) if edit.start > edit.end => {
                return Err(Error::InvalidOperation(format!(
                    "text range start {} is past end {}",
                    edit.start, edit.end
                )));
            }
            Edit::Noop(_) => {}
            _ if self.path.is_root() => {
                return Err(Error::InvalidOperation(format!(
                    "{} operation cannot target the document root",
                    self.kind()
                )));
            }
            _ => {}
        }
        Ok(())
    }
}
