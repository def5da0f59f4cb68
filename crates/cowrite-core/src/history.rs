//! Append-only log of applied operations

use crate::error::{Error, Result};
use crate::operation::Operation;

/// Operations in the order the document server applied them.
///
/// Entries are stored already transformed, so `since(k)` is exactly what an
/// operation based on index `k` has to be reconciled against.
#[derive(Debug, Clone, Default)]
pub struct OperationHistory {
    entries: Vec<Operation>,
}

impl OperationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an applied operation, returning its history index.
    pub fn push(&mut self, op: Operation) -> usize {
        self.entries.push(op);
        self.entries.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Operation> {
        self.entries.get(index)
    }

    /// Entries the sender of an operation based on `base` has not seen.
    pub fn since(&self, base: usize) -> Result<&[Operation]> {
        self.entries.get(base..).ok_or_else(|| {
            Error::ProtocolViolation(format!(
                "base history index {} is ahead of history length {}",
                base,
                self.entries.len()
            ))
        })
    }

    pub fn entries(&self) -> &[Operation] {
        &self.entries
    }
}
