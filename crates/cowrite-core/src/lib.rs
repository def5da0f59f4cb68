//! cowrite core - document model and operational transformation
//!
//! This crate provides the engine every document server runs:
//! - Edit operations and their target paths
//! - The document content tree with a memoized path index
//! - Transformation of concurrent operations and the applied history

pub mod document;
pub mod error;
pub mod history;
pub mod node;
pub mod operation;
pub mod transform;

pub use document::{Document, DocumentId};
pub use error::{Error, Result};
pub use history::OperationHistory;
pub use node::{Node, Path};
pub use operation::{ArrayEdit, ClientId, Edit, IntegerEdit, ObjectEdit, Operation, OperationKind, TextEdit};
pub use transform::{reconcile, transform, transform_against};
