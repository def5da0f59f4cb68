//! Operational transformation
//!
//! `transform_against(op, applied)` rewrites `op` so that it can be applied
//! after `applied`, where both were generated against the same document
//! state. Ties between concurrent writes are broken by origin: the operation
//! from the lower [`ClientId`] wins, so both application orders converge.
//!
//! [`ClientId`]: crate::operation::ClientId

use crate::error::{Error, Result};
use crate::node::Path;
use crate::operation::{ArrayEdit, Edit, IntegerEdit, ObjectEdit, Operation, OperationKind, TextEdit};
use tracing::trace;

/// Transform two concurrent operations against each other.
///
/// Returns `(a', b')` where `a'` applies after `b` and `b'` applies after `a`.
pub fn transform(a: &Operation, b: &Operation) -> Result<(Operation, Operation)> {
    Ok((transform_against(a, b)?, transform_against(b, a)?))
}

/// Fold `incoming` through every history entry it has not seen.
///
/// `history` is the slice starting at the incoming operation's base index;
/// its entries are never modified.
pub fn reconcile(incoming: &Operation, history: &[Operation]) -> Result<Operation> {
    let reconciled = history
        .iter()
        .try_fold(incoming.clone(), |op, applied| transform_against(&op, applied))?;

    if reconciled.is_noop() && !incoming.is_noop() {
        trace!(path = %incoming.path(), skipped = history.len(), "operation reconciled to a no-op");
    }
    Ok(reconciled)
}

/// Rewrite `op` to apply after `applied`.
pub fn transform_against(op: &Operation, applied: &Operation) -> Result<Operation> {
    if op.is_noop() || applied.is_noop() {
        return Ok(op.clone());
    }
    check_compatible(op, applied)?;

    let transformed = match applied.edit() {
        Edit::Array(ArrayEdit::Insert(_)) => after_array_insert(op, applied),
        Edit::Array(ArrayEdit::Remove) => after_array_remove(op, applied),
        Edit::Array(ArrayEdit::Update(_))
        | Edit::Object(ObjectEdit::Insert(_) | ObjectEdit::Restore(..)) => after_replace(op, applied),
        Edit::Object(ObjectEdit::Remove(position)) => after_object_remove(op, applied, *position),
        Edit::Text(edit) => after_text(op, applied, edit),
        Edit::Integer(_) | Edit::Boolean(_) | Edit::String(_) => after_leaf_write(op, applied),
        Edit::Noop(_) => op.clone(),
    };
    Ok(transformed)
}

fn is_leaf(kind: OperationKind) -> bool {
    !matches!(kind, OperationKind::Array | OperationKind::Object)
}

/// Leaf kinds that may address the same node
fn leaves_compatible(a: OperationKind, b: OperationKind) -> bool {
    use OperationKind::*;
    matches!(
        (a, b),
        (Integer, Integer) | (Boolean, Boolean) | (String | Text, String | Text)
    )
}

fn check_compatible(op: &Operation, applied: &Operation) -> Result<()> {
    let (o, p) = (op.path(), applied.path());
    let (ok, pk) = (op.kind(), applied.kind());

    if (is_leaf(ok) && o.is_ancestor_of(p)) || (is_leaf(pk) && p.is_ancestor_of(o)) {
        return Err(Error::TransformConflict(format!(
            "'{}' and '{}' disagree on whether a scalar leaf has children",
            o, p
        )));
    }
    if !is_leaf(ok) && !is_leaf(pk) && ok != pk && o.parent() == p.parent() {
        return Err(Error::TransformConflict(format!(
            "{} and {} operations under the same container '{}'",
            ok,
            pk,
            Path::from(p.parent().to_vec())
        )));
    }
    if o == p && is_leaf(ok) && is_leaf(pk) && !leaves_compatible(ok, pk) {
        return Err(Error::TransformConflict(format!(
            "{} and {} operations on the same leaf '{}'",
            ok, pk, o
        )));
    }
    Ok(())
}

/// Lower origin goes first; equal origins order `op` after `applied`.
fn wins_tie(op: &Operation, applied: &Operation) -> bool {
    op.origin() < applied.origin()
}

/// Index of the element `op` passes through in the array `applied` edits
fn sibling_index(op: &Path, applied: &Path) -> Option<usize> {
    let depth = applied.len().checked_sub(1)?;
    if op.len() <= depth || op.segments()[..depth] != *applied.parent() {
        return None;
    }
    op.index_at(depth)
}

fn is_array_insert(op: &Operation) -> bool {
    matches!(op.edit(), Edit::Array(ArrayEdit::Insert(_)))
}

fn after_array_insert(op: &Operation, applied: &Operation) -> Operation {
    let (o, p) = (op.path(), applied.path());
    let depth = p.len() - 1;
    let (Some(i), Some(j)) = (p.index_at(depth), sibling_index(o, p)) else {
        return op.clone();
    };

    let shift = if o.len() == p.len() && is_array_insert(op) {
        j > i || (j == i && !wins_tie(op, applied))
    } else {
        j >= i
    };

    if shift {
        op.with_path(o.with_index_at(depth, j + 1))
    } else {
        op.clone()
    }
}

fn after_array_remove(op: &Operation, applied: &Operation) -> Operation {
    let (o, p) = (op.path(), applied.path());
    let depth = p.len() - 1;
    let (Some(i), Some(j)) = (p.index_at(depth), sibling_index(o, p)) else {
        return op.clone();
    };

    if j > i {
        op.with_path(o.with_index_at(depth, j - 1))
    } else if j == i && !(o.len() == p.len() && is_array_insert(op)) {
        op.to_noop()
    } else {
        op.clone()
    }
}

/// `applied` replaced the node at its path (array update or object insert).
fn after_replace(op: &Operation, applied: &Operation) -> Operation {
    let (o, p) = (op.path(), applied.path());
    if p.is_ancestor_of(o) {
        return op.to_noop();
    }
    if o != p {
        return op.clone();
    }

    match (op.edit(), applied.edit()) {
        (Edit::Array(ArrayEdit::Update(_)), Edit::Array(ArrayEdit::Update(_)))
        | (
            Edit::Object(ObjectEdit::Insert(_) | ObjectEdit::Restore(..)),
            Edit::Object(ObjectEdit::Insert(_) | ObjectEdit::Restore(..)),
        ) => {
            if wins_tie(op, applied) {
                op.clone()
            } else {
                op.to_noop()
            }
        }
        (Edit::Object(ObjectEdit::Remove(_)), _) => op.to_noop(),
        (Edit::Array(_), _) => op.clone(),
        _ => op.to_noop(),
    }
}

/// `applied` removed a key, from `position` when it was recorded.
///
/// An insert of the same key survives and goes back where the key was.
fn after_object_remove(op: &Operation, applied: &Operation, position: Option<usize>) -> Operation {
    let (o, p) = (op.path(), applied.path());
    if p.is_ancestor_of(o) {
        return op.to_noop();
    }
    if o != p {
        return match (op.edit(), position) {
            (Edit::Object(ObjectEdit::Restore(value, at)), Some(removed))
                if o.parent() == p.parent() && removed < *at =>
            {
                op.with_edit(Edit::Object(ObjectEdit::Restore(value.clone(), at - 1)))
            }
            _ => op.clone(),
        };
    }

    match (op.edit(), position) {
        (Edit::Object(ObjectEdit::Insert(value) | ObjectEdit::Restore(value, _)), Some(at)) => {
            op.with_edit(Edit::Object(ObjectEdit::Restore(value.clone(), at)))
        }
        (Edit::Object(ObjectEdit::Insert(_) | ObjectEdit::Restore(..)), None) => op.clone(),
        _ => op.to_noop(),
    }
}

/// `applied` overwrote a scalar leaf.
fn after_leaf_write(op: &Operation, applied: &Operation) -> Operation {
    if op.path() != applied.path() {
        return op.clone();
    }

    match (op.edit(), applied.edit()) {
        (Edit::Integer(IntegerEdit::Set(_)), Edit::Integer(IntegerEdit::Set(_)))
        | (Edit::Boolean(_), Edit::Boolean(_))
        | (Edit::String(_), Edit::String(_)) => {
            if wins_tie(op, applied) {
                op.clone()
            } else {
                op.to_noop()
            }
        }
        // Set beats Add, both orders end on the set value
        (Edit::Integer(IntegerEdit::Add(_)), Edit::Integer(IntegerEdit::Set(_))) => op.to_noop(),
        (Edit::Text(_), Edit::String(_)) => op.to_noop(),
        _ => op.clone(),
    }
}

fn after_text(op: &Operation, applied: &Operation, applied_edit: &TextEdit) -> Operation {
    if op.path() != applied.path() {
        return op.clone();
    }
    match op.edit() {
        Edit::Text(edit) => match transform_text(edit, applied_edit, wins_tie(op, applied)) {
            Some(edit) => op.with_edit(Edit::Text(edit)),
            None => op.to_noop(),
        },
        _ => op.clone(),
    }
}

fn offset(position: usize, delta: isize) -> usize {
    position.saturating_add_signed(delta)
}

fn shifted(edit: &TextEdit, delta: isize) -> TextEdit {
    TextEdit {
        start: offset(edit.start, delta),
        end: offset(edit.end, delta),
        insert: edit.insert.clone(),
    }
}

/// Transform one text edit against another on the same leaf.
///
/// Overlapping ranges merge: `edit` is rewritten to replace the union of
/// both ranges, as it stands after `applied`, with both insertions, the
/// tie winner's text first. Either order ends with the same union
/// replaced by the same text. `None` means nothing is left to do.
fn transform_text(edit: &TextEdit, applied: &TextEdit, wins_tie: bool) -> Option<TextEdit> {
    if edit.is_insertion() && applied.is_insertion() && edit.start == applied.start {
        return Some(if wins_tie {
            edit.clone()
        } else {
            shifted(edit, applied.inserted_len() as isize)
        });
    }
    if edit.end <= applied.start {
        return Some(edit.clone());
    }
    if edit.start >= applied.end {
        return Some(shifted(edit, applied.delta()));
    }

    // ranges overlap
    let start = edit.start.min(applied.start);
    let end = offset(edit.end.max(applied.end), applied.delta());
    let insert = if wins_tie {
        format!("{}{}", edit.insert, applied.insert)
    } else {
        format!("{}{}", applied.insert, edit.insert)
    };
    if start == end && insert.is_empty() {
        None
    } else {
        Some(TextEdit { start, end, insert })
    }
}
