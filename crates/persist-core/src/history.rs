//! Shared undo/redo engine backing every collection in this crate.
//!
//! Two persistent singly-linked stacks of reversible actions. Pushing a new
//! action clears the redo stack; `undo` moves the top undo action to the
//! redo stack (and vice versa). The manager itself is an immutable value:
//! every operation returns a new `HistoryManager`, so a lineage of managers
//! shares tail cells the same way the collections that own them share tree
//! nodes.
//!
//! All types in this module are **stable** and covered by semantic
//! versioning.

use std::rc::Rc;

/// Default maximum history depth: unbounded. A manager constructed with
/// [`HistoryManager::new`] never drops an undo entry on its own; callers
/// who want a bounded lineage opt in explicitly via
/// [`HistoryManager::with_max_depth`].
const DEFAULT_MAX_DEPTH: usize = usize::MAX;

/// One entry of a persistent singly-linked stack.
struct StackCell<A> {
    action: A,
    parent: Option<Rc<StackCell<A>>>,
}

/// A persistent singly-linked stack with shared tails.
///
/// Push is O(1) and allocates one cell; cloning a `Stack` is O(1) (it's a
/// reference-counted pointer to the top cell). Long chains are unlinked
/// iteratively on drop rather than relying on `Rc`'s default recursive
/// drop, so releasing the last reference to a million-entry history does
/// not blow the stack.
struct Stack<A> {
    top: Option<Rc<StackCell<A>>>,
    len: usize,
}

impl<A> Clone for Stack<A> {
    fn clone(&self) -> Self {
        Stack {
            top: self.top.clone(),
            len: self.len,
        }
    }
}

impl<A> Stack<A> {
    fn new() -> Self {
        Stack { top: None, len: 0 }
    }

    fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    fn push(&self, action: A) -> Self {
        Stack {
            top: Some(Rc::new(StackCell {
                action,
                parent: self.top.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Pops the top action, returning it along with the resulting stack.
    fn pop(&self) -> Option<(&A, Stack<A>)> {
        self.top.as_ref().map(|cell| {
            (
                &cell.action,
                Stack {
                    top: cell.parent.clone(),
                    len: self.len - 1,
                },
            )
        })
    }

    fn truncated(&self, max_len: usize) -> Self
    where
        A: Clone,
    {
        if self.len <= max_len {
            return self.clone();
        }
        // Walk down from the top collecting only the newest `max_len`
        // actions, then rebuild a fresh chain over just those. The original
        // (longer) chain is untouched and shared by whoever else still
        // holds it; dropping our clone of it releases it iteratively via
        // `Stack`'s `Drop` impl.
        let mut kept: Vec<A> = Vec::with_capacity(max_len);
        let mut cur = self.top.clone();
        while let Some(cell) = cur {
            if kept.len() == max_len {
                break;
            }
            kept.push(cell.action.clone());
            cur = cell.parent.clone();
        }
        kept.into_iter().rev().fold(Stack::new(), |acc, action| acc.push(action))
    }
}

impl<A> Drop for Stack<A> {
    fn drop(&mut self) {
        let mut next = self.top.take();
        while let Some(rc) = next {
            match Rc::try_unwrap(rc) {
                Ok(cell) => next = cell.parent,
                Err(_) => break,
            }
        }
    }
}

/// A reversible action: a pair of collection snapshots excluding history.
///
/// `S` captures exactly the state a collection needs to reconstruct itself
/// (size, root node, ...) by value: cheap, `Clone`-able data rather than a
/// closure.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HistoryAction<S> {
    undo_snapshot: S,
    redo_snapshot: S,
}

/// Persistent undo/redo history shared by every collection in this crate.
///
/// `S` is the collection-specific snapshot type (e.g. `(size, node)` for
/// `PArray`). `HistoryManager` never inspects `S` beyond cloning it; it is
/// purely the bookkeeping of two stacks.
#[derive(Clone)]
pub struct HistoryManager<S> {
    undo_stack: Stack<HistoryAction<S>>,
    redo_stack: Stack<HistoryAction<S>>,
    max_depth: usize,
}

impl<S> Default for HistoryManager<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone> HistoryManager<S> {
    /// Creates an empty history manager with an unbounded undo depth.
    #[must_use]
    pub fn new() -> Self {
        HistoryManager {
            undo_stack: Stack::new(),
            redo_stack: Stack::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Creates an empty history manager with a custom maximum undo depth.
    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        HistoryManager {
            undo_stack: Stack::new(),
            redo_stack: Stack::new(),
            max_depth,
        }
    }

    /// Returns the maximum undo depth this manager enforces.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Records a reversible action, clearing the redo stack.
    ///
    /// `undo_snapshot` is the state to restore on `undo`; `redo_snapshot`
    /// is the state to restore on a subsequent `redo`. If the undo stack
    /// would exceed `max_depth`, the oldest entry is dropped.
    #[must_use]
    pub fn push(&self, undo_snapshot: S, redo_snapshot: S) -> Self {
        let pushed = self.undo_stack.push(HistoryAction {
            undo_snapshot,
            redo_snapshot,
        });
        HistoryManager {
            undo_stack: pushed.truncated(self.max_depth),
            redo_stack: Stack::new(),
            max_depth: self.max_depth,
        }
    }

    /// Whether there is an action to undo.
    #[must_use]
    pub fn has_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Whether there is an action to redo.
    #[must_use]
    pub fn has_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Pops the top undo action, returning its snapshot and the manager
    /// repositioned with that action moved to the redo stack.
    ///
    /// Returns `None` if there is nothing to undo.
    #[must_use]
    pub fn undo(&self) -> Option<(S, Self)> {
        let (action, rest) = self.undo_stack.pop()?;
        let snapshot = action.undo_snapshot.clone();
        let redo_stack = self.redo_stack.push(HistoryAction {
            undo_snapshot: action.undo_snapshot.clone(),
            redo_snapshot: action.redo_snapshot.clone(),
        });
        Some((
            snapshot,
            HistoryManager {
                undo_stack: rest,
                redo_stack,
                max_depth: self.max_depth,
            },
        ))
    }

    /// Pops the top redo action, returning its snapshot and the manager
    /// repositioned with that action moved back to the undo stack.
    ///
    /// Returns `None` if there is nothing to redo.
    #[must_use]
    pub fn redo(&self) -> Option<(S, Self)> {
        let (action, rest) = self.redo_stack.pop()?;
        let snapshot = action.redo_snapshot.clone();
        let undo_stack = self.undo_stack.push(HistoryAction {
            undo_snapshot: action.undo_snapshot.clone(),
            redo_snapshot: action.redo_snapshot.clone(),
        });
        Some((
            snapshot,
            HistoryManager {
                undo_stack,
                redo_stack: rest,
                max_depth: self.max_depth,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type H = HistoryManager<i32>;

    #[test]
    fn new_history_is_empty() {
        let h: H = HistoryManager::new();
        assert!(!h.has_undo());
        assert!(!h.has_redo());
    }

    #[test]
    fn push_enables_undo_not_redo() {
        let h: H = HistoryManager::new();
        let h = h.push(0, 1);
        assert!(h.has_undo());
        assert!(!h.has_redo());
    }

    #[test]
    fn undo_then_redo_roundtrip() {
        let h: H = HistoryManager::new();
        let h = h.push(0, 1);
        let (snap, h) = h.undo().expect("undo");
        assert_eq!(snap, 0);
        assert!(!h.has_undo());
        assert!(h.has_redo());

        let (snap, h) = h.redo().expect("redo");
        assert_eq!(snap, 1);
        assert!(h.has_undo());
        assert!(!h.has_redo());
    }

    #[test]
    fn undo_on_empty_is_none() {
        let h: H = HistoryManager::new();
        assert!(h.undo().is_none());
    }

    #[test]
    fn redo_on_empty_is_none() {
        let h: H = HistoryManager::new();
        assert!(h.redo().is_none());
    }

    #[test]
    fn push_after_undo_clears_redo() {
        let h: H = HistoryManager::new();
        let h = h.push(0, 1);
        let (_, h) = h.undo().expect("undo");
        assert!(h.has_redo());
        let h = h.push(1, 2);
        assert!(!h.has_redo());
    }

    #[test]
    fn original_manager_unaffected_by_push() {
        let h: H = HistoryManager::new();
        let h2 = h.push(0, 1);
        assert!(!h.has_undo());
        assert!(h2.has_undo());
    }

    #[test]
    fn max_depth_trims_oldest() {
        let h: H = HistoryManager::with_max_depth(2);
        let h = h.push(0, 1);
        let h = h.push(1, 2);
        let h = h.push(2, 3);

        let (snap, h) = h.undo().unwrap();
        assert_eq!(snap, 2);
        let (snap, h) = h.undo().unwrap();
        assert_eq!(snap, 1);
        assert!(h.undo().is_none());
    }

    #[test]
    fn many_versions_drop_without_overflow() {
        let mut h: H = HistoryManager::new();
        for i in 0..200_000 {
            h = h.push(i, i + 1);
        }
        drop(h);
    }

    #[test]
    fn default_depth_never_truncates() {
        let mut h: H = HistoryManager::new();
        for i in 0..500 {
            h = h.push(i, i + 1);
        }
        for expected in (0..500).rev() {
            let (snap, next) = h.undo().expect("default depth is unbounded");
            assert_eq!(snap, expected);
            h = next;
        }
        assert!(h.undo().is_none());
    }
}
