//! `PList`: a fully persistent doubly-linked sequence.
//!
//! Combines two techniques: fat nodes (each node records up to
//! [`node::MAX_SIZE_FAT_NODE`] versions of its `next`/`prev`/value fields,
//! so small edits don't force a full-path copy) and a persistent
//! order-maintenance structure (`order`) shared by every version in one
//! lineage, which answers "which of these recorded versions applies as of
//! version `v`?" without needing the list's version ids to be a single
//! global, branch-free sequence.
//!
//! All types in this module are **stable** and covered by semantic
//! versioning.

mod node;
mod order;

use std::fmt;
use std::rc::Rc;

use self::node::{ListNode, NodeRef};
use self::order::Order;
use crate::history::HistoryManager;
use crate::{postcondition, precondition, ContractError};

struct ListSnapshot<T> {
    version: i64,
    order: Order,
    head: NodeRef<T>,
    tail: NodeRef<T>,
    size: usize,
}

impl<T> Clone for ListSnapshot<T> {
    fn clone(&self) -> Self {
        ListSnapshot {
            version: self.version,
            order: self.order.clone(),
            head: Rc::clone(&self.head),
            tail: Rc::clone(&self.tail),
            size: self.size,
        }
    }
}

/// A fully persistent, doubly-linked sequence with undo/redo history.
pub struct PList<T> {
    version: i64,
    order: Order,
    head: NodeRef<T>,
    tail: NodeRef<T>,
    size: usize,
    history: HistoryManager<ListSnapshot<T>>,
}

impl<T> Clone for PList<T> {
    fn clone(&self) -> Self {
        PList {
            version: self.version,
            order: self.order.clone(),
            head: Rc::clone(&self.head),
            tail: Rc::clone(&self.tail),
            size: self.size,
            history: self.history.clone(),
        }
    }
}

impl<T> Default for PList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PList<T> {
    /// Creates a new, empty list.
    #[must_use]
    pub fn new() -> Self {
        let order = Order::new();
        let head = ListNode::new_sentinel();
        let tail = ListNode::new_sentinel();
        head.borrow_mut().set_next(0, Some(Rc::clone(&tail)));
        tail.borrow_mut().set_prev(0, Some(Rc::clone(&head)));
        PList {
            version: 0,
            order,
            head,
            tail,
            size: 0,
            history: HistoryManager::new(),
        }
    }

    /// Builds a list from an iterator of initial values, in order.
    #[must_use]
    pub fn from_initializer(values: impl IntoIterator<Item = T>) -> Self {
        let mut list = Self::new();
        for value in values {
            let target = Rc::clone(&list.tail);
            list = list.insert_before(&target, value);
        }
        list.history = HistoryManager::new();
        list
    }

    /// Number of elements.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the list has no elements.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.size == 0
    }

    fn locate(&self, i: usize) -> Result<NodeRef<T>, ContractError> {
        precondition!(i <= self.size);
        let mut cur = Rc::clone(&self.head);
        for _ in 0..=i {
            cur = cur
                .borrow()
                .get_next(&self.order, self.version)
                .expect("i <= size guarantees the chain reaches this far");
        }
        Ok(cur)
    }

    /// Returns the element at `i`.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if `i >= size()`.
    pub fn get(&self, i: usize) -> Result<Rc<T>, ContractError> {
        precondition!(i < self.size);
        let node = self.locate(i)?;
        Ok(node
            .borrow()
            .get_value(&self.order, self.version)
            .expect("a node at a valid index always has a value"))
    }

    /// Returns the first element.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if the list is empty.
    pub fn front(&self) -> Result<Rc<T>, ContractError> {
        precondition!(!self.empty());
        self.get(0)
    }

    /// Returns the last element.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if the list is empty.
    pub fn back(&self) -> Result<Rc<T>, ContractError> {
        precondition!(!self.empty());
        self.get(self.size - 1)
    }

    fn set_next_at(&self, node: &NodeRef<T>, version: i64, successor: Option<NodeRef<T>>) -> NodeRef<T> {
        if node.borrow_mut().set_next(version, successor.clone()) {
            return Rc::clone(node);
        }
        let (_, prev, value) = node.borrow().fork_at(&self.order, self.version);
        let forked = match value {
            Some(v) => ListNode::new_value(version, v, successor, prev.clone()),
            None => {
                let n = ListNode::new_sentinel();
                n.borrow_mut().set_next(version, successor);
                n.borrow_mut().set_prev(version, prev.clone());
                n
            }
        };
        if let Some(pred) = prev {
            self.set_next_at(&pred, version, Some(Rc::clone(&forked)));
        }
        forked
    }

    fn set_prev_at(&self, node: &NodeRef<T>, version: i64, predecessor: Option<NodeRef<T>>) -> NodeRef<T> {
        if node.borrow_mut().set_prev(version, predecessor.clone()) {
            return Rc::clone(node);
        }
        let (next, _, value) = node.borrow().fork_at(&self.order, self.version);
        let forked = match value {
            Some(v) => ListNode::new_value(version, v, next.clone(), predecessor),
            None => {
                let n = ListNode::new_sentinel();
                n.borrow_mut().set_prev(version, predecessor);
                n.borrow_mut().set_next(version, next.clone());
                n
            }
        };
        if let Some(succ) = next {
            self.set_prev_at(&succ, version, Some(Rc::clone(&forked)));
        }
        forked
    }

    fn rebase_head_tail(
        &self,
        old_pred: &NodeRef<T>,
        new_pred: NodeRef<T>,
        old_succ: &NodeRef<T>,
        new_succ: NodeRef<T>,
    ) -> (NodeRef<T>, NodeRef<T>) {
        let head = if Rc::ptr_eq(old_pred, &self.head) {
            new_pred
        } else {
            Rc::clone(&self.head)
        };
        let tail = if Rc::ptr_eq(old_succ, &self.tail) {
            new_succ
        } else {
            Rc::clone(&self.tail)
        };
        (head, tail)
    }

    /// Inserts `value` immediately before `target`, which must already be
    /// reachable at `self.version` (a value node, or `self.tail`).
    fn insert_before(&self, target: &NodeRef<T>, value: T) -> Self {
        let v_new = self.order.add(self.version);
        let pred = target
            .borrow()
            .get_prev(&self.order, self.version)
            .expect("every insertion target has a predecessor");

        let new_node = ListNode::new_value(
            v_new,
            Rc::new(value),
            Some(Rc::clone(target)),
            Some(Rc::clone(&pred)),
        );

        let new_pred = self.set_next_at(&pred, v_new, Some(Rc::clone(&new_node)));
        let new_target = self.set_prev_at(target, v_new, Some(Rc::clone(&new_node)));
        let (head, tail) = self.rebase_head_tail(&pred, new_pred, target, new_target);

        PList {
            version: v_new,
            order: self.order.clone(),
            head,
            tail,
            size: self.size + 1,
            history: self.history.clone(),
        }
    }

    /// Removes `target`, a value node reachable at `self.version`.
    fn erase_node(&self, target: &NodeRef<T>) -> Self {
        let v_new = self.order.add(self.version);
        let pred = target
            .borrow()
            .get_prev(&self.order, self.version)
            .expect("every value node has a predecessor");
        let succ = target
            .borrow()
            .get_next(&self.order, self.version)
            .expect("every value node has a successor");

        let new_pred = self.set_next_at(&pred, v_new, Some(Rc::clone(&succ)));
        let new_succ = self.set_prev_at(&succ, v_new, Some(Rc::clone(&pred)));
        let (head, tail) = self.rebase_head_tail(&pred, new_pred, &succ, new_succ);

        PList {
            version: v_new,
            order: self.order.clone(),
            head,
            tail,
            size: self.size - 1,
            history: self.history.clone(),
        }
    }

    fn record(&self, mutated: Self) -> Self {
        let history = self.history.push(
            ListSnapshot {
                version: self.version,
                order: self.order.clone(),
                head: Rc::clone(&self.head),
                tail: Rc::clone(&self.tail),
                size: self.size,
            },
            ListSnapshot {
                version: mutated.version,
                order: mutated.order.clone(),
                head: Rc::clone(&mutated.head),
                tail: Rc::clone(&mutated.tail),
                size: mutated.size,
            },
        );
        PList { history, ..mutated }
    }

    /// Returns a new list with element `i` replaced by `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if `i >= size()`.
    pub fn set(&self, i: usize, value: T) -> Result<Self, ContractError> {
        precondition!(i < self.size);
        let target = self.locate(i)?;
        let v_new = self.order.add(self.version);
        let rc_value = Rc::new(value);

        let (head, tail) = if target.borrow_mut().set_value(v_new, Rc::clone(&rc_value)) {
            (Rc::clone(&self.head), Rc::clone(&self.tail))
        } else {
            let pred = target
                .borrow()
                .get_prev(&self.order, self.version)
                .expect("value node has a predecessor");
            let succ = target
                .borrow()
                .get_next(&self.order, self.version)
                .expect("value node has a successor");
            let forked = ListNode::new_value(v_new, rc_value, Some(Rc::clone(&succ)), Some(Rc::clone(&pred)));
            let new_pred = self.set_next_at(&pred, v_new, Some(Rc::clone(&forked)));
            let new_succ = self.set_prev_at(&succ, v_new, Some(Rc::clone(&forked)));
            self.rebase_head_tail(&pred, new_pred, &succ, new_succ)
        };

        let mutated = PList {
            version: v_new,
            order: self.order.clone(),
            head,
            tail,
            size: self.size,
            history: self.history.clone(),
        };
        Ok(self.record(mutated))
    }

    /// Returns a new list with `value` inserted at position `i`, shifting
    /// elements from `i` onward one position later.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if `i > size()`.
    pub fn insert(&self, i: usize, value: T) -> Result<Self, ContractError> {
        precondition!(i <= self.size);
        let target = self.locate(i)?;
        let result = self.record(self.insert_before(&target, value));
        postcondition!(result.size == self.size + 1);
        Ok(result)
    }

    /// Returns a new list with the element at `i` removed.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if `i >= size()`.
    pub fn erase(&self, i: usize) -> Result<Self, ContractError> {
        precondition!(i < self.size);
        let target = self.locate(i)?;
        let result = self.record(self.erase_node(&target));
        postcondition!(result.size == self.size - 1);
        Ok(result)
    }

    /// Returns a new list with `value` prepended.
    #[must_use]
    pub fn push_front(&self, value: T) -> Self {
        let target = self.locate(0).unwrap_or_else(|_| Rc::clone(&self.tail));
        self.record(self.insert_before(&target, value))
    }

    /// Returns a new list with `value` appended.
    #[must_use]
    pub fn push_back(&self, value: T) -> Self {
        let target = Rc::clone(&self.tail);
        self.record(self.insert_before(&target, value))
    }

    /// Returns a new list with the first element removed.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if the list is empty.
    pub fn pop_front(&self) -> Result<Self, ContractError> {
        precondition!(!self.empty());
        let target = self.locate(0)?;
        Ok(self.record(self.erase_node(&target)))
    }

    /// Returns a new list with the last element removed.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if the list is empty.
    pub fn pop_back(&self) -> Result<Self, ContractError> {
        precondition!(!self.empty());
        let target = self.locate(self.size - 1)?;
        Ok(self.record(self.erase_node(&target)))
    }

    /// Whether an undo is available.
    #[must_use]
    pub fn has_undo(&self) -> bool {
        self.history.has_undo()
    }

    /// Whether a redo is available.
    #[must_use]
    pub fn has_redo(&self) -> bool {
        self.history.has_redo()
    }

    /// Undoes the most recent mutation.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if there is nothing to undo.
    pub fn undo(&self) -> Result<Self, ContractError> {
        precondition!(self.history.has_undo());
        let (snapshot, history) = self.history.undo().expect("has_undo() was just checked true");
        Ok(PList {
            version: snapshot.version,
            order: snapshot.order,
            head: snapshot.head,
            tail: snapshot.tail,
            size: snapshot.size,
            history,
        })
    }

    /// Redoes the most recently undone mutation.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Precondition`] if there is nothing to redo.
    pub fn redo(&self) -> Result<Self, ContractError> {
        precondition!(self.history.has_redo());
        let (snapshot, history) = self.history.redo().expect("has_redo() was just checked true");
        Ok(PList {
            version: snapshot.version,
            order: snapshot.order,
            head: snapshot.head,
            tail: snapshot.tail,
            size: snapshot.size,
            history,
        })
    }

    /// A bidirectional iterator over the list's elements.
    #[must_use]
    pub fn iter(&self) -> Iter<T> {
        Iter {
            order: self.order.clone(),
            version: self.version,
            front: Rc::clone(&self.head),
            back: Rc::clone(&self.tail),
        }
    }
}

impl<T: PartialEq> PartialEq for PList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.iter().zip(other.iter()).all(|(a, b)| *a == *b)
    }
}

impl<T: fmt::Debug> fmt::Debug for PList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|rc| DebugRepr(rc))).finish()
    }
}

/// Formats an owned `Rc<T>` as `T` would format, without requiring `T: Clone`.
struct DebugRepr<T>(Rc<T>);

impl<T: fmt::Debug> fmt::Debug for DebugRepr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Bidirectional iterator over a [`PList`]'s elements.
///
/// Owns a cheap (`Rc`-based) handle into the list rather than borrowing it,
/// so it has no lifetime parameter.
pub struct Iter<T> {
    order: Order,
    version: i64,
    front: NodeRef<T>,
    back: NodeRef<T>,
}

impl<T> Clone for Iter<T> {
    fn clone(&self) -> Self {
        Iter {
            order: self.order.clone(),
            version: self.version,
            front: Rc::clone(&self.front),
            back: Rc::clone(&self.back),
        }
    }
}

impl<T> Iterator for Iter<T> {
    type Item = Rc<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let candidate = self.front.borrow().get_next(&self.order, self.version)?;
        if Rc::ptr_eq(&candidate, &self.back) {
            return None;
        }
        let value = candidate.borrow().get_value(&self.order, self.version);
        self.front = candidate;
        value
    }
}

impl<T> DoubleEndedIterator for Iter<T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let candidate = self.back.borrow().get_prev(&self.order, self.version)?;
        if Rc::ptr_eq(&candidate, &self.front) {
            return None;
        }
        let value = candidate.borrow().get_value(&self.order, self.version);
        self.back = candidate;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<T: Clone>(l: &PList<T>) -> Vec<T> {
        l.iter().map(|rc| (*rc).clone()).collect()
    }

    #[test]
    fn default_is_empty() {
        let l: PList<i32> = PList::new();
        assert!(l.empty());
        assert!(!l.has_undo());
    }

    #[test]
    fn front_back_get_on_empty_is_precondition_failure() {
        let l: PList<i32> = PList::new();
        assert!(matches!(l.front(), Err(ContractError::Precondition { .. })));
        assert!(matches!(l.back(), Err(ContractError::Precondition { .. })));
        assert!(matches!(l.get(0), Err(ContractError::Precondition { .. })));
        assert!(matches!(l.pop_front(), Err(ContractError::Precondition { .. })));
        assert!(matches!(l.pop_back(), Err(ContractError::Precondition { .. })));
    }

    #[test]
    fn push_and_iterate() {
        let l = PList::from_initializer([1, 2, 3, 4]);
        assert_eq!(values(&l), vec![1, 2, 3, 4]);
    }

    // --- insert/erase chained across sibling versions ---

    #[test]
    fn list_scenario() {
        let v1 = PList::from_initializer([1, 2, 3, 4]);
        let v2 = v1.insert(1, 5).expect("valid index");
        assert_eq!(values(&v2), vec![1, 5, 2, 3, 4]);

        let v3 = v1.insert(1, 6).expect("valid index");
        assert_eq!(values(&v3), vec![1, 6, 2, 3, 4]);
        assert_eq!(values(&v1), vec![1, 2, 3, 4]);

        let v4 = v2.insert(1, 7).expect("valid index");
        assert_eq!(values(&v4), vec![1, 7, 5, 2, 3, 4]);

        let back_to_v1 = v4.undo().expect("undo").undo().expect("undo");
        assert_eq!(values(&back_to_v1), vec![1, 2, 3, 4]);

        let forward_to_v2 = back_to_v1.redo().expect("redo");
        assert_eq!(values(&forward_to_v2), vec![1, 5, 2, 3, 4]);
    }

    #[test]
    fn push_pop_front_and_back() {
        let l = PList::from_initializer([1, 2, 3]);
        let l2 = l.push_front(0).push_back(4);
        assert_eq!(values(&l2), vec![0, 1, 2, 3, 4]);
        let l3 = l2.pop_front().expect("non-empty").pop_back().expect("non-empty");
        assert_eq!(values(&l3), vec![1, 2, 3]);
        assert_eq!(values(&l), vec![1, 2, 3]);
    }

    #[test]
    fn set_does_not_mutate_receiver() {
        let l0 = PList::from_initializer([1, 2, 3]);
        let l1 = l0.set(1, 20).expect("valid index");
        assert_eq!(values(&l0), vec![1, 2, 3]);
        assert_eq!(values(&l1), vec![1, 20, 3]);
    }

    #[test]
    fn equality_is_elementwise() {
        let a = PList::from_initializer([1, 2, 3]);
        let b = PList::from_initializer([1, 2, 3]);
        let c = PList::from_initializer([1, 2, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn reverse_iteration_matches_forward_reversed() {
        let l = PList::from_initializer([1, 2, 3, 4, 5]);
        let fwd = values(&l);
        let back: Vec<i32> = l.iter().rev().map(|rc| *rc).collect();
        let mut expected = fwd.clone();
        expected.reverse();
        assert_eq!(back, expected);
    }

    #[test]
    fn history_invalidated_by_new_edit_after_undo() {
        let l0 = PList::from_initializer([1]);
        let l1 = l0.push_back(2);
        let back = l1.undo().expect("undo");
        assert!(back.has_redo());
        let diverged = back.push_back(3);
        assert!(!diverged.has_redo());
    }

    #[test]
    fn fat_node_overflow_forces_node_split() {
        // Repeatedly mutate next to the same node (by always touching the
        // front) past MAX_SIZE_FAT_NODE to force `set_next_at`'s fork path.
        let mut l = PList::from_initializer([0]);
        for i in 1..30 {
            l = l.push_front(i);
        }
        assert_eq!(l.size(), 30);
        let mut expected: Vec<i32> = (1..30).rev().collect();
        expected.push(0);
        assert_eq!(values(&l), expected);
    }

    #[test]
    fn repeated_set_at_front_never_forks_the_sentinel() {
        // `set(0, ..)` repeatedly forks the value node just after `head`
        // once its own fat-node cap fills, relinking `head.next` each time;
        // `head` itself is a sentinel and is exempt from the cap, so it
        // absorbs all of those relinks without ever forking on its own.
        let mut l = PList::from_initializer([0, 1, 2]);
        for i in 1..30 {
            l = l.set(0, i).expect("valid index");
        }
        assert_eq!(values(&l), vec![29, 1, 2]);
    }

    #[test]
    fn many_push_backs_drop_without_overflow() {
        let mut l = PList::new();
        for i in 0..20_000 {
            l = l.push_back(i);
        }
        assert_eq!(l.size(), 20_000);
        drop(l);
    }

    // --- Universally-quantified properties ---

    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Insert(usize, i32),
        Erase(usize),
        PushFront(i32),
        PushBack(i32),
        PopFront,
        PopBack,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..40, any::<i32>()).prop_map(|(i, v)| Op::Insert(i, v)),
            (0usize..40).prop_map(Op::Erase),
            any::<i32>().prop_map(Op::PushFront),
            any::<i32>().prop_map(Op::PushBack),
            Just(Op::PopFront),
            Just(Op::PopBack),
        ]
    }

    fn apply(l: &PList<i32>, op: &Op) -> Option<PList<i32>> {
        match op {
            Op::Insert(i, v) => l.insert(*i % (l.size() + 1), *v).ok(),
            Op::Erase(i) => {
                if l.empty() {
                    None
                } else {
                    l.erase(*i % l.size()).ok()
                }
            }
            Op::PushFront(v) => Some(l.push_front(*v)),
            Op::PushBack(v) => Some(l.push_back(*v)),
            Op::PopFront => l.pop_front().ok(),
            Op::PopBack => l.pop_back().ok(),
        }
    }

    proptest! {
        #[test]
        fn persistence_receiver_unchanged(
            initial in proptest::collection::vec(any::<i32>(), 0..15),
            ops in proptest::collection::vec(op_strategy(), 0..25),
        ) {
            let mut l = PList::from_initializer(initial);
            for op in &ops {
                let before = values(&l);
                if let Some(next) = apply(&l, op) {
                    prop_assert_eq!(values(&l), before);
                    l = next;
                }
            }
        }

        #[test]
        fn undo_redo_round_trip(
            initial in proptest::collection::vec(any::<i32>(), 0..15),
            op in op_strategy(),
        ) {
            let l0 = PList::from_initializer(initial);
            if let Some(l1) = apply(&l0, &op) {
                if l1.has_undo() {
                    let undone = l1.undo().expect("has_undo");
                    prop_assert_eq!(values(&undone), values(&l0));
                    let redone = undone.redo().expect("has_redo after undo");
                    prop_assert_eq!(values(&redone), values(&l1));
                }
            }
        }
    }
}
