//! Persistent order-maintenance (list-labeling) structure shared by every
//! version of one `PList` lineage.
//!
//! Assigns a real-valued label to each integer version id so that
//! `less(a, b)` answers "was `a` created before `b` on the same path?" in
//! O(1), without needing to renumber every existing id on each insertion.
//! Labels are kept dense enough that ⅓/⅔ gap-splitting almost always
//! suffices; on the rare occasion a gap is exhausted, every label is
//! redistributed evenly.
//!
//! Unlike `PArray`/`PMap`, this structure is **not** persistent in the
//! immutable sense — it is a single shared, mutable side-table
//! (`Rc<RefCell<..>>`) that every `PList` sharing a lineage points to.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Bound of the labeling interval used when a full relabel is triggered.
const RELABEL_BOUND: f64 = 1e15;

struct OrderInner {
    /// Sequence of signed tokens in positional order. A positive `v`
    /// denotes version `v`'s own slot; `-v` denotes its companion slot
    /// immediately after it.
    sequence: Vec<i64>,
    /// Index of each token's position in `sequence`, kept in sync with it.
    position: HashMap<i64, usize>,
    /// Label of the `+v` slot, keyed by `v`.
    true_weight: HashMap<i64, f64>,
    /// Label of the `-v` slot, keyed by `v`.
    reverse_weight: HashMap<i64, f64>,
    next_id: i64,
}

impl OrderInner {
    fn new() -> Self {
        let mut true_weight = HashMap::new();
        true_weight.insert(0, 0.0);
        let mut position = HashMap::new();
        position.insert(0, 0);
        OrderInner {
            sequence: vec![0],
            position,
            true_weight,
            reverse_weight: HashMap::new(),
            next_id: 1,
        }
    }

    fn slot_index(&self, token: i64) -> usize {
        *self
            .position
            .get(&token)
            .expect("every token passed to slot_index was previously added to the order")
    }

    fn label_of(&self, v: i64) -> f64 {
        if v >= 0 {
            *self
                .true_weight
                .get(&v)
                .expect("version id must have been allocated by add()")
        } else {
            *self
                .reverse_weight
                .get(&(-v))
                .expect("version id must have been allocated by add()")
        }
    }

    fn rebuild_positions(&mut self) {
        self.position.clear();
        for (i, &tok) in self.sequence.iter().enumerate() {
            self.position.insert(tok, i);
        }
    }

    fn relabel_all(&mut self) {
        let n = self.sequence.len();
        let step = (2.0 * RELABEL_BOUND) / (n as f64 + 1.0);
        for (i, &token) in self.sequence.iter().enumerate() {
            let label = -RELABEL_BOUND + step * (i as f64 + 1.0);
            if token >= 0 {
                self.true_weight.insert(token, label);
            } else {
                self.reverse_weight.insert(-token, label);
            }
        }
    }

    fn add(&mut self, parent: i64) -> i64 {
        let new_id = self.next_id;
        self.next_id += 1;

        let parent_pos = self.slot_index(parent);
        self.sequence.insert(parent_pos + 1, new_id);
        self.sequence.insert(parent_pos + 2, -new_id);
        self.rebuild_positions();

        let before_label = self.label_of(parent);
        let after_label = if parent_pos + 3 < self.sequence.len() {
            let after_token = self.sequence[parent_pos + 3];
            self.label_of(after_token)
        } else {
            RELABEL_BOUND
        };

        let gap = after_label - before_label;
        let l1 = before_label + gap / 3.0;
        let l2 = before_label + gap * 2.0 / 3.0;

        if gap <= 0.0 || l1 <= before_label || l2 <= l1 || l2 >= after_label {
            self.relabel_all();
        } else {
            self.true_weight.insert(new_id, l1);
            self.reverse_weight.insert(new_id, l2);
        }

        new_id
    }

    fn less(&self, a: i64, b: i64) -> bool {
        self.label_of(a) < self.label_of(b)
    }
}

/// Shared handle to one lineage's order-maintenance structure.
///
/// Cloning an `Order` clones the handle, not the underlying table: every
/// clone observes the same labels, which is exactly what lets sibling
/// `PList` versions compare each other's element positions consistently.
pub(super) struct Order {
    inner: Rc<RefCell<OrderInner>>,
}

impl Clone for Order {
    fn clone(&self) -> Self {
        Order {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Order {
    /// Creates a fresh order seeded with a single root id (`0`).
    pub(super) fn new() -> Self {
        Order {
            inner: Rc::new(RefCell::new(OrderInner::new())),
        }
    }

    /// Allocates a new version id positioned immediately after `parent`.
    pub(super) fn add(&self, parent: i64) -> i64 {
        self.inner.borrow_mut().add(parent)
    }

    /// Whether `a`'s label precedes `b`'s. Negative arguments read the
    /// reverse label of their magnitude.
    pub(super) fn less(&self, a: i64, b: i64) -> bool {
        self.inner.borrow().less(a, b)
    }

    /// Finds the entry in `candidates` (version ids for which an entry was
    /// recorded) whose label is the greatest that is still `<= target`
    /// under this order. Returns its index into `candidates`.
    pub(super) fn greatest_at_most(&self, candidates: &[i64], target: i64) -> Option<usize> {
        let inner = self.inner.borrow();
        let target_label = inner.label_of(target);
        candidates
            .iter()
            .enumerate()
            .filter(|(_, &key)| inner.label_of(key) <= target_label)
            .max_by(|(_, &a), (_, &b)| {
                inner
                    .label_of(a)
                    .partial_cmp(&inner.label_of(b))
                    .expect("labels are always finite")
            })
            .map(|(idx, _)| idx)
    }
}
