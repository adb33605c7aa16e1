//! `PMap`: a persistent hash array mapped trie (HAMT) with path copying.
//!
//! Every mutation rebuilds only the nodes on the path from the root to the
//! changed leaf; everything else is shared with the receiver. Unlike
//! `PArray`, no node is ever mutated in place once built, so the tree needs
//! no interior mutability and its destructor is the ordinary derived one —
//! trie depth is bounded by [`MAX_DEPTH`], so recursive drop can never
//! blow the stack here.
//!
//! All types in this module are **stable** and covered by semantic
//! versioning.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::history::HistoryManager;
use crate::util::{erased_at, inserted_at, replaced_at};
use crate::{precondition, ContractError};

/// Bits of hash consumed per trie level.
const BIT_SIZE: u32 = 5;
/// Children per `Bitmap` node (`2^BIT_SIZE`).
const CAPACITY: u32 = 1 << BIT_SIZE;
/// Deepest level before leaves sharing a full hash fall back to a
/// `Collision` list, derived from the hash width the same way the source
/// does: `word_bits / BitSize - 1`.
const MAX_DEPTH: usize = (u64::BITS as usize) / (BIT_SIZE as usize) - 1;

fn hash_of<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn level_bits(hash: u64, level: usize) -> u32 {
    ((hash >> (BIT_SIZE as usize * level)) & (CAPACITY as u64 - 1)) as u32
}

type MapNode<K, V> = Rc<MapNodeImpl<K, V>>;

enum MapNodeImpl<K, V> {
    Value(Rc<K>, Rc<V>, u64),
    Bitmap(u32, Vec<MapNode<K, V>>),
    Collision(Vec<MapNode<K, V>>),
}

/// Outcome of a trie traversal, used to adjust the map's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// The tree grew or shrank by one entry.
    Resized,
    /// An existing key's value was replaced; size unchanged.
    ModifiedExisting,
    /// The operation was a no-op.
    Unchanged,
}

fn make_leaf<K, V>(key: Rc<K>, value: Rc<V>, hash: u64) -> MapNode<K, V> {
    Rc::new(MapNodeImpl::Value(key, value, hash))
}

/// Builds the subtree holding both `old` (a `Value` leaf) and a new
/// `(key, value)` pair that collided with it at `level`.
fn resolve_collision<K: Eq, V>(
    old: MapNode<K, V>,
    old_hash: u64,
    key: Rc<K>,
    value: Rc<V>,
    hash: u64,
    level: usize,
) -> MapNode<K, V> {
    if level > MAX_DEPTH {
        return Rc::new(MapNodeImpl::Collision(vec![old, make_leaf(key, value, hash)]));
    }
    let old_bit = level_bits(old_hash, level);
    let new_bit = level_bits(hash, level);
    if old_bit == new_bit {
        let child = resolve_collision(old, old_hash, key, value, hash, level + 1);
        Rc::new(MapNodeImpl::Bitmap(1 << old_bit, vec![child]))
    } else {
        let new_leaf = make_leaf(key, value, hash);
        let bitmap = (1 << old_bit) | (1 << new_bit);
        let children = if old_bit < new_bit {
            vec![old, new_leaf]
        } else {
            vec![new_leaf, old]
        };
        Rc::new(MapNodeImpl::Bitmap(bitmap, children))
    }
}

fn insert<K: Eq, V>(
    node: &MapNode<K, V>,
    level: usize,
    key: &Rc<K>,
    value: &Rc<V>,
    hash: u64,
    replace: bool,
) -> (MapNode<K, V>, Status) {
    match &**node {
        MapNodeImpl::Value(k, _, _) => {
            if **k == **key {
                if replace {
                    (make_leaf(Rc::clone(key), Rc::clone(value), hash), Status::ModifiedExisting)
                } else {
                    (Rc::clone(node), Status::Unchanged)
                }
            } else {
                let old_hash = match &**node {
                    MapNodeImpl::Value(_, _, h) => *h,
                    _ => unreachable!(),
                };
                (
                    resolve_collision(Rc::clone(node), old_hash, Rc::clone(key), Rc::clone(value), hash, level),
                    Status::Resized,
                )
            }
        }
        MapNodeImpl::Bitmap(bitmap, children) => {
            let bit = level_bits(hash, level);
            let mask = 1u32 << bit;
            if bitmap & mask == 0 {
                let idx = (bitmap & (mask - 1)).count_ones() as usize;
                let leaf = make_leaf(Rc::clone(key), Rc::clone(value), hash);
                let new_children = inserted_at(children, idx, leaf);
                (Rc::new(MapNodeImpl::Bitmap(bitmap | mask, new_children)), Status::Resized)
            } else {
                let idx = (bitmap & (mask - 1)).count_ones() as usize;
                let (new_child, status) = insert(&children[idx], level + 1, key, value, hash, replace);
                let new_children = replaced_at(children, idx, new_child);
                (Rc::new(MapNodeImpl::Bitmap(*bitmap, new_children)), status)
            }
        }
        MapNodeImpl::Collision(children) => {
            let existing = children.iter().position(|c| match &**c {
                MapNodeImpl::Value(k, _, _) => **k == **key,
                _ => false,
            });
            match existing {
                Some(pos) if replace => {
                    let mut new_children = erased_at(children, pos);
                    new_children.push(make_leaf(Rc::clone(key), Rc::clone(value), hash));
                    (Rc::new(MapNodeImpl::Collision(new_children)), Status::ModifiedExisting)
                }
                Some(_) => (Rc::clone(node), Status::Unchanged),
                None => {
                    let mut new_children = children.clone();
                    new_children.push(make_leaf(Rc::clone(key), Rc::clone(value), hash));
                    (Rc::new(MapNodeImpl::Collision(new_children)), Status::Resized)
                }
            }
        }
    }
}

fn erase<K: Eq, V>(node: &MapNode<K, V>, level: usize, key: &K, hash: u64) -> (Option<MapNode<K, V>>, Status) {
    match &**node {
        MapNodeImpl::Value(k, _, _) => {
            if k.as_ref() == key {
                (None, Status::Resized)
            } else {
                (Some(Rc::clone(node)), Status::Unchanged)
            }
        }
        MapNodeImpl::Bitmap(bitmap, children) => {
            let bit = level_bits(hash, level);
            let mask = 1u32 << bit;
            if bitmap & mask == 0 {
                return (Some(Rc::clone(node)), Status::Unchanged);
            }
            let idx = (bitmap & (mask - 1)).count_ones() as usize;
            let (child_result, status) = erase(&children[idx], level + 1, key, hash);
            if status == Status::Unchanged {
                return (Some(Rc::clone(node)), Status::Unchanged);
            }
            match child_result {
                None if children.len() == 1 => (None, Status::Resized),
                None if children.len() == 2 => {
                    let remaining = &children[1 - idx];
                    (Some(Rc::clone(remaining)), Status::Resized)
                }
                None => {
                    let new_children = erased_at(children, idx);
                    (Some(Rc::new(MapNodeImpl::Bitmap(bitmap & !mask, new_children))), Status::Resized)
                }
                Some(new_child) => {
                    let new_children = replaced_at(children, idx, new_child);
                    (Some(Rc::new(MapNodeImpl::Bitmap(*bitmap, new_children))), Status::Resized)
                }
            }
        }
        MapNodeImpl::Collision(children) => {
            let pos = children.iter().position(|c| match &**c {
                MapNodeImpl::Value(k, _, _) => k.as_ref() == key,
                _ => false,
            });
            match pos {
                None => (Some(Rc::clone(node)), Status::Unchanged),
                Some(pos) => {
                    let new_children = erased_at(children, pos);
                    if new_children.len() == 1 {
                        (Some(Rc::clone(&new_children[0])), Status::Resized)
                    } else {
                        (Some(Rc::new(MapNodeImpl::Collision(new_children))), Status::Resized)
                    }
                }
            }
        }
    }
}

fn search<'a, K: Eq, V>(node: &'a MapNode<K, V>, level: usize, key: &K, hash: u64) -> Option<&'a MapNode<K, V>> {
    match &**node {
        MapNodeImpl::Value(k, _, _) => {
            if k.as_ref() == key {
                Some(node)
            } else {
                None
            }
        }
        MapNodeImpl::Bitmap(bitmap, children) => {
            let bit = level_bits(hash, level);
            let mask = 1u32 << bit;
            if bitmap & mask == 0 {
                None
            } else {
                let idx = (bitmap & (mask - 1)).count_ones() as usize;
                search(&children[idx], level + 1, key, hash)
            }
        }
        MapNodeImpl::Collision(children) => children.iter().find_map(|c| match &**c {
            MapNodeImpl::Value(k, _, _) if k.as_ref() == key => Some(c),
            _ => None,
        }),
    }
}

struct MapSnapshot<K, V> {
    size: usize,
    root: Option<MapNode<K, V>>,
}

impl<K, V> Clone for MapSnapshot<K, V> {
    fn clone(&self) -> Self {
        MapSnapshot {
            size: self.size,
            root: self.root.clone(),
        }
    }
}

/// A fully persistent hash map with undo/redo history.
pub struct PMap<K, V> {
    size: usize,
    root: Option<MapNode<K, V>>,
    history: HistoryManager<MapSnapshot<K, V>>,
}

impl<K, V> Clone for PMap<K, V> {
    fn clone(&self) -> Self {
        PMap {
            size: self.size,
            root: self.root.clone(),
            history: self.history.clone(),
        }
    }
}

impl<K, V> Default for PMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> PMap<K, V> {
    /// Creates a new, empty map.
    #[must_use]
    pub fn new() -> Self {
        PMap {
            size: 0,
            root: None,
            history: HistoryManager::new(),
        }
    }

    /// Builds a map from a sequence of pairs, first-wins on duplicate keys.
    ///
    /// The constructed map reports no undo, matching the contract that an
    /// initializer-list construction is a fresh base version, not a replay
    /// of however many inserts it took to build it.
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Hash + Eq,
    {
        let mut size = 0usize;
        let mut root: Option<MapNode<K, V>> = None;
        for (k, v) in pairs {
            let key = Rc::new(k);
            let value = Rc::new(v);
            let hash = hash_of(&*key);
            let (new_root, status) = match &root {
                None => (make_leaf(key, value, hash), Status::Resized),
                Some(r) => insert(r, 0, &key, &value, hash, false),
            };
            root = Some(new_root);
            if status == Status::Resized {
                size += 1;
            }
        }
        PMap {
            size,
            root,
            history: HistoryManager::new(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.size == 0
    }

    /// Looks up `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Rc<V>>
    where
        K: Hash + Eq,
    {
        let root = self.root.as_ref()?;
        let hash = hash_of(key);
        match &**search(root, 0, key, hash)? {
            MapNodeImpl::Value(_, v, _) => Some(Rc::clone(v)),
            _ => None,
        }
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool
    where
        K: Hash + Eq,
    {
        self.get(key).is_some()
    }

    /// Returns a new map with `key` bound to `value`.
    ///
    /// If `key` is already present: replaces the value when `replace` is
    /// `true`, otherwise leaves the map unchanged (size stays the same
    /// either way).
    #[must_use]
    pub fn insert(&self, key: K, value: V, replace: bool) -> Self
    where
        K: Hash + Eq,
    {
        let key = Rc::new(key);
        let value = Rc::new(value);
        let hash = hash_of(&*key);
        let (new_root, status) = match &self.root {
            None => (make_leaf(Rc::clone(&key), Rc::clone(&value), hash), Status::Resized),
            Some(r) => insert(r, 0, &key, &value, hash, replace),
        };
        let new_size = if status == Status::Resized { self.size + 1 } else { self.size };
        let history = self.history.push(
            MapSnapshot {
                size: self.size,
                root: self.root.clone(),
            },
            MapSnapshot {
                size: new_size,
                root: Some(Rc::clone(&new_root)),
            },
        );
        PMap {
            size: new_size,
            root: Some(new_root),
            history,
        }
    }

    /// Returns a new map with `key` removed, if present.
    #[must_use]
    pub fn erase(&self, key: &K) -> Self
    where
        K: Hash + Eq,
    {
        let (new_root, status) = match &self.root {
            None => (None, Status::Unchanged),
            Some(r) => erase(r, 0, key, hash_of(key)),
        };
        let new_size = if status == Status::Resized { self.size - 1 } else { self.size };
        let history = self.history.push(
            MapSnapshot {
                size: self.size,
                root: self.root.clone(),
            },
            MapSnapshot {
                size: new_size,
                root: new_root.clone(),
            },
        );
        PMap {
            size: new_size,
            root: new_root,
            history,
        }
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
        Ok(PMap {
            size: snapshot.size,
            root: snapshot.root,
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
        Ok(PMap {
            size: snapshot.size,
            root: snapshot.root,
            history,
        })
    }

    /// A forward, depth-first iterator over `(key, value)` pairs, in no
    /// particular order with respect to keys.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            stack: self.root.iter().collect(),
        }
    }
}

impl<K: Hash + Eq, V: PartialEq> PartialEq for PMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
            && self
                .iter()
                .all(|(k, v)| other.get(&k).is_some_and(|ov| *ov == *v))
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for (k, v) in self.iter() {
            m.entry(&*k, &*v);
        }
        m.finish()
    }
}

/// Depth-first, forward iterator over a [`PMap`]'s entries.
pub struct Iter<'a, K, V> {
    stack: Vec<&'a MapNode<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (Rc<K>, Rc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match &**node {
                MapNodeImpl::Value(k, v, _) => return Some((Rc::clone(k), Rc::clone(v))),
                MapNodeImpl::Bitmap(_, children) | MapNodeImpl::Collision(children) => {
                    self.stack.extend(children.iter().rev());
                }
            }
        }
        None
    }
}

impl<'a, K, V> IntoIterator for &'a PMap<K, V> {
    type Item = (Rc<K>, Rc<V>);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
