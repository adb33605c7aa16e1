//! Fully persistent collections with shared undo/redo history.
//!
//! This crate provides three immutable collections — [`PArray`], [`PMap`]
//! and [`PList`] — whose mutating operations never modify the receiver;
//! each returns a new version that physically shares storage with its
//! predecessor. Every returned version also carries a [`HistoryManager`],
//! so any version lineage can walk backward and forward through its own
//! edit history independently of any other lineage derived from the same
//! ancestor.
//!
//! `persist-core` has no IO, no async runtime, and no knowledge of any
//! particular application: it is pure data and algorithms, safe to embed
//! in a CLI, a server, or a test harness alike.
//!
//! # Stability
//!
//! Every public item here is part of this crate's semver contract.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod array;
mod error;
mod history;
mod list;
mod map;
mod util;

pub(crate) use error::{assert_invariant, postcondition, precondition, safe_deref};

pub use array::{Iter as ArrayIter, PArray};
pub use error::ContractError;
pub use history::HistoryManager;
pub use list::{Iter as ListIter, PList};
pub use map::{Iter as MapIter, PMap};
