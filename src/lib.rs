//! arbor - hierarchical task trees with optimistic synchronization
//!
//! Projects own forests of arbitrarily deep task trees. Every edit is
//! computed by a pure tree algorithm, published locally at once, then
//! persisted to a remote store in the background and rolled back if the
//! store rejects it.
//!
//! # Core Concepts
//!
//! - **Tree algorithms**: immutable find/insert/update/delete/reparent
//! - **Progress** and **schedule cascade**: pure computations over a tree
//! - **State store**: the single published copy every view reads
//! - **Pipeline**: optimistic apply, persist, revert on failure
//! - **Remote store**: pluggable persistence (in-memory or file-backed)
//!
//! # Module Organization
//!
//! - `task`, `project`: data model and lenient document decoding
//! - `tree`, `progress`, `schedule`: pure algorithms
//! - `state`: registry of projects and groups plus the `StateStore`
//! - `remote`: `RemoteStore` trait, `MemoryStore`, `FileStore`
//! - `pipeline`: the `Engine` and its mutation entry points
//! - `backup`: full export and blocking import
//! - `events`: JSON-line sync events
//! - `config`: configuration loading from `.arbor.toml`
//! - `error`: error types and result aliases
//! - `storage`, `lock`: data home layout, file locking and atomic writes
//! - `cli`, `output`: command-line interface and output envelopes

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod project;
pub mod remote;
pub mod schedule;
pub mod state;
pub mod storage;
pub mod task;
pub mod tree;

pub use error::{Error, Result};
pub use pipeline::{Engine, Mutation, MutationKind, SyncSettings};
pub use remote::{FileStore, MemoryStore, RemoteStore};
