//! In-memory system of record for Hotshop.
//!
//! Backs tests and single-process development. Order transactions are
//! serialized behind one async mutex, which gives them the same isolation
//! the PostgreSQL backend gets from row locks and constraints.

mod storage;

pub use storage::{InMemoryOrderTransaction, InMemoryStorage};
