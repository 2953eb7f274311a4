//! # tally-vault
//!
//! File system side of tally. The vault is the system of record: the only
//! durable state is the counter stored in each document's own header.
//!
//! [`FrontmatterStore`] reads a document's header, merges a changed field
//! into it and writes the document back with its body untouched.

pub mod store;

pub use store::{BatchUpdateOutcome, FieldUpdate, FrontmatterStore};
