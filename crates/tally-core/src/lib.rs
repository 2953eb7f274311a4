//! # tally-core
//!
//! Core types for tally, which counts how often vault documents are opened
//! and stores the count in each document's frontmatter.
//!
//! This crate defines the types shared by all other tally crates:
//! - [`DocumentRef`] and [`AccessRecord`]
//! - [`UpdateOperation`], [`Priority`], [`ProcessResult`]
//! - [`TrackerConfig`] and [`FilterRules`]
//! - Error type ([`TallyError`], [`FrontmatterError`])
//! - Frontmatter header codec ([`frontmatter`])

pub mod config;
pub mod document;
pub mod error;
pub mod frontmatter;
pub mod operation;

pub use config::{FilterRules, TrackerConfig};
pub use document::{AccessRecord, DocumentCount, DocumentRef};
pub use error::{ErrorKind, FrontmatterError, HeaderOperation, Result, TallyError};
pub use frontmatter::{FieldValue, Header};
pub use operation::{FailedOperation, Priority, ProcessResult, UpdateOperation, MAX_RETRIES};
