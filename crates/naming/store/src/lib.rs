//! Naming layer storage.
//!
//! This crate defines the storage contract of the identity directory:
//! - the identity table and the identifier index
//! - the insert-only successor table
//! - collaborator tables that reference identity keys, declared through
//!   [`ReferenceOwner`] so merges can rewrite them
//!
//! Writes are transactional: a merge touches many rows and must either land
//! completely or not at all. The in-memory backend is the reference
//! implementation; durable engines implement the same traits.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
mod reference;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryIdentityStore, InMemoryTransaction};
pub use model::{key_value, value_key, RewriteSummary, Row};
pub use reference::{ColumnReference, ReferenceColumn, ReferenceOwner, ReferenceRegistry};
pub use traits::{IdentityStore, StoreTransaction};
