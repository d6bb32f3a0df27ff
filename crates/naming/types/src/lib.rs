//! Naming layer types.
//!
//! Identifiers are mutable human-typable names; identities are the stable
//! keyed records they resolve to. This crate holds the vocabulary shared by the
//! store and the resolver:
//! - identifier variants (host, internal, external) with syntactic validation
//! - the closed set of identity categories
//! - identity and succession records
//! - the identity query/reply messages exchanged with remote hosts

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod category;
mod error;
mod identifier;
mod identity;
mod message;

pub use category::Category;
pub use error::IdentifierError;
pub use identifier::{
    ExternalIdentifier, ExternalKind, HostIdentifier, Identifier, InternalIdentifier,
};
pub use identity::{Identity, IdentityKey, SuccessionRecord};
pub use message::{IdentityQuery, IdentityReply, QueryResponse, SignedReply};
