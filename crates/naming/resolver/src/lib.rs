//! Naming layer resolver.
//!
//! Turns identifiers into identities. An identifier that is not yet mapped is
//! established by querying its host for a signed identity reply; the reply may
//! claim predecessors (the identity moved or absorbed earlier identities) or
//! name a successor (the identifier moved on). Claims are validated against
//! the predecessors' own hosts before anything is written, and each
//! establishment commits in one store transaction.
//!
//! ```text
//! resolve(id) ─► cache ─► store ─► establish ─┬─ host      ─► create
//!                                             ├─ internal  ─► validate ─► create / relocate / merge
//!                                             └─ external  ─► create uncertified / follow successor
//! ```
//!
//! Collaborators are injected: an [`IdentityStore`](naming_store::IdentityStore),
//! a [`RemoteIdentityClient`], a [`ReplyVerifier`] and the
//! [`ReferenceRegistry`](naming_store::ReferenceRegistry) used by merges.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
mod context;
mod error;
mod flight;
mod merger;
mod remote;
mod resolver;
pub mod telemetry;
mod validator;

pub use cache::IdentityCache;
pub use crate::config::{LoggingConfig, ResolverConfig, StoreMode};
pub use context::EstablishmentContext;
pub use error::{RemoteError, ResolveError, ResolveResult, VerificationError};
pub use flight::{EstablishmentGuard, EstablishmentLocks};
pub use merger::{MergeReport, Merger};
pub use remote::{RemoteIdentityClient, ReplyVerifier};
pub use resolver::{Establishment, EstablishmentState, ResolutionOutcome, Resolver};
pub use telemetry::init_tracing;
pub use validator::{PredecessorSource, PredecessorValidator, StagedPredecessor, ValidatedClaim};
