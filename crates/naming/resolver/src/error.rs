//! Resolver error types

use naming_store::StoreError;
use naming_types::{IdentifierError, Identifier};
use thiserror::Error;

/// Failures reported by the remote identity transport. Propagated unchanged;
/// retries and backoff belong to the transport.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

/// A signed reply the verifier refused.
#[derive(Debug, Clone, Error)]
#[error("signature rejected: {0}")]
pub struct VerificationError(pub String);

/// Resolver errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The queried host denies knowledge of the identifier.
    #[error("identity not found: {0}")]
    IdentityNotFound(Identifier),

    /// A predecessor, successor or category claim did not hold up.
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The enclosing transaction has been rolled back.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),

    /// A registered reference or key points at a missing identity.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("timed out waiting for the establishment of {0}")]
    EstablishmentTimeout(Identifier),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ResolveError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ResolveError::InvalidDeclaration(message.into())
    }

    /// The claim was refused; retrying will not change the answer.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResolveError::InvalidDeclaration(_) | ResolveError::IdentityNotFound(_)
        )
    }

    /// Retrying the whole resolution may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResolveError::Remote(_) | ResolveError::Store(_) | ResolveError::EstablishmentTimeout(_)
        )
    }

    /// The directory is inconsistent; callers must halt rather than continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResolveError::IntegrityViolation(_))
    }
}

/// Result type for resolver operations
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
