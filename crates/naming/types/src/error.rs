use thiserror::Error;

/// Syntactic identifier failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,

    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("invalid internal identifier: {0}")]
    InvalidInternal(String),

    #[error("unknown external scheme: {0}")]
    UnknownScheme(String),

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("invalid mobile number: {0}")]
    InvalidMobile(String),

    #[error("expected {expected} identifier, found {found}")]
    WrongVariant {
        expected: &'static str,
        found: String,
    },
}
