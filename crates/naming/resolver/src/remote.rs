//! Collaborators that talk to other hosts.

use async_trait::async_trait;
use naming_types::{HostIdentifier, IdentityQuery, QueryResponse, SignedReply};

use crate::error::{RemoteError, VerificationError};

/// Sends identity queries to remote hosts.
#[async_trait]
pub trait RemoteIdentityClient: Send + Sync {
    /// Ask `host` about `query.subject`. Returns `NotFound` when the host
    /// denies knowing the subject.
    async fn query(
        &self,
        host: &HostIdentifier,
        query: &IdentityQuery,
    ) -> Result<QueryResponse, RemoteError>;
}

/// Accepts or rejects the signature of a reply.
pub trait ReplyVerifier: Send + Sync {
    fn verify(&self, reply: &SignedReply) -> Result<(), VerificationError>;
}
