//! State carried through one top-level resolution.

use std::collections::HashMap;

use naming_types::{Identifier, SignedReply};

use crate::error::{ResolveError, ResolveResult};

/// Tracks the successor chain a resolution is following, so that cycles and
/// overlong chains are refused, and remembers the replies it has verified.
#[derive(Debug)]
pub struct EstablishmentContext {
    max_depth: usize,
    following: Vec<Identifier>,
    replies: HashMap<Identifier, SignedReply>,
}

impl EstablishmentContext {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            following: Vec::new(),
            replies: HashMap::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.following.len()
    }

    pub(crate) fn enter_following(&mut self, identifier: &Identifier) -> ResolveResult<()> {
        if self.following.contains(identifier) {
            return Err(ResolveError::invalid(format!(
                "successor cycle through {}",
                identifier
            )));
        }
        if self.depth() >= self.max_depth {
            return Err(ResolveError::invalid(format!(
                "establishment of {} exceeds depth {}",
                identifier, self.max_depth
            )));
        }
        self.following.push(identifier.clone());
        Ok(())
    }

    pub(crate) fn leave_following(&mut self, identifier: &Identifier) {
        if let Some(pos) = self.following.iter().rposition(|i| i == identifier) {
            self.following.remove(pos);
        }
    }

    pub(crate) fn cached_reply(&self, identifier: &Identifier) -> Option<SignedReply> {
        self.replies.get(identifier).cloned()
    }

    pub(crate) fn remember_reply(&mut self, reply: SignedReply) {
        self.replies.insert(reply.subject.clone(), reply);
    }
}
