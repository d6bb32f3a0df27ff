use std::collections::BTreeMap;
use std::ops::AddAssign;

use naming_types::IdentityKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{StoreError, StoreResult};

/// A generic row of a collaborator-owned table.
pub type Row = BTreeMap<String, Value>;

/// Column value used to store an identity key.
pub fn key_value(key: IdentityKey) -> Value {
    Value::from(key.get())
}

/// Read an identity key out of a column value. `Null` means no reference.
pub fn value_key(value: &Value) -> StoreResult<Option<IdentityKey>> {
    match value {
        Value::Null => Ok(None),
        other => other
            .as_u64()
            .and_then(IdentityKey::from_raw)
            .map(Some)
            .ok_or_else(|| {
                StoreError::InvariantViolation(format!("{} is not an identity key", other))
            }),
    }
}

/// Row counts touched by a merge rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteSummary {
    pub rewritten: usize,
    /// Rows dropped because the rewrite would have broken a uniqueness rule.
    pub deleted: usize,
}

impl AddAssign for RewriteSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.rewritten += rhs.rewritten;
        self.deleted += rhs.deleted;
    }
}
