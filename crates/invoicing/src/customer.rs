use serde::{Deserialize, Serialize};

use keel_core::{AggregateId, DomainError, DomainResult};

/// Customer as referenced from billing documents.
///
/// Customer master data lives outside this module, so documents carry the id
/// and a name snapshot taken when they were created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRef {
    pub customer_id: AggregateId,
    pub name: String,
}

impl CustomerRef {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("customer name cannot be empty"));
        }
        Ok(())
    }
}
