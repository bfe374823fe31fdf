//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a tenant (the isolation boundary for all data).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

/// Identifier of a user (actor identity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of an aggregate root.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new time-ordered (UUIDv7) identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(TenantId, "TenantId");
impl_uuid_newtype!(UserId, "UserId");
impl_uuid_newtype!(AggregateId, "AggregateId");

impl AggregateId {
    /// Deterministic (UUIDv5) id for an aggregate that exists at most once per
    /// `(tenant, kind, key)`, e.g. the payroll run of a period.
    ///
    /// Deriving the id instead of generating it turns a repeated create into a
    /// conflict on the same stream.
    pub fn derived(tenant_id: TenantId, kind: &str, key: &str) -> Self {
        let name = format!("{kind}:{key}");
        Self(Uuid::new_v5(tenant_id.as_uuid(), name.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_stable_per_tenant_and_key() {
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        let a = AggregateId::derived(t1, "payroll.run", "2024-02");
        let b = AggregateId::derived(t1, "payroll.run", "2024-02");
        let c = AggregateId::derived(t1, "payroll.run", "2024-03");
        let d = AggregateId::derived(t2, "payroll.run", "2024-02");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn parse_errors_name_the_id_type() {
        match "nope".parse::<TenantId>() {
            Err(DomainError::InvalidId(msg)) => assert!(msg.starts_with("TenantId")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
