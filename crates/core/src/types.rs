use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque tenant identifier. Every business row carries one and every core
/// operation receives one; cross-tenant reads are never legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct TenantId(pub i64);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque run identifier shared by ingestion runs and recommendation runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Mints a fresh run identifier (hex uuid-v4, no hyphens).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity under which a core operation executes. Constructed by the caller
/// (CLI, scheduler, HTTP layer) after tenant resolution; the core never
/// derives it implicitly.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub caller_id: Option<i64>,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            caller_id: None,
        }
    }

    pub fn with_caller(tenant_id: TenantId, caller_id: i64) -> Self {
        Self {
            tenant_id,
            caller_id: Some(caller_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_unique_and_hex() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
