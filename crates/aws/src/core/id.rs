//! Identifiers

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger ID assigned to a WAL entry when it is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct WalId(Uuid);

impl WalId {
    /// Generate a new ledger ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wal_id_unique() {
        assert_ne!(WalId::new(), WalId::new());
    }

    #[test]
    fn test_wal_id_serializes_as_plain_uuid() {
        let id = WalId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        assert_eq!(serde_json::from_str::<WalId>(&json).unwrap(), id);
    }
}
