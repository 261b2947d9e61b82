//! Identifiers for holders, policies and capacity scopes

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{AuthorizationError, UmbrellaError};

/// Policyholder identity: the holder's Ed25519 verifying key bytes
///
/// Ordering is byte-wise and defines the global lock order used when an
/// operation has to hold more than one holder's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HolderId(pub [u8; 32]);

impl HolderId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse the identity back into a key usable for signature checks
    pub fn verifying_key(&self) -> Result<VerifyingKey, UmbrellaError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| AuthorizationError::InvalidSignature.into())
    }

    /// Short form for log fields
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl From<&VerifyingKey> for HolderId {
    fn from(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Opaque policy identifier, assigned on first activation and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyId(pub u64);

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "policy#{}", self.0)
    }
}

/// Capacity scope of a covered product or strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyId(pub String);

impl StrategyId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StrategyId {
    fn default() -> Self {
        Self::new("default")
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
