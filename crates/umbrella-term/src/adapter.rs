//! Protocol adapters
//!
//! A term policy covers a position held in some external protocol. The
//! adapter tells the book whether a position exists and what it is worth to
//! its holder; cover is never sold above that appraisal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use umbrella_common::{Amount, HolderId, Result};

/// Position in an external protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionRef {
    pub protocol: String,
    pub id: String,
}

impl PositionRef {
    pub fn new(protocol: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for PositionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.protocol, self.id)
    }
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Protocol this adapter speaks for
    fn protocol(&self) -> &str;

    /// Whether the position exists and may be covered
    async fn validate(&self, position: &PositionRef) -> Result<bool>;

    /// Current value of the position for `holder`
    async fn appraise(&self, holder: &HolderId, position: &PositionRef) -> Result<Amount>;
}

/// Adapter over a fixed table of appraisals
#[derive(Debug)]
pub struct FixedAppraiser {
    protocol: String,
    values: RwLock<HashMap<(HolderId, String), Amount>>,
    appraisals: AtomicUsize,
}

impl FixedAppraiser {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            values: RwLock::new(HashMap::new()),
            appraisals: AtomicUsize::new(0),
        }
    }

    /// Register or revalue a position
    pub fn set_value(&self, holder: &HolderId, position_id: &str, value: Amount) {
        self.values
            .write()
            .insert((*holder, position_id.to_string()), value);
    }

    pub fn remove(&self, holder: &HolderId, position_id: &str) {
        self.values.write().remove(&(*holder, position_id.to_string()));
    }

    /// Number of appraisals served so far
    pub fn appraisals(&self) -> usize {
        self.appraisals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolAdapter for FixedAppraiser {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn validate(&self, position: &PositionRef) -> Result<bool> {
        Ok(position.protocol == self.protocol
            && self.values.read().keys().any(|(_, id)| *id == position.id))
    }

    async fn appraise(&self, holder: &HolderId, position: &PositionRef) -> Result<Amount> {
        self.appraisals.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .values
            .read()
            .get(&(*holder, position.id.clone()))
            .copied()
            .unwrap_or(0))
    }
}
