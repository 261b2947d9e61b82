//! Prometheus metrics for the engine

use prometheus::{Gauge, IntCounter, Registry};
use umbrella_common::{Amount, WAD};

pub struct EngineMetrics {
    pub policies_activated: IntCounter,
    pub policies_deactivated: IntCounter,
    pub premium_charged: IntCounter,
    pub partial_charges: IntCounter,
    pub claims_submitted: IntCounter,
    pub active_cover: Gauge,
}

impl EngineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            policies_activated: IntCounter::new(
                "umbrella_policies_activated_total",
                "Total policy activations",
            )?,
            policies_deactivated: IntCounter::new(
                "umbrella_policies_deactivated_total",
                "Total policy deactivations, voluntary and forced",
            )?,
            premium_charged: IntCounter::new(
                "umbrella_premium_charged_total",
                "Total premium charge events",
            )?,
            partial_charges: IntCounter::new(
                "umbrella_partial_charges_total",
                "Total charges that exhausted the holder's funds",
            )?,
            claims_submitted: IntCounter::new(
                "umbrella_claims_submitted_total",
                "Total claims paid out",
            )?,
            active_cover: Gauge::new(
                "umbrella_active_cover",
                "Active cover limit in whole units",
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.policies_activated.clone()))?;
        registry.register(Box::new(self.policies_deactivated.clone()))?;
        registry.register(Box::new(self.premium_charged.clone()))?;
        registry.register(Box::new(self.partial_charges.clone()))?;
        registry.register(Box::new(self.claims_submitted.clone()))?;
        registry.register(Box::new(self.active_cover.clone()))?;
        Ok(())
    }

    pub fn set_active_cover(&self, active: Amount) {
        self.active_cover.set(active as f64 / WAD as f64);
    }
}
