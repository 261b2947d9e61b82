//! Engine configuration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use umbrella_common::{units, Amount, Result, StrategyId, UmbrellaError, SECONDS_PER_WEEK};

use crate::premium::{PremiumCalculator, PremiumRate};

/// Environment variable prefix, e.g. `UMBRELLA_CHARGE_CYCLE_SECS`
pub const ENV_PREFIX: &str = "UMBRELLA";

/// When billing may draw on reward points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardPointsGating {
    /// Points are always honored
    Always,
    /// Points are honored only once `premium_paid >= referral_threshold`
    AfterThreshold,
}

/// Subscription engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity scope this engine admits cover against
    pub strategy: StrategyId,
    /// Premium per unit cover per second, numerator
    pub rate_numerator: u64,
    /// Premium per unit cover per second, denominator
    pub rate_denominator: u64,
    /// Billing epoch length
    pub charge_cycle_secs: u64,
    /// Wait after deactivation before the full balance is withdrawable
    pub cooldown_period_secs: u64,
    /// Reward points granted to each side of a referral, in whole units
    pub referral_reward: Decimal,
    /// Premium paid before reward points are honored, in whole units
    pub referral_threshold: Decimal,
    pub referrals_enabled: bool,
    pub reward_points_gating: RewardPointsGating,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyId::default(),
            // 10% of cover per year
            rate_numerator: 1,
            rate_denominator: 315_360_000,
            charge_cycle_secs: SECONDS_PER_WEEK,
            cooldown_period_secs: SECONDS_PER_WEEK,
            referral_reward: Decimal::from(50),
            referral_threshold: Decimal::from(100),
            referrals_enabled: true,
            reward_points_gating: RewardPointsGating::AfterThreshold,
        }
    }
}

impl EngineConfig {
    /// Load from `.env`, an optional config file, then `UMBRELLA_*` variables
    ///
    /// Later sources override earlier ones; unset fields keep their defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| UmbrellaError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.rate_denominator == 0 {
            return Err(UmbrellaError::Config(
                "rate_denominator must be non-zero".into(),
            ));
        }
        if self.charge_cycle_secs == 0 {
            return Err(UmbrellaError::Config(
                "charge_cycle_secs must be non-zero".into(),
            ));
        }
        self.referral_reward_amount()?;
        self.referral_threshold_amount()?;
        Ok(())
    }

    pub fn rate(&self) -> Result<PremiumRate> {
        PremiumRate::new(self.rate_numerator as u128, self.rate_denominator as u128)
    }

    pub fn calculator(&self) -> Result<PremiumCalculator> {
        Ok(PremiumCalculator::new(self.rate()?, self.charge_cycle_secs))
    }

    pub fn referral_reward_amount(&self) -> Result<Amount> {
        Ok(units::from_decimal(self.referral_reward)?)
    }

    pub fn referral_threshold_amount(&self) -> Result<Amount> {
        Ok(units::from_decimal(self.referral_threshold)?)
    }
}
