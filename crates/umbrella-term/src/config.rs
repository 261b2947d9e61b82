//! Term product configuration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use umbrella_common::{
    units, Amount, Result, StrategyId, UmbrellaError, SECONDS_PER_WEEK, SECONDS_PER_YEAR,
};
use umbrella_engine::PremiumRate;

/// Environment variable prefix, e.g. `UMBRELLA_TERM_MAX_PERIOD_SECS`
pub const ENV_PREFIX: &str = "UMBRELLA_TERM";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TermConfig {
    pub strategy: StrategyId,
    /// Premium per unit cover per second, numerator
    pub rate_numerator: u64,
    /// Premium per unit cover per second, denominator
    pub rate_denominator: u64,
    /// Shortest period a policy may be bought or updated for
    pub min_period_secs: u64,
    /// Longest period a policy may run ahead of now
    pub max_period_secs: u64,
    /// Kept from the refund on cancellation, in whole units
    pub cancel_fee: Decimal,
}

impl Default for TermConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyId::new("term"),
            rate_numerator: 1,
            rate_denominator: 315_360_000,
            min_period_secs: SECONDS_PER_WEEK,
            max_period_secs: SECONDS_PER_YEAR,
            cancel_fee: Decimal::ZERO,
        }
    }
}

impl TermConfig {
    /// Load from `.env`, an optional config file, then `UMBRELLA_TERM_*`
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

    pub fn validate(&self) -> Result<()> {
        if self.rate_denominator == 0 {
            return Err(UmbrellaError::Config(
                "rate_denominator must be non-zero".into(),
            ));
        }
        if self.min_period_secs == 0 || self.min_period_secs > self.max_period_secs {
            return Err(UmbrellaError::Config(format!(
                "invalid period range {}..={}",
                self.min_period_secs, self.max_period_secs
            )));
        }
        self.cancel_fee_amount()?;
        Ok(())
    }

    pub fn rate(&self) -> Result<PremiumRate> {
        PremiumRate::new(self.rate_numerator as u128, self.rate_denominator as u128)
    }

    pub fn cancel_fee_amount(&self) -> Result<Amount> {
        Ok(units::from_decimal(self.cancel_fee)?)
    }

    pub fn period_allowed(&self, period_secs: u64) -> bool {
        (self.min_period_secs..=self.max_period_secs).contains(&period_secs)
    }
}
