//! # Umbrella Common
//!
//! Shared types, errors, and signing primitives for the Umbrella cover
//! accounting engine.
//!
//! ## Core Types
//!
//! - [`HolderId`]: Ed25519 verifying key identifying a policyholder
//! - [`PolicyId`]: monotonically assigned policy identifier
//! - [`StrategyId`]: capacity scope of a covered product
//! - [`Amount`]: 18-decimal fixed point quantity (see [`units`])
//! - [`CoverEvent`]: observable state transitions
//!
//! ## Arithmetic
//!
//! - [`math`]: signed-delta application and overflow-checked premium math
//!
//! ## Crypto
//!
//! - [`crypto`]: claim and referral message digests, Ed25519 sign/verify

pub mod clock;
pub mod crypto;
pub mod error;
pub mod events;
pub mod math;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{ClaimSignature, ReferralCode};
pub use error::{
    AdmissionError, ArithmeticError, AuthorizationError, BalanceError, ErrorKind,
    PolicyStateError, Result, UmbrellaError,
};
pub use events::{CoverEvent, EventRecord};
pub use types::{
    ids::{HolderId, PolicyId, StrategyId},
    units::{self, Amount, WAD},
};

/// Umbrella version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seconds in a 365-day year
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Seconds in a week, the default charge cycle and cooldown period
pub const SECONDS_PER_WEEK: u64 = 604_800;
