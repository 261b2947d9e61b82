//! # Umbrella Term
//!
//! Fixed-term position cover. A holder covers a position in an external
//! protocol for a chosen period, paying the whole premium up front. Cover is
//! clamped to the position's appraisal, reserved against the shared
//! capacity ledger, and released on cancellation, claim or expiry sweep.
//!
//! Premium math, capacity admission and claim validation come from
//! `umbrella-engine`; positions are checked and appraised through a
//! [`ProtocolAdapter`].

pub mod adapter;
pub mod book;
pub mod config;

pub use adapter::{FixedAppraiser, PositionRef, ProtocolAdapter};
pub use book::{SweepReport, TermBook, TermPolicy, TermReceipt};
pub use config::TermConfig;
