//! Core data types for Umbrella

pub mod ids;
pub mod units;
