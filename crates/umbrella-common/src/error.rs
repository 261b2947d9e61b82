//! Error types for Umbrella
//!
//! Provides a unified error type and the domain-specific kinds every
//! lifecycle operation can surface to its caller.

use thiserror::Error;

use crate::types::units::Amount;

/// Result type alias using UmbrellaError
pub type Result<T> = std::result::Result<T, UmbrellaError>;

/// Unified error type for Umbrella operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UmbrellaError {
    // Admission errors
    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    // Authorization errors
    #[error("Authorization failed: {0}")]
    Authorization(#[from] AuthorizationError),

    // Policy state errors
    #[error("Policy state error: {0}")]
    State(#[from] PolicyStateError),

    // Balance errors
    #[error("Balance error: {0}")]
    Balance(#[from] BalanceError),

    // Arithmetic errors
    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),

    // External collaborator failures (funds ledger, risk budget, oracle)
    #[error("Collaborator call failed: {0}")]
    Collaborator(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Malformed input
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Coarse classification used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Deterministic rejection; adjust inputs
    Admission,
    /// Wrong identity or missing role; re-authenticate
    Authorization,
    /// Caller operated on stale state; refresh and retry
    State,
    /// Not enough withdrawable funds
    Balance,
    /// Implementation defect, never user-recoverable
    Fatal,
    /// External dependency failed; whole operation aborted
    Collaborator,
    /// Misconfiguration
    Config,
    /// Malformed request
    Validation,
}

impl UmbrellaError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            UmbrellaError::Admission(_) => ErrorKind::Admission,
            UmbrellaError::Authorization(_) => ErrorKind::Authorization,
            UmbrellaError::State(_) => ErrorKind::State,
            UmbrellaError::Balance(_) => ErrorKind::Balance,
            UmbrellaError::Arithmetic(_) => ErrorKind::Fatal,
            UmbrellaError::Collaborator(_) => ErrorKind::Collaborator,
            UmbrellaError::Config(_) => ErrorKind::Config,
            UmbrellaError::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// Admission errors, checked before any state mutation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Cover value must be greater than zero")]
    ZeroCoverValue,

    #[error("Insufficient capacity: requested increase {requested}, available {available}")]
    InsufficientCapacity { requested: Amount, available: Amount },

    #[error("Insufficient deposit: required more than {required}, provided {provided}")]
    InsufficientDeposit { required: Amount, provided: Amount },

    #[error("Cover period outside the allowed range")]
    InvalidDuration,

    #[error("Position failed protocol validation")]
    InvalidPosition,
}

/// Authorization errors; never retried automatically
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Caller is not the policyholder")]
    NotPolicyHolder,

    #[error("Policy belongs to a different product")]
    WrongProduct,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Caller lacks the {role} role")]
    NotAuthorizedRole { role: String },

    #[error("Signer is not authorized")]
    UnauthorizedSigner,

    #[error("Cannot use own referral code")]
    SelfReferral,

    #[error("Policies are non-transferable")]
    NonTransferable,
}

/// Policy state errors; the caller is working from stale assumptions
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyStateError {
    #[error("Policy is already active")]
    PolicyAlreadyActive,

    #[error("Policy is not active")]
    PolicyInactive,

    #[error("Policy has expired")]
    PolicyExpired,

    #[error("Policy does not exist")]
    InvalidPolicy,

    #[error("Product is paused")]
    ProductPaused,

    #[error("Claim deadline has passed")]
    ClaimDeadlinePassed,

    #[error("Claim amount exceeds cover limit")]
    ClaimExceedsCover,

    #[error("Referral code already used")]
    ReferralCodeUsed,

    #[error("Referral program is disabled")]
    ReferralsDisabled,

    #[error("Referrer has no active policy")]
    ReferrerInactive,
}

/// Balance errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("Insufficient balance: requested {requested}, withdrawable {withdrawable}")]
    InsufficientBalance {
        requested: Amount,
        withdrawable: Amount,
    },
}

/// Checked arithmetic failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Arithmetic underflow")]
    Underflow,

    #[error("Division by zero")]
    DivisionByZero,
}

impl From<serde_json::Error> for UmbrellaError {
    fn from(err: serde_json::Error) -> Self {
        UmbrellaError::Validation(err.to_string())
    }
}
