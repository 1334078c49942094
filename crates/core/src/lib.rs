//! # BidGuard Core
//!
//! Domain types, traits, and error definitions for the BidGuard business
//! protection core. This crate has **zero framework dependencies**: it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The persistent store and the event transport are defined as traits here.
//! Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Isolated, multi-tenant instantiation instead of hidden shared state

pub mod cost;
pub mod error;
pub mod event;
pub mod store;
pub mod violation;

// Re-export key types at crate root for ergonomics
pub use cost::{
    BreakerState, CostDecision, CostEvent, CostSnapshot, CostWarning, DenyReason, HourSlot,
};
pub use error::{CostError, Error, EscalationError, Result, StoreError};
pub use event::{EventBus, SecurityEvent};
pub use store::{CostStore, ViolationStore};
pub use violation::{
    AccountStatus, DetectionLayer, DetectionMethod, EnforcementAction, RiskLevel, ScanResult,
    Severity, UserViolationProfile, ViolationCategory, ViolationMatch, ViolationRecord,
};
