//! # BidGuard Security
//!
//! The business protection core: a multi-layer contact-information scanner,
//! a per-user progressive-escalation engine, and a multi-window cost circuit
//! breaker. Contact details crossing the platform boundary undetected, or
//! AI spend growing unbounded, are the two failure modes this crate exists
//! to prevent.
//!
//! Every component is an explicit instance with injected configuration,
//! store, and event bus. No module-level singletons.

pub mod audit;
pub mod breaker;
pub mod escalation;
pub mod rules;
pub mod scanner;

pub use audit::{AuditEntry, AuditEvent, AuditOutcome, AuditSink, SecurityAuditLog, TracingSink};
pub use breaker::CostCircuitBreaker;
pub use escalation::{EscalationMetrics, ViolationEscalationEngine};
pub use rules::default_rules;
pub use scanner::{ContentScanner, ScanContext};
