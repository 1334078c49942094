//! Violation domain model — scan output, violation records, user profiles,
//! and the enforcement action ladder.
//!
//! `ScanResult` and `ViolationMatch` are ephemeral (produced per scan,
//! never persisted). `ViolationRecord` is the immutable audit fact;
//! `UserViolationProfile` is the per-user aggregate whose persisted
//! `escalation_level` is the single source of truth for enforcement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Scan output ───────────────────────────────────────────────────────────

/// What kind of contact-sharing signal a match represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    /// A phone number in any delimiter style.
    PhoneNumber,
    /// An email address, standard or obfuscated.
    EmailAddress,
    /// A social media handle or platform reference.
    SocialHandle,
    /// A request to move communication off-platform.
    ContactIntent,
    /// The user providing their own contact details.
    ContactProvision,
    /// Contact data threaded through filler characters or spelled out.
    Obfuscated,
}

impl ViolationCategory {
    /// The placeholder substituted for a redacted match of this category.
    ///
    /// Placeholders contain no digits, no `@`, and no phrase any detection
    /// rule matches, so re-scanning redacted text yields no further matches.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::PhoneNumber => "[PHONE NUMBER BLOCKED]",
            Self::EmailAddress => "[EMAIL BLOCKED]",
            Self::SocialHandle => "[SOCIAL MEDIA BLOCKED]",
            Self::ContactIntent => "[CONTACT REQUEST BLOCKED]",
            Self::ContactProvision => "[CONTACT INFO BLOCKED]",
            Self::Obfuscated => "[CONTACT INFO BLOCKED]",
        }
    }

    /// Redaction priority when overlapping matches are merged.
    /// Higher wins the placeholder for the merged span.
    pub fn redaction_priority(&self) -> u8 {
        match self {
            Self::ContactProvision => 5,
            Self::PhoneNumber => 4,
            Self::EmailAddress => 3,
            Self::SocialHandle => 2,
            Self::Obfuscated => 1,
            Self::ContactIntent => 0,
        }
    }
}

impl std::fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhoneNumber => write!(f, "phone_number"),
            Self::EmailAddress => write!(f, "email_address"),
            Self::SocialHandle => write!(f, "social_handle"),
            Self::ContactIntent => write!(f, "contact_intent"),
            Self::ContactProvision => write!(f, "contact_provision"),
            Self::Obfuscated => write!(f, "obfuscated"),
        }
    }
}

/// Which detection layer produced a match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionLayer {
    /// Direct regex match on canonical formats.
    ExactPattern,
    /// Spelled-out digits, filler-separated digit runs, at/dot words.
    Obfuscation,
    /// Off-platform phrases and messaging-app mentions.
    Intent,
    /// Per-sentence request-vs-provision heuristics.
    Context,
}

/// A single detected contact-sharing signal. Ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationMatch {
    pub category: ViolationCategory,
    /// Byte offset of the match start (always on a char boundary).
    pub start: usize,
    /// Byte offset one past the match end.
    pub end: usize,
    /// The matched text.
    pub text: String,
    /// Fixed per-rule confidence in `[0, 1]`. Triage data only: a match
    /// at any confidence still counts as a violation.
    pub confidence: f64,
    pub detection_layer: DetectionLayer,
}

/// Aggregate risk of a scan.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// The result of scanning one piece of text. Deterministic in the input
/// (aside from `scanned_at`) and never an error: malformed input scans clean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub violations_found: bool,
    /// All matches across all layers, ordered by start offset.
    pub matches: Vec<ViolationMatch>,
    pub risk_level: RiskLevel,
    /// The input with every match replaced by its category placeholder.
    pub redacted_text: String,
    pub scanned_at: DateTime<Utc>,
}

impl ScanResult {
    /// A clean result for text with no violations.
    pub fn clean(text: &str) -> Self {
        Self {
            violations_found: false,
            matches: Vec::new(),
            risk_level: RiskLevel::Low,
            redacted_text: text.to_string(),
            scanned_at: Utc::now(),
        }
    }

    /// Distinct categories present in this scan.
    pub fn categories(&self) -> Vec<ViolationCategory> {
        let mut cats: Vec<ViolationCategory> = Vec::new();
        for m in &self.matches {
            if !cats.contains(&m.category) {
                cats.push(m.category);
            }
        }
        cats
    }
}

// ── Violations & enforcement ──────────────────────────────────────────────

/// Violation severity, mapped to escalation points by configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// How a violation was detected.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    #[default]
    Automated,
    ManualReview,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automated => write!(f, "automated"),
            Self::ManualReview => write!(f, "manual_review"),
        }
    }
}

/// The enforcement applied when a user reaches an escalation level.
///
/// `duration_hours = None` means the action is permanent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnforcementAction {
    /// Permanent record, no restriction; user is notified.
    Warning,
    /// User cannot message for the given duration.
    MessagingRestriction { duration_hours: Option<u32> },
    /// Account is fully suspended for the given duration.
    AccountSuspension { duration_hours: Option<u32> },
    /// Terminal; reversible only by administrative action.
    PermanentBan,
}

impl EnforcementAction {
    /// The account status this action moves a user to.
    /// A warning leaves the status untouched.
    pub fn target_status(&self) -> Option<AccountStatus> {
        match self {
            Self::Warning => None,
            Self::MessagingRestriction { .. } => Some(AccountStatus::Restricted),
            Self::AccountSuspension { .. } => Some(AccountStatus::Suspended),
            Self::PermanentBan => Some(AccountStatus::Banned),
        }
    }

    /// Restriction duration, if this action is temporary.
    pub fn duration_hours(&self) -> Option<u32> {
        match self {
            Self::MessagingRestriction { duration_hours }
            | Self::AccountSuspension { duration_hours } => *duration_hours,
            Self::Warning | Self::PermanentBan => None,
        }
    }
}

impl std::fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::MessagingRestriction { .. } => write!(f, "messaging_restriction"),
            Self::AccountSuspension { .. } => write!(f, "account_suspension"),
            Self::PermanentBan => write!(f, "permanent_ban"),
        }
    }
}

/// Per-user account standing. Advances monotonically under automatic
/// escalation; only an explicit administrative reset moves a user back
/// to `Active`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Restricted,
    Suspended,
    Banned,
}

impl AccountStatus {
    /// Ordering rank used to keep automatic transitions monotonic.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Restricted => 1,
            Self::Suspended => 2,
            Self::Banned => 3,
        }
    }

    /// The more severe of two statuses.
    pub fn max(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Restricted => write!(f, "restricted"),
            Self::Suspended => write!(f, "suspended"),
            Self::Banned => write!(f, "banned"),
        }
    }
}

/// The immutable audit fact for one detected violation.
///
/// Created once per violation and never deleted. Only `resolved` may
/// change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: String,
    pub user_id: String,
    pub violation_type: ViolationCategory,
    pub severity: Severity,
    /// Bounded excerpt of the offending content. The full raw content is
    /// never persisted.
    pub content_excerpt: String,
    pub detection_method: DetectionMethod,
    pub created_at: DateTime<Utc>,
    /// The authoritative escalation level after this violation was applied.
    pub escalation_level_after: u32,
    pub action_taken: EnforcementAction,
    pub resolved: bool,
}

/// A user's aggregate violation state.
///
/// `escalation_level` is authoritative: loaded from the store and
/// incremented, never recomputed from `violation_history` (divergence
/// between the two is a data-integrity signal, not an input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserViolationProfile {
    pub user_id: String,
    pub total_violations: u64,
    pub escalation_level: u32,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub account_status: AccountStatus,
    /// Most recent first.
    #[serde(default)]
    pub violation_history: Vec<ViolationRecord>,
}

impl UserViolationProfile {
    /// A fresh profile for a user with no recorded violations.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            total_violations: 0,
            escalation_level: 0,
            last_violation_at: None,
            account_status: AccountStatus::Active,
            violation_history: Vec::new(),
        }
    }
}
