//! Configuration loading, validation, and management for BidGuard.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides (`BIDGUARD_*`). Validates all settings at startup. Every
//! policy knob lives here (cost ceilings, the escalation ladder, the
//! severity-to-points table, the detection rule table) so the protection
//! core itself carries no hidden defaults.

use bidguard_core::violation::{DetectionLayer, EnforcementAction, Severity, ViolationCategory};
use bidguard_core::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Detection rule table for the content scanner.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Escalation ladder and severity weighting.
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Cost ceilings and the breaker's emergency threshold.
    #[serde(default)]
    pub cost: CostConfig,

    /// Event bus settings.
    #[serde(default)]
    pub events: EventsConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.as_ref().display()),
        })?;
        let mut config: AppConfig = toml::from_str(&raw).map_err(|e| Error::Config {
            message: format!("cannot parse {}: {e}", path.as_ref().display()),
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from a file if it exists, otherwise start from defaults.
    /// Env overrides and validation apply either way.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, Error> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    /// Apply `BIDGUARD_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        fn env_f64(name: &str) -> Option<f64> {
            match std::env::var(name) {
                Ok(raw) => match raw.parse() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!(var = name, value = %raw, "ignoring unparseable override");
                        None
                    }
                },
                Err(_) => None,
            }
        }

        if let Some(v) = env_f64("BIDGUARD_PER_EVENT_LIMIT") {
            self.cost.per_event_limit = v;
        }
        if let Some(v) = env_f64("BIDGUARD_HOURLY_LIMIT") {
            self.cost.hourly_limit = v;
        }
        if let Some(v) = env_f64("BIDGUARD_DAILY_LIMIT") {
            self.cost.daily_limit = v;
        }
        if let Some(v) = env_f64("BIDGUARD_EMERGENCY_THRESHOLD") {
            self.cost.emergency_threshold = v;
        }
        if let Ok(v) = std::env::var("BIDGUARD_ADMIN_KEY_SHA256") {
            self.cost.admin_key_sha256 = Some(v);
        }
    }

    /// Validate the whole configuration. Called on every load.
    pub fn validate(&self) -> Result<(), Error> {
        self.scanner.validate()?;
        self.escalation.validate()?;
        self.cost.validate()?;
        Ok(())
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────

/// One row of the detection rule table.
///
/// Rules are data: each is independently testable and replaceable without
/// touching scanner control flow. Patterns compile when the scanner is
/// constructed, so a bad pattern fails startup, never a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRule {
    /// Unique rule name, used in diagnostics.
    pub name: String,
    /// Regex applied to the raw text (`(?i)` for case-insensitive rules).
    pub pattern: String,
    pub category: ViolationCategory,
    /// Fixed confidence assigned to matches of this rule.
    pub confidence: f64,
    pub layer: DetectionLayer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Detection rules. Empty means "use the built-in default table".
    #[serde(default)]
    pub rules: Vec<DetectionRule>,
}

impl ScannerConfig {
    fn validate(&self) -> Result<(), Error> {
        for rule in &self.rules {
            if rule.name.is_empty() {
                return Err(Error::Config {
                    message: "detection rule with empty name".into(),
                });
            }
            if !(0.0..=1.0).contains(&rule.confidence) {
                return Err(Error::Config {
                    message: format!(
                        "rule '{}': confidence {} outside [0, 1]",
                        rule.name, rule.confidence
                    ),
                });
            }
            if rule.pattern.is_empty() {
                return Err(Error::Config {
                    message: format!("rule '{}': empty pattern", rule.name),
                });
            }
        }
        Ok(())
    }
}

// ── Escalation ────────────────────────────────────────────────────────────

/// One rung of the escalation ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderRung {
    pub level: u32,
    pub action: EnforcementAction,
    #[serde(default)]
    pub description: String,
}

/// Severity-to-points table. Critical violations are weighted to skip
/// multiple rungs in a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityPoints {
    #[serde(default = "default_low_points")]
    pub low: u32,
    #[serde(default = "default_medium_points")]
    pub medium: u32,
    #[serde(default = "default_high_points")]
    pub high: u32,
    #[serde(default = "default_critical_points")]
    pub critical: u32,
}

fn default_low_points() -> u32 {
    1
}
fn default_medium_points() -> u32 {
    2
}
fn default_high_points() -> u32 {
    3
}
fn default_critical_points() -> u32 {
    5
}

impl Default for SeverityPoints {
    fn default() -> Self {
        Self {
            low: default_low_points(),
            medium: default_medium_points(),
            high: default_high_points(),
            critical: default_critical_points(),
        }
    }
}

impl SeverityPoints {
    pub fn points(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Ladder rungs, level 1 upward. Empty means the default four rungs.
    #[serde(default = "default_ladder")]
    pub ladder: Vec<LadderRung>,

    #[serde(default)]
    pub severity_points: SeverityPoints,

    /// Maximum persisted excerpt length in characters.
    #[serde(default = "default_excerpt_max_chars")]
    pub excerpt_max_chars: usize,

    /// How much history to load for the integrity check.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_excerpt_max_chars() -> usize {
    500
}
fn default_history_limit() -> usize {
    50
}

/// The default four-rung ladder: warn, restrict 24h, suspend one week, ban.
pub fn default_ladder() -> Vec<LadderRung> {
    vec![
        LadderRung {
            level: 1,
            action: EnforcementAction::Warning,
            description: "First violation - warning issued".into(),
        },
        LadderRung {
            level: 2,
            action: EnforcementAction::MessagingRestriction {
                duration_hours: Some(24),
            },
            description: "Second violation - 24h messaging restriction".into(),
        },
        LadderRung {
            level: 3,
            action: EnforcementAction::AccountSuspension {
                duration_hours: Some(168),
            },
            description: "Third violation - 1 week account suspension".into(),
        },
        LadderRung {
            level: 4,
            action: EnforcementAction::PermanentBan,
            description: "Fourth violation - permanent ban".into(),
        },
    ]
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            ladder: default_ladder(),
            severity_points: SeverityPoints::default(),
            excerpt_max_chars: default_excerpt_max_chars(),
            history_limit: default_history_limit(),
        }
    }
}

impl EscalationConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.ladder.is_empty() {
            return Err(Error::Config {
                message: "escalation ladder cannot be empty".into(),
            });
        }
        // Rungs must be contiguous from level 1 so min(level + points, max)
        // always lands on a defined rung.
        for (i, rung) in self.ladder.iter().enumerate() {
            let expected = i as u32 + 1;
            if rung.level != expected {
                return Err(Error::Config {
                    message: format!(
                        "escalation ladder must be contiguous from 1: rung {} has level {}",
                        i, rung.level
                    ),
                });
            }
        }
        let p = &self.severity_points;
        if p.low == 0 || p.medium == 0 || p.high == 0 || p.critical == 0 {
            return Err(Error::Config {
                message: "severity points must be positive".into(),
            });
        }
        if self.excerpt_max_chars == 0 {
            return Err(Error::Config {
                message: "excerpt_max_chars must be positive".into(),
            });
        }
        Ok(())
    }

    /// Highest defined escalation level.
    pub fn max_level(&self) -> u32 {
        self.ladder.len() as u32
    }
}

// ── Cost ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Maximum cost of a single operation.
    #[serde(default = "default_per_event_limit")]
    pub per_event_limit: f64,

    /// Ceiling for one UTC hour of recorded spend.
    #[serde(default = "default_hourly_limit")]
    pub hourly_limit: f64,

    /// Ceiling for one UTC calendar day of recorded spend.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: f64,

    /// Projected daily spend beyond this trips the breaker.
    #[serde(default = "default_emergency_threshold")]
    pub emergency_threshold: f64,

    /// SHA-256 hex digest of the administrative reset key.
    /// `None` disables reset entirely (the breaker stays open once tripped).
    #[serde(default)]
    pub admin_key_sha256: Option<String>,
}

fn default_per_event_limit() -> f64 {
    0.05
}
fn default_hourly_limit() -> f64 {
    100.0
}
fn default_daily_limit() -> f64 {
    1000.0
}
fn default_emergency_threshold() -> f64 {
    2000.0
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            per_event_limit: default_per_event_limit(),
            hourly_limit: default_hourly_limit(),
            daily_limit: default_daily_limit(),
            emergency_threshold: default_emergency_threshold(),
            admin_key_sha256: None,
        }
    }
}

impl CostConfig {
    fn validate(&self) -> Result<(), Error> {
        for (name, value) in [
            ("per_event_limit", self.per_event_limit),
            ("hourly_limit", self.hourly_limit),
            ("daily_limit", self.daily_limit),
            ("emergency_threshold", self.emergency_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::Config {
                    message: format!("cost.{name} must be positive and finite, got {value}"),
                });
            }
        }
        if self.emergency_threshold < self.daily_limit {
            return Err(Error::Config {
                message: format!(
                    "cost.emergency_threshold ({}) must not be below cost.daily_limit ({})",
                    self.emergency_threshold, self.daily_limit
                ),
            });
        }
        if let Some(digest) = &self.admin_key_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::Config {
                    message: "cost.admin_key_sha256 must be a 64-char hex digest".into(),
                });
            }
        }
        Ok(())
    }
}

// ── Events ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast channel capacity.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.escalation.max_level(), 4);
        assert_eq!(config.escalation.severity_points.points(Severity::Critical), 5);
    }

    #[test]
    fn default_ladder_matches_policy() {
        let ladder = default_ladder();
        assert_eq!(ladder.len(), 4);
        assert_eq!(ladder[0].action, EnforcementAction::Warning);
        assert_eq!(
            ladder[1].action,
            EnforcementAction::MessagingRestriction { duration_hours: Some(24) }
        );
        assert_eq!(
            ladder[2].action,
            EnforcementAction::AccountSuspension { duration_hours: Some(168) }
        );
        assert_eq!(ladder[3].action, EnforcementAction::PermanentBan);
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[cost]
per_event_limit = 5.0
daily_limit = 100.0
hourly_limit = 50.0
emergency_threshold = 150.0

[[escalation.ladder]]
level = 1
action = {{ type = "warning" }}
description = "warn"

[[escalation.ladder]]
level = 2
action = {{ type = "permanent_ban" }}
description = "ban"
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert!((config.cost.per_event_limit - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.escalation.max_level(), 2);
        assert_eq!(config.escalation.ladder[1].action, EnforcementAction::PermanentBan);
    }

    #[test]
    fn load_or_default_without_file() {
        let config = AppConfig::load_or_default("/nonexistent/bidguard.toml").unwrap();
        assert!((config.cost.daily_limit - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gapped_ladder_rejected() {
        let mut config = AppConfig::default();
        config.escalation.ladder.remove(1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("contiguous"));
    }

    #[test]
    fn negative_limit_rejected() {
        let mut config = AppConfig::default();
        config.cost.daily_limit = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn emergency_below_daily_rejected() {
        let mut config = AppConfig::default();
        config.cost.emergency_threshold = config.cost.daily_limit / 2.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("emergency_threshold"));
    }

    #[test]
    fn bad_admin_digest_rejected() {
        let mut config = AppConfig::default();
        config.cost.admin_key_sha256 = Some("not-hex".into());
        assert!(config.validate().is_err());

        config.cost.admin_key_sha256 = Some("a".repeat(64));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rule_confidence_out_of_range_rejected() {
        let mut config = AppConfig::default();
        config.scanner.rules.push(DetectionRule {
            name: "bad".into(),
            pattern: r"\d+".into(),
            category: ViolationCategory::PhoneNumber,
            confidence: 1.5,
            layer: DetectionLayer::ExactPattern,
        });
        assert!(config.validate().is_err());
    }
}
