//! Multi-layer contact-information scanner.
//!
//! Four independent layers run over the same input and their results are
//! unioned: exact patterns, obfuscation patterns, intent phrases, and a
//! per-sentence context pass that separates *requesting* contact from
//! *providing* it. A match in any layer at any confidence is a violation;
//! confidence only feeds downstream triage, never suppression.
//!
//! Scanning is pure and total: no allocation failure modes, no panics on
//! odd input, and no I/O on the result path. The audit hook is
//! fire-and-forget and carries a one-way hash of the text, never the text.

use crate::audit::{sha256_hex, AuditEvent, AuditOutcome, SecurityAuditLog};
use bidguard_config::DetectionRule;
use bidguard_core::event::{EventBus, SecurityEvent};
use bidguard_core::violation::{
    DetectionLayer, RiskLevel, ScanResult, ViolationCategory, ViolationMatch,
};
use bidguard_core::Error;
use chrono::Utc;
use regex_lite::Regex;
use std::sync::Arc;
use tracing::debug;

/// Per-sentence needles that *request* contact.
const REQUEST_NEEDLES: [&str; 4] = ["call me", "text me", "email me", "contact me"];

/// Per-sentence needles that *provide* contact. Higher risk than requests.
const PROVISION_NEEDLES: [&str; 6] = [
    "my number is",
    "my email is",
    "my phone is",
    "reach me at",
    "email me at",
    "you can reach me",
];

const REQUEST_CONFIDENCE: f64 = 0.85;
const PROVISION_CONFIDENCE: f64 = 0.90;

/// Optional caller context for a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    /// The user whose content is being scanned, for audit attribution.
    pub user_id: Option<String>,
    /// Where the content came from (message, bid note, project description).
    pub source: Option<String>,
}

struct CompiledRule {
    regex: Regex,
    category: ViolationCategory,
    confidence: f64,
    layer: DetectionLayer,
}

/// The content scanner. Stateless after construction; safe to share across
/// tasks and call concurrently.
pub struct ContentScanner {
    rules: Vec<CompiledRule>,
    audit: Option<Arc<SecurityAuditLog>>,
    bus: Option<EventBus>,
}

impl ContentScanner {
    /// Compile a rule table into a scanner. A pattern that fails to
    /// compile fails construction; scans themselves cannot error.
    pub fn new(rules: &[DetectionRule]) -> Result<Self, Error> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = Regex::new(&rule.pattern).map_err(|e| Error::Config {
                message: format!("detection rule '{}' does not compile: {e}", rule.name),
            })?;
            compiled.push(CompiledRule {
                regex,
                category: rule.category,
                confidence: rule.confidence,
                layer: rule.layer,
            });
        }
        Ok(Self {
            rules: compiled,
            audit: None,
            bus: None,
        })
    }

    /// A scanner loaded with the built-in default rule table.
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(&crate::rules::default_rules())
    }

    /// Attach an audit log for the privacy-preserving scan hook.
    pub fn with_audit_log(mut self, audit: Arc<SecurityAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Attach an event bus for `ContentFlagged` analytics events.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Number of compiled rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Scan text for contact-sharing signals.
    ///
    /// Never fails: malformed input (empty, or carrying U+FFFD replacement
    /// characters from a bad decode upstream) yields a clean result and a
    /// diagnostic log distinct from a genuine no-violation outcome.
    pub fn scan(&self, text: &str, context: Option<&ScanContext>) -> ScanResult {
        if text.trim().is_empty() {
            debug!("scan skipped: empty input, not a clean no-violation result");
            return ScanResult::clean(text);
        }
        if text.contains('\u{FFFD}') {
            // A bad decode upstream still gets scanned: replacement
            // characters must not suppress detection of the readable rest.
            debug!(len = text.len(), "scanning input carrying replacement characters");
        }

        let mut matches = Vec::new();

        // Layers 1-3: the compiled rule table. Layers never short-circuit
        // each other; every rule sees the full original input.
        for rule in &self.rules {
            for found in rule.regex.find_iter(text) {
                matches.push(ViolationMatch {
                    category: rule.category,
                    start: found.start(),
                    end: found.end(),
                    text: found.as_str().to_string(),
                    confidence: rule.confidence,
                    detection_layer: rule.layer,
                });
            }
        }

        // Layer 4: per-sentence request-vs-provision heuristics.
        self.scan_sentences(text, &mut matches);

        if matches.is_empty() {
            return ScanResult::clean(text);
        }

        matches.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

        let risk_level = aggregate_risk(&matches);
        let redacted_text = redact(text, &matches);

        let result = ScanResult {
            violations_found: true,
            matches,
            risk_level,
            redacted_text,
            scanned_at: Utc::now(),
        };

        self.emit_hooks(text, context, &result);
        result
    }

    fn scan_sentences(&self, text: &str, matches: &mut Vec<ViolationMatch>) {
        for (offset, sentence) in sentences(text) {
            // ASCII lowercasing preserves byte offsets; the needles are ASCII.
            let lowered = sentence.to_ascii_lowercase();

            for needle in REQUEST_NEEDLES {
                if let Some(pos) = lowered.find(needle) {
                    matches.push(ViolationMatch {
                        category: ViolationCategory::ContactIntent,
                        start: offset + pos,
                        end: offset + pos + needle.len(),
                        text: sentence[pos..pos + needle.len()].to_string(),
                        confidence: REQUEST_CONFIDENCE,
                        detection_layer: DetectionLayer::Context,
                    });
                }
            }

            for needle in PROVISION_NEEDLES {
                if let Some(pos) = lowered.find(needle) {
                    matches.push(ViolationMatch {
                        category: ViolationCategory::ContactProvision,
                        start: offset + pos,
                        end: offset + pos + needle.len(),
                        text: sentence[pos..pos + needle.len()].to_string(),
                        confidence: PROVISION_CONFIDENCE,
                        detection_layer: DetectionLayer::Context,
                    });
                }
            }
        }
    }

    /// Fire-and-forget audit and analytics. Nothing here can alter the
    /// scan result.
    fn emit_hooks(&self, text: &str, context: Option<&ScanContext>, result: &ScanResult) {
        if self.audit.is_none() && self.bus.is_none() {
            return;
        }

        let content_hash = sha256_hex(text);
        let categories: Vec<String> = result.categories().iter().map(|c| c.to_string()).collect();

        if let Some(audit) = &self.audit {
            let actor = context
                .and_then(|c| c.user_id.as_deref())
                .unwrap_or("anonymous");
            audit.log(
                AuditEvent::ContentScanned {
                    content_hash: content_hash.clone(),
                    risk_level: result.risk_level.to_string(),
                    categories: categories.clone(),
                },
                actor,
                AuditOutcome::Denied,
                context.and_then(|c| c.source.clone()),
            );
        }

        if let Some(bus) = &self.bus {
            bus.publish(SecurityEvent::ContentFlagged {
                content_hash,
                risk_level: result.risk_level,
                categories,
                timestamp: result.scanned_at,
            });
        }
    }
}

/// Split text into sentences with their byte offsets.
fn sentences(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            if i > start {
                out.push((start, &text[start..i]));
            }
            start = i + c.len_utf8();
        }
    }
    if start < text.len() {
        out.push((start, &text[start..]));
    }
    out
}

/// `high` if anything exact/provided, `medium` for intent-only, else `low`.
fn aggregate_risk(matches: &[ViolationMatch]) -> RiskLevel {
    let mut risk = RiskLevel::Low;
    for m in matches {
        let level = match m.category {
            ViolationCategory::PhoneNumber
            | ViolationCategory::EmailAddress
            | ViolationCategory::ContactProvision => RiskLevel::High,
            ViolationCategory::ContactIntent => RiskLevel::Medium,
            ViolationCategory::SocialHandle | ViolationCategory::Obfuscated => RiskLevel::Low,
        };
        risk = risk.max(level);
    }
    risk
}

/// Replace every matched span with its category placeholder.
///
/// Overlapping spans are merged first, with the merged span taking the
/// highest-priority category; replacements then apply in descending start
/// order so earlier substitutions never invalidate later offsets. No
/// fragment of a partially-overlapped match can survive redaction.
fn redact(text: &str, matches: &[ViolationMatch]) -> String {
    let mut spans: Vec<(usize, usize, ViolationCategory)> =
        matches.iter().map(|m| (m.start, m.end, m.category)).collect();
    spans.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut merged: Vec<(usize, usize, ViolationCategory)> = Vec::new();
    for (start, end, category) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => {
                last.1 = last.1.max(end);
                if category.redaction_priority() > last.2.redaction_priority() {
                    last.2 = category;
                }
            }
            _ => merged.push((start, end, category)),
        }
    }

    let mut redacted = text.to_string();
    for (start, end, category) in merged.iter().rev() {
        redacted.replace_range(*start..*end, category.placeholder());
    }
    redacted
}
