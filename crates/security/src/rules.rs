//! The built-in detection rule table.
//!
//! Rules are data, not control flow: each row pairs a pattern with a
//! category, a fixed confidence, and the layer it belongs to. Deployments
//! override the table through configuration; this module is the default
//! policy. Every rule is independently unit-tested below.

use bidguard_config::DetectionRule;
use bidguard_core::violation::{DetectionLayer, ViolationCategory};

fn rule(
    name: &str,
    pattern: &str,
    category: ViolationCategory,
    confidence: f64,
    layer: DetectionLayer,
) -> DetectionRule {
    DetectionRule {
        name: name.into(),
        pattern: pattern.into(),
        category,
        confidence,
        layer,
    }
}

/// The default detection rule table.
///
/// Confidence is triage metadata only: a match at any confidence is a
/// violation. Recall is the priority; a measure of false positives on
/// number-dense or platform-name-dropping text is accepted.
pub fn default_rules() -> Vec<DetectionRule> {
    use DetectionLayer::{ExactPattern, Intent, Obfuscation};
    use ViolationCategory::{EmailAddress, Obfuscated, PhoneNumber, SocialHandle};

    vec![
        // ── Exact pattern layer: phones ──────────────────────────────
        rule(
            "phone_standard",
            r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b",
            PhoneNumber,
            0.95,
            ExactPattern,
        ),
        rule(
            "phone_parenthesized",
            r"\(\d{3}\)\s*\d{3}[-.\s]?\d{4}",
            PhoneNumber,
            0.95,
            ExactPattern,
        ),
        rule(
            "phone_international",
            r"\+\d{1,3}[-.\s]?\d{2,4}[-.\s]?\d{3,4}[-.\s]?\d{3,4}",
            PhoneNumber,
            0.95,
            ExactPattern,
        ),
        // ── Exact pattern layer: emails ──────────────────────────────
        rule(
            "email_standard",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            EmailAddress,
            0.90,
            ExactPattern,
        ),
        rule(
            "email_at_dot_words",
            r"(?i)\b[a-z0-9._%+-]+\s*(?:\[at\]|\(at\)|\bat\b)\s*[a-z0-9-]+\s*(?:\[dot\]|\(dot\)|\bdot\b)\s*[a-z]{2,}\b",
            EmailAddress,
            0.85,
            ExactPattern,
        ),
        // ── Exact pattern layer: social handles ──────────────────────
        rule(
            "handle_at",
            r"@[A-Za-z0-9_]{2,}\b",
            SocialHandle,
            0.80,
            ExactPattern,
        ),
        rule(
            "handle_platform",
            r"(?i)\b(?:instagram|facebook|twitter|linkedin|snapchat|tiktok|ig|fb)\s*[:/@]\s*[A-Za-z0-9._]{2,}\b",
            SocialHandle,
            0.80,
            ExactPattern,
        ),
        rule(
            "social_invite",
            r"(?i)\b(?:find|follow|add|connect)\s+me\s+on\s+(?:instagram|facebook|twitter|linkedin|snapchat|tiktok)\b",
            SocialHandle,
            0.80,
            ExactPattern,
        ),
        rule(
            "social_dm",
            r"(?i)\b(?:dm|message)\s+me\s+on\b",
            SocialHandle,
            0.80,
            ExactPattern,
        ),
        // ── Obfuscation layer ────────────────────────────────────────
        rule(
            "digits_spelled_out",
            r"(?i)\b(?:zero|one|two|three|four|five|six|seven|eight|nine)(?:[\s-]+(?:zero|one|two|three|four|five|six|seven|eight|nine)){2,}\b",
            Obfuscated,
            0.75,
            Obfuscation,
        ),
        // Seven-plus digits threaded through filler: phone-length runs
        // only, so prices and short quantities stay clean.
        rule(
            "digits_threaded",
            r"\d(?:[^\w]{0,3}\d){6,}",
            Obfuscated,
            0.75,
            Obfuscation,
        ),
        rule(
            "domain_dot_words",
            r"(?i)\b(?:gmail|yahoo|hotmail|outlook|protonmail)\s+(?:dot|period)\s+(?:com|org|net)\b",
            Obfuscated,
            0.75,
            Obfuscation,
        ),
        rule(
            "phone_prefixed_digits",
            r"(?i)\b(?:call|text|phone)\s*(?:me\s*)?(?:at\s*)?[:\s]\s*\d{3}",
            PhoneNumber,
            0.75,
            Obfuscation,
        ),
        // ── Intent layer ─────────────────────────────────────────────
        rule(
            "intent_contact_me",
            r"(?i)\b(?:call|text|email|contact|reach)\s+me\s+(?:at|on|directly)\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
        rule(
            "intent_my_contact",
            r"(?i)\b(?:my|the)\s+(?:number|phone|cell|email|contact)\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
        rule(
            "intent_offline",
            r"(?i)\blet'?s\s+(?:talk|chat|discuss)\s+(?:offline|directly|outside|privately)\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
        rule(
            "intent_bypass_platform",
            r"(?i)\b(?:bypass|skip|avoid)\s+(?:the\s+)?platform\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
        rule(
            "intent_take_offline",
            r"(?i)\btake\s+this\s+(?:offline|outside)\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
        rule(
            "intent_messaging_app",
            r"(?i)\b(?:whatsapp|telegram|signal|discord|messenger)\s+me\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
        rule(
            "intent_on_messaging_app",
            r"(?i)\bon\s+(?:whatsapp|telegram|signal|discord)\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
        rule(
            "intent_share_details",
            r"(?i)\b(?:send|share)\s+(?:your|my)\s+(?:contact|info|details|number)\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
        rule(
            "intent_meet_outside",
            r"(?i)\b(?:meet|talk)\s+(?:outside|away\s+from)\s+(?:here|the\s+platform|platform)\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
        rule(
            "intent_direct_channel",
            r"(?i)\b(?:direct|personal|private)\s+(?:contact|communication)\b",
            ViolationCategory::ContactIntent,
            0.85,
            Intent,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex_lite::Regex;

    fn compiled(name: &str) -> Regex {
        let rules = default_rules();
        let rule = rules
            .iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no rule named {name}"));
        Regex::new(&rule.pattern).unwrap_or_else(|e| panic!("rule {name} does not compile: {e}"))
    }

    #[test]
    fn all_default_rules_compile() {
        for rule in default_rules() {
            assert!(
                Regex::new(&rule.pattern).is_ok(),
                "rule {} failed to compile",
                rule.name
            );
            assert!((0.0..=1.0).contains(&rule.confidence));
        }
    }

    #[test]
    fn rule_names_are_unique() {
        let rules = default_rules();
        let mut names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), rules.len());
    }

    #[test]
    fn phone_standard_formats() {
        let re = compiled("phone_standard");
        assert!(re.is_match("555-123-4567"));
        assert!(re.is_match("555.123.4567"));
        assert!(re.is_match("555 123 4567"));
        assert!(re.is_match("5551234567"));
        assert!(!re.is_match("Budget is $15,000"));
    }

    #[test]
    fn phone_parenthesized() {
        let re = compiled("phone_parenthesized");
        assert!(re.is_match("(555) 123-4567"));
        assert!(re.is_match("(555)123 4567"));
    }

    #[test]
    fn phone_international() {
        let re = compiled("phone_international");
        assert!(re.is_match("+1 555 123 4567"));
        assert!(re.is_match("+44 20 7946 0958"));
    }

    #[test]
    fn email_standard() {
        let re = compiled("email_standard");
        assert!(re.is_match("john@example.com"));
        assert!(re.is_match("j.doe+quotes@mail.co.uk"));
        assert!(!re.is_match("no email here"));
    }

    #[test]
    fn email_obfuscations() {
        let re = compiled("email_at_dot_words");
        assert!(re.is_match("john at gmail dot com"));
        assert!(re.is_match("john [at] gmail [dot] com"));
        assert!(re.is_match("john(at)gmail(dot)com"));
    }

    #[test]
    fn social_handles() {
        assert!(compiled("handle_at").is_match("message @johndoe"));
        assert!(compiled("handle_platform").is_match("instagram: johndoe"));
        assert!(compiled("social_invite").is_match("find me on instagram"));
        assert!(compiled("social_dm").is_match("dm me on insta"));
        // Platform mentioned without a handle separator is not a violation
        assert!(!compiled("handle_platform").is_match("facebook is where I saw the ad"));
    }

    #[test]
    fn spelled_out_digits_need_three_words() {
        let re = compiled("digits_spelled_out");
        assert!(re.is_match("five five five one two three"));
        assert!(!re.is_match("one bathroom"));
        assert!(!re.is_match("four bids"));
    }

    #[test]
    fn threaded_digits_are_phone_length_only() {
        let re = compiled("digits_threaded");
        assert!(re.is_match("5 5 5 - 1 2 3 - 4 5 6 7"));
        assert!(re.is_match("5*5*5*1*2*3*4*5*6*7"));
        assert!(!re.is_match("Budget is $15,000"));
        assert!(!re.is_match("Timeline 4-6 weeks"));
    }

    #[test]
    fn domain_dot_words() {
        let re = compiled("domain_dot_words");
        assert!(re.is_match("gmail dot com"));
        assert!(re.is_match("yahoo period net"));
    }

    #[test]
    fn intent_phrases() {
        assert!(compiled("intent_contact_me").is_match("call me at your convenience"));
        assert!(compiled("intent_contact_me").is_match("reach me directly"));
        assert!(compiled("intent_offline").is_match("let's talk offline"));
        assert!(compiled("intent_offline").is_match("lets chat privately"));
        assert!(compiled("intent_bypass_platform").is_match("we could bypass the platform"));
        assert!(compiled("intent_take_offline").is_match("take this offline"));
        assert!(compiled("intent_messaging_app").is_match("whatsapp me"));
        assert!(compiled("intent_on_messaging_app").is_match("ping me on telegram"));
        assert!(compiled("intent_share_details").is_match("send me your number"));
        assert!(compiled("intent_meet_outside").is_match("talk outside the platform"));
        assert!(compiled("intent_direct_channel").is_match("private communication only"));
    }

    #[test]
    fn ordinary_project_talk_is_clean() {
        let clean = [
            "I need bathroom renovation",
            "Budget is $15,000",
            "Timeline 4-6 weeks",
            "The quote covers materials and labor",
        ];
        let rules = default_rules();
        for text in clean {
            for rule in &rules {
                let re = Regex::new(&rule.pattern).unwrap();
                assert!(!re.is_match(text), "rule {} wrongly flags '{}'", rule.name, text);
            }
        }
    }
}
