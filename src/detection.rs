//! Block-signal classifier.
//!
//! Maps a raw `(status, body, headers)` triple to a blocking verdict with a
//! confidence score. Pure and clock-free so it can be exercised directly on
//! captured responses. Rules are evaluated strictly in order; the first rule
//! whose precondition holds decides the verdict, including "not blocked"
//! decisions.

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Callers attach a verdict to the response only at or above this score.
pub const MIN_APPLY_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    IpBlock,
    RobotDetected,
    Captcha,
    RateLimited,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetection {
    pub is_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BlockedReason>,
    pub confidence: f64,
}

impl BlockDetection {
    fn blocked(reason: BlockedReason, confidence: f64) -> Self {
        Self {
            is_blocked: true,
            reason: Some(reason),
            confidence,
        }
    }

    fn clear() -> Self {
        Self {
            is_blocked: false,
            reason: None,
            confidence: 0.0,
        }
    }
}

const CAPTCHA_PATTERNS: &[&str] = &[
    "captcha",
    "recaptcha",
    "hcaptcha",
    "cf-turnstile",
    "challenge-form",
    "challenge-running",
    "g-recaptcha",
    "h-captcha",
    "arkose",
    "funcaptcha",
];

const BOT_PATTERNS: &[&str] = &[
    "verify you are human",
    "verifying you are human",
    "access denied",
    "access to this page has been denied",
    "suspicious activity",
    "unusual traffic",
    "bot detected",
    "browser check",
    "please enable javascript",
    "enable javascript and cookies",
    "automated access",
    "automated requests",
    "are you a robot",
    "prove you are human",
    "human verification",
    "security check",
    "bot protection",
    "detected unusual activity",
    "request blocked",
    "blocked by security policy",
    "pardon our interruption",
    "additional verification required",
];

const CLOUDFLARE_PATTERNS: &[&str] = &[
    "cloudflare",
    "cf-ray",
    "checking your browser",
    "just a moment",
    "please wait while we verify",
    "ddos protection",
    "ray id:",
    "performance & security by cloudflare",
    "__cf_bm",
    "cf_chl_opt",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "slow down",
    "request limit exceeded",
    "quota exceeded",
    "throttled",
];

const IP_BLOCK_PATTERNS: &[&str] = &[
    "ip blocked",
    "ip banned",
    "your ip",
    "ip address",
    "blocked ip",
    "banned ip",
    "forbidden",
    "403 forbidden",
];

fn matcher(cell: &'static OnceLock<AhoCorasick>, patterns: &[&str]) -> &'static AhoCorasick {
    cell.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(patterns)
            .expect("valid block patterns")
    })
}

fn captcha_matcher() -> &'static AhoCorasick {
    static M: OnceLock<AhoCorasick> = OnceLock::new();
    matcher(&M, CAPTCHA_PATTERNS)
}

fn bot_matcher() -> &'static AhoCorasick {
    static M: OnceLock<AhoCorasick> = OnceLock::new();
    matcher(&M, BOT_PATTERNS)
}

fn cloudflare_matcher() -> &'static AhoCorasick {
    static M: OnceLock<AhoCorasick> = OnceLock::new();
    matcher(&M, CLOUDFLARE_PATTERNS)
}

fn rate_limit_matcher() -> &'static AhoCorasick {
    static M: OnceLock<AhoCorasick> = OnceLock::new();
    matcher(&M, RATE_LIMIT_PATTERNS)
}

fn ip_block_matcher() -> &'static AhoCorasick {
    static M: OnceLock<AhoCorasick> = OnceLock::new();
    matcher(&M, IP_BLOCK_PATTERNS)
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn rate_limit_headers_present(headers: &HashMap<String, String>) -> bool {
    header_value(headers, "retry-after").is_some()
        || header_value(headers, "x-ratelimit-remaining") == Some("0")
        || header_value(headers, "x-rate-limit-remaining") == Some("0")
}

/// Classify a response. `body` is the raw document text; pattern matching is
/// ASCII-case-insensitive, size gates are in bytes.
pub fn detect_block(status: u16, body: &str, headers: &HashMap<String, String>) -> BlockDetection {
    if rate_limit_headers_present(headers) {
        return BlockDetection::blocked(BlockedReason::RateLimited, 0.95);
    }
    if status == 429 {
        return BlockDetection::blocked(BlockedReason::RateLimited, 0.95);
    }
    if status == 403 {
        if captcha_matcher().is_match(body) {
            return BlockDetection::blocked(BlockedReason::Captcha, 0.9);
        }
        if bot_matcher().is_match(body) {
            return BlockDetection::blocked(BlockedReason::RobotDetected, 0.85);
        }
        return BlockDetection::blocked(BlockedReason::IpBlock, 0.8);
    }
    if status == 503 {
        if cloudflare_matcher().is_match(body) {
            return BlockDetection::blocked(BlockedReason::RobotDetected, 0.85);
        }
        return BlockDetection::blocked(BlockedReason::IpBlock, 0.6);
    }
    if status == 401 {
        if ip_block_matcher().is_match(body) {
            return BlockDetection::blocked(BlockedReason::IpBlock, 0.7);
        }
        return BlockDetection::clear();
    }

    if captcha_matcher().is_match(body) {
        let confidence = if body.len() < 50_000 { 0.9 } else { 0.6 };
        return BlockDetection::blocked(BlockedReason::Captcha, confidence);
    }
    if cloudflare_matcher().is_match(body) {
        // Large pages mentioning Cloudflare are almost always real content
        // served behind it, not an interstitial.
        if body.len() < 15_000 {
            return BlockDetection::blocked(BlockedReason::RobotDetected, 0.85);
        }
        return BlockDetection::clear();
    }
    if bot_matcher().is_match(body) {
        let confidence = if body.len() < 20_000 { 0.8 } else { 0.5 };
        return BlockDetection::blocked(BlockedReason::RobotDetected, confidence);
    }
    if rate_limit_matcher().is_match(body) {
        return BlockDetection::blocked(BlockedReason::RateLimited, 0.75);
    }
    if ip_block_matcher().is_match(body) {
        let confidence = if body.len() < 20_000 { 0.7 } else { 0.4 };
        return BlockDetection::blocked(BlockedReason::IpBlock, confidence);
    }
    if status == 200 && body.trim().is_empty() {
        return BlockDetection::blocked(BlockedReason::Unknown, 0.3);
    }
    BlockDetection::clear()
}

/// Whether a blocked result warrants one retry with stealth enabled.
pub fn should_retry_with_stealth(detection: &BlockDetection) -> bool {
    if !detection.is_blocked {
        return false;
    }
    if detection.confidence >= 0.7 {
        return true;
    }
    matches!(
        detection.reason,
        Some(BlockedReason::Captcha) | Some(BlockedReason::RobotDetected)
    ) && detection.confidence >= 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_headers() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn clear_verdict_carries_no_reason_and_zero_confidence() {
        let d = detect_block(200, "<html><body>hello world</body></html>", &no_headers());
        assert!(!d.is_blocked);
        assert!(d.reason.is_none());
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn rate_limit_headers_beat_everything() {
        let mut headers = HashMap::new();
        headers.insert("Retry-After".to_string(), "60".to_string());
        let d = detect_block(403, "g-recaptcha challenge", &headers);
        assert_eq!(d.reason, Some(BlockedReason::RateLimited));
        assert!(d.confidence >= 0.9);

        let mut headers = HashMap::new();
        headers.insert("X-RateLimit-Remaining".to_string(), "0".to_string());
        let d = detect_block(200, "", &headers);
        assert_eq!(d.reason, Some(BlockedReason::RateLimited));

        // Non-zero remaining is not a signal.
        let mut headers = HashMap::new();
        headers.insert("X-RateLimit-Remaining".to_string(), "5".to_string());
        let d = detect_block(200, "plain body", &headers);
        assert!(!d.is_blocked);
    }

    #[test]
    fn status_429_is_rate_limited() {
        let d = detect_block(429, "", &no_headers());
        assert!(d.is_blocked);
        assert_eq!(d.reason, Some(BlockedReason::RateLimited));
        assert!(d.confidence >= 0.9);
    }

    #[test]
    fn status_403_branches_on_body() {
        let d = detect_block(403, "", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::IpBlock));
        assert!(d.confidence >= 0.8);

        let d = detect_block(403, "please solve this hCaptcha", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::Captcha));
        assert_eq!(d.confidence, 0.9);

        let d = detect_block(403, "Access Denied", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::RobotDetected));
        assert_eq!(d.confidence, 0.85);
    }

    #[test]
    fn status_503_branches_on_cloudflare() {
        let d = detect_block(503, "Checking your browser before accessing", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::RobotDetected));
        assert_eq!(d.confidence, 0.85);

        let d = detect_block(503, "service unavailable", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::IpBlock));
        assert_eq!(d.confidence, 0.6);
    }

    #[test]
    fn status_401_is_decisive_either_way() {
        let d = detect_block(401, "your IP has been banned", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::IpBlock));
        assert_eq!(d.confidence, 0.7);

        // 401 without an IP phrase must not fall through to body rules.
        let d = detect_block(401, "please solve the captcha", &no_headers());
        assert!(!d.is_blocked);
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn captcha_size_gate() {
        let small = format!("{}{}", "x".repeat(49_990), "captcha");
        assert!(small.len() < 50_000);
        let d = detect_block(200, &small, &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::Captcha));
        assert_eq!(d.confidence, 0.9);

        let large = format!("{}{}", "x".repeat(50_000), "captcha");
        let d = detect_block(200, &large, &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::Captcha));
        assert_eq!(d.confidence, 0.6);
    }

    #[test]
    fn cloudflare_size_gate_clears_large_bodies() {
        let small = format!("<p>{}cloudflare</p>", "x".repeat(14_000));
        assert!(small.len() < 15_000);
        let d = detect_block(200, &small, &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::RobotDetected));
        assert_eq!(d.confidence, 0.85);

        let large = format!("<p>{}cloudflare</p>", "x".repeat(60_000));
        let d = detect_block(200, &large, &no_headers());
        assert!(!d.is_blocked);
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn bot_and_ip_size_gates_degrade_confidence() {
        let d = detect_block(200, "unusual traffic from your network", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::RobotDetected));
        assert_eq!(d.confidence, 0.8);

        let large = format!("{} bot detected", "x".repeat(25_000));
        let d = detect_block(200, &large, &no_headers());
        assert_eq!(d.confidence, 0.5);

        let d = detect_block(200, "your ip is on a blocklist", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::IpBlock));
        assert_eq!(d.confidence, 0.7);

        let large = format!("{} blocked ip", "x".repeat(25_000));
        let d = detect_block(200, &large, &no_headers());
        assert_eq!(d.confidence, 0.4);
    }

    #[test]
    fn rate_limit_phrase_in_body() {
        let d = detect_block(200, "you are being throttled, try later", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::RateLimited));
        assert_eq!(d.confidence, 0.75);
    }

    #[test]
    fn empty_200_body_is_suspicious() {
        let d = detect_block(200, "   \n\t  ", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::Unknown));
        assert_eq!(d.confidence, 0.3);

        // Only for 200s.
        let d = detect_block(204, "", &no_headers());
        assert!(!d.is_blocked);
    }

    #[test]
    fn captcha_outranks_cloudflare_and_bot_phrases() {
        let body = "cf-ray trace, checking your browser, g-recaptcha widget";
        let d = detect_block(200, body, &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::Captcha));
    }

    #[test]
    fn retry_policy_thresholds() {
        let strong = BlockDetection::blocked(BlockedReason::IpBlock, 0.8);
        assert!(should_retry_with_stealth(&strong));

        let weak_ip = BlockDetection::blocked(BlockedReason::IpBlock, 0.6);
        assert!(!should_retry_with_stealth(&weak_ip));

        let weak_robot = BlockDetection::blocked(BlockedReason::RobotDetected, 0.5);
        assert!(should_retry_with_stealth(&weak_robot));

        let weak_captcha = BlockDetection::blocked(BlockedReason::Captcha, 0.55);
        assert!(should_retry_with_stealth(&weak_captcha));

        let faint = BlockDetection::blocked(BlockedReason::Unknown, 0.3);
        assert!(!should_retry_with_stealth(&faint));

        assert!(!should_retry_with_stealth(&BlockDetection::clear()));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let d = detect_block(200, "Just A Moment... CLOUDFLARE", &no_headers());
        assert_eq!(d.reason, Some(BlockedReason::RobotDetected));
    }
}
