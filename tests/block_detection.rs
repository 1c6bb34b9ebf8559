//! End-to-end classifier scenarios against captured-response shapes.

use std::collections::HashMap;

use scrapedock::detection::{detect_block, should_retry_with_stealth, BlockedReason};

fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn bare_403_is_an_ip_block() {
    let d = detect_block(403, "", &headers(&[]));
    assert!(d.is_blocked);
    assert_eq!(d.reason, Some(BlockedReason::IpBlock));
    assert!(d.confidence >= 0.8);
}

#[test]
fn bare_429_is_rate_limited() {
    let d = detect_block(429, "", &headers(&[]));
    assert!(d.is_blocked);
    assert_eq!(d.reason, Some(BlockedReason::RateLimited));
    assert!(d.confidence >= 0.9);
}

#[test]
fn retry_after_header_flags_even_a_200() {
    let d = detect_block(200, "", &headers(&[("Retry-After", "60")]));
    assert!(d.is_blocked);
    assert_eq!(d.reason, Some(BlockedReason::RateLimited));
    assert!(d.confidence >= 0.9);
}

#[test]
fn recaptcha_widget_in_a_200_body_is_a_captcha() {
    let d = detect_block(200, "<div class=\"g-recaptcha\"></div>", &headers(&[]));
    assert!(d.is_blocked);
    assert_eq!(d.reason, Some(BlockedReason::Captcha));
}

#[test]
fn large_page_mentioning_cloudflare_is_clean() {
    let body = format!("<p>{}cloudflare</p>", "x".repeat(60_000));
    let d = detect_block(200, &body, &headers(&[]));
    assert!(!d.is_blocked);
    assert!(d.reason.is_none());
    assert_eq!(d.confidence, 0.0);
}

#[test]
fn cloudflare_gate_sits_exactly_at_15000_bytes() {
    let just_under = format!("{}cloudflare", "x".repeat(14_989));
    assert_eq!(just_under.len(), 14_999);
    let d = detect_block(200, &just_under, &headers(&[]));
    assert!(d.is_blocked);
    assert_eq!(d.reason, Some(BlockedReason::RobotDetected));
    assert_eq!(d.confidence, 0.85);

    let just_over = format!("{}cloudflare", "x".repeat(14_991));
    assert_eq!(just_over.len(), 15_001);
    let d = detect_block(200, &just_over, &headers(&[]));
    assert!(!d.is_blocked);
}

#[test]
fn captcha_gate_sits_exactly_at_50000_bytes() {
    let just_under = format!("{}captcha", "x".repeat(49_992));
    assert_eq!(just_under.len(), 49_999);
    let d = detect_block(200, &just_under, &headers(&[]));
    assert_eq!(d.confidence, 0.9);

    let just_over = format!("{}captcha", "x".repeat(49_994));
    assert_eq!(just_over.len(), 50_001);
    let d = detect_block(200, &just_over, &headers(&[]));
    assert_eq!(d.reason, Some(BlockedReason::Captcha));
    assert_eq!(d.confidence, 0.6);
}

#[test]
fn ratelimit_remaining_zero_headers_win_over_status() {
    for header in ["X-RateLimit-Remaining", "x-rate-limit-remaining"] {
        let d = detect_block(503, "cloudflare", &headers(&[(header, "0")]));
        assert_eq!(d.reason, Some(BlockedReason::RateLimited));
        assert!(d.confidence >= 0.9);
    }
}

#[test]
fn stealth_retry_policy_follows_confidence_and_reason() {
    // Strong block of any kind retries.
    assert!(should_retry_with_stealth(&detect_block(429, "", &headers(&[]))));
    // Weak robot signal still retries.
    let weak_robot = detect_block(200, &format!("{}bot detected", "x".repeat(25_000)), &headers(&[]));
    assert_eq!(weak_robot.confidence, 0.5);
    assert!(should_retry_with_stealth(&weak_robot));
    // Weak ip signal does not.
    let weak_ip = detect_block(200, &format!("{}blocked ip", "x".repeat(25_000)), &headers(&[]));
    assert_eq!(weak_ip.confidence, 0.4);
    assert!(!should_retry_with_stealth(&weak_ip));
    // Clean pages never retry.
    assert!(!should_retry_with_stealth(&detect_block(
        200,
        "regular page",
        &headers(&[])
    )));
}
