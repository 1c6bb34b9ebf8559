use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::detection::BlockedReason;

/// Total request budget when the client sends no `timeout`.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;
/// Hard cap on post-load idle waits and `wait` actions.
pub const MAX_WAIT_MS: u64 = 30_000;
/// Hard cap on `waitForSelector`.
pub const MAX_SELECTOR_WAIT_MS: u64 = 30_000;
/// How long `click`/`type` actions wait for their selector to appear.
pub const ACTION_SELECTOR_WAIT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Engine {
    #[serde(rename = "chrome-cdp")]
    ChromeCdp,
    #[serde(rename = "playwright")]
    Playwright,
    #[serde(rename = "tlsclient")]
    TlsClient,
    /// Anything else the client sends; routed to the browser pipeline with
    /// a warning.
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::ChromeCdp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    #[default]
    Load,
    Domcontentloaded,
    Networkidle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    #[default]
    Down,
    Up,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// One step of a scripted page interaction. Steps run strictly in order
/// against the same page; the first failure aborts the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "wait")]
    Wait {
        #[serde(default = "default_wait_action_ms")]
        milliseconds: u64,
    },
    #[serde(rename = "click")]
    Click { selector: String },
    #[serde(rename = "type")]
    Type { selector: String, text: String },
    #[serde(rename = "scroll")]
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    #[serde(rename = "screenshot")]
    Screenshot {
        #[serde(rename = "fullPage", default)]
        full_page: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        viewport: Option<ViewportSize>,
    },
    #[serde(rename = "scrape")]
    Scrape {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    #[serde(rename = "executeJavascript")]
    ExecuteJavascript {
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    #[serde(rename = "pdf")]
    Pdf {},
}

impl Action {
    /// Wire name of the variant, used in action results and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Wait { .. } => "wait",
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Scroll { .. } => "scroll",
            Action::Screenshot { .. } => "screenshot",
            Action::Scrape { .. } => "scrape",
            Action::ExecuteJavascript { .. } => "executeJavascript",
            Action::Pdf {} => "pdf",
        }
    }
}

fn default_wait_action_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyProfile {
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Geolocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
}

/// A scrape request as accepted on `POST /v1/scrape`.
///
/// Field names match the hosted scrape-engine API; unknown fields are
/// rejected so schema drift surfaces as a 400 instead of silent behavior
/// differences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub wait: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub wait_until: WaitUntil,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,
    #[serde(default)]
    pub screenshot: bool,
    #[serde(default)]
    pub full_page_screenshot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_profile: Option<ProxyProfile>,
    #[serde(default)]
    pub mobile_proxy: bool,
    #[serde(default = "default_true")]
    pub stealth: bool,
    #[serde(default = "default_true")]
    pub block_media: bool,
    #[serde(default = "default_true")]
    pub block_ads: bool,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<Geolocation>,
    #[serde(default)]
    pub skip_tls_verification: bool,
    #[serde(default)]
    pub instant_return: bool,

    // Accepted for API compatibility; not acted upon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_request: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "saveScrapeResultToGCS"
    )]
    pub save_scrape_result_to_gcs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero_data_retention: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_smart_wait_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atsv: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_js_dom: Option<bool>,
}

fn default_true() -> bool {
    true
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        // Mirror the serde defaults so a hand-built request equals the
        // parse of `{"url": ...}`.
        serde_json::from_value(serde_json::json!({ "url": url.into() }))
            .expect("minimal request always deserializes")
    }

    /// Total budget in milliseconds, falling back to `default` when the
    /// client sent none.
    pub fn timeout_or(&self, default: u64) -> u64 {
        self.timeout.unwrap_or(default)
    }

    /// Validate fields serde cannot: returns one entry per offending path.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match url::Url::parse(&self.url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            Ok(u) => errors.push(FieldError {
                path: "url".into(),
                message: format!("unsupported scheme '{}'; expected http or https", u.scheme()),
            }),
            Err(e) => errors.push(FieldError {
                path: "url".into(),
                message: format!("invalid absolute URL: {e}"),
            }),
        }
        for (idx, cookie) in self.cookies.iter().enumerate() {
            if cookie.name.is_empty() {
                errors.push(FieldError {
                    path: format!("cookies[{idx}].name"),
                    message: "cookie name must not be empty".into(),
                });
            }
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrorBody {
    pub error: String,
    pub details: Vec<FieldError>,
}

/// Result emitted for actions that produce output (screenshot, scrape,
/// executeJavascript, pdf).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub idx: usize,
    #[serde(rename = "type")]
    pub action_type: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionContent {
    pub url: String,
    pub html: String,
}

/// Normalized scrape outcome. `pageStatusCode == 0` together with a
/// non-empty `pageError` marks a transport failure that never reached the
/// target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub time_taken: u64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub page_status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_content: Option<Vec<ActionContent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_results: Option<Vec<ActionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<BlockedReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_mobile_proxy: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub processing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_request_gets_api_defaults() {
        let req: ScrapeRequest =
            serde_json::from_value(serde_json::json!({"url": "https://example.com"})).unwrap();
        assert_eq!(req.engine, Engine::ChromeCdp);
        assert_eq!(req.wait_until, WaitUntil::Load);
        assert_eq!(req.wait, 0);
        assert!(req.stealth);
        assert!(req.block_media);
        assert!(req.block_ads);
        assert!(!req.mobile);
        assert!(!req.instant_return);
        assert!(!req.skip_tls_verification);
        assert!(req.timeout.is_none());
        assert_eq!(req.timeout_or(DEFAULT_TIMEOUT_MS), DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_value::<ScrapeRequest>(serde_json::json!({
            "url": "https://example.com",
            "definitelyNotAField": 1,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn unacted_fields_are_accepted() {
        let req: ScrapeRequest = serde_json::from_value(serde_json::json!({
            "url": "https://example.com",
            "priority": 5,
            "logRequest": true,
            "saveScrapeResultToGCS": false,
            "zeroDataRetention": true,
            "disableSmartWaitCache": true,
            "atsv": {"anything": "goes"},
            "disableJsDom": false,
            "mobileProxy": true,
        }))
        .unwrap();
        assert_eq!(req.priority, Some(5));
        assert!(req.mobile_proxy);
    }

    #[test]
    fn request_round_trips_through_json() {
        let req = ScrapeRequest::new("https://example.com/page");
        let json = serde_json::to_value(&req).unwrap();
        let back: ScrapeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn unknown_engine_maps_to_fallback_variant() {
        let req: ScrapeRequest = serde_json::from_value(serde_json::json!({
            "url": "https://example.com",
            "engine": "selenium",
        }))
        .unwrap();
        assert_eq!(req.engine, Engine::Unknown);
    }

    #[test]
    fn actions_parse_with_tag_and_defaults() {
        let actions: Vec<Action> = serde_json::from_value(serde_json::json!([
            {"type": "wait"},
            {"type": "wait", "milliseconds": 250},
            {"type": "click", "selector": "#go"},
            {"type": "type", "selector": "input", "text": "hi"},
            {"type": "scroll"},
            {"type": "scroll", "direction": "up", "amount": 900},
            {"type": "screenshot", "fullPage": true},
            {"type": "scrape", "selector": ".price"},
            {"type": "executeJavascript", "script": "1 + 1"},
            {"type": "pdf"},
        ]))
        .unwrap();
        assert_eq!(actions.len(), 10);
        assert_eq!(actions[0], Action::Wait { milliseconds: 1000 });
        assert_eq!(actions[1], Action::Wait { milliseconds: 250 });
        assert!(matches!(
            &actions[4],
            Action::Scroll {
                direction: ScrollDirection::Down,
                amount: None,
                selector: None
            }
        ));
        assert_eq!(actions[9].kind(), "pdf");
    }

    #[test]
    fn validate_flags_bad_urls() {
        let mut req = ScrapeRequest::new("not-a-url");
        let errors = req.validate();
        assert_eq!(errors[0].path, "url");

        req.url = "ftp://example.com".into();
        let errors = req.validate();
        assert_eq!(errors[0].path, "url");

        req.url = "https://example.com".into();
        assert!(req.validate().is_empty());
    }

    #[test]
    fn success_response_wire_names_are_camel_case() {
        let resp = SuccessResponse {
            job_id: Some("abc".into()),
            time_taken: 12,
            content: "<html></html>".into(),
            page_status_code: 200,
            ..Default::default()
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("jobId").is_some());
        assert!(json.get("timeTaken").is_some());
        assert!(json.get("pageStatusCode").is_some());
        assert!(json.get("pageError").is_none());
    }
}
