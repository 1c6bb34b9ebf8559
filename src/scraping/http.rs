//! Raw HTTP scrape pipeline (`tlsclient` engine).
//!
//! No browser: a single GET with a browser-like header baseline, optional
//! proxy, bounded redirects, and charset-aware decoding. Transport failures
//! fold into a soft `pageStatusCode: 0` response, mirroring the browser
//! pipeline. The final URL after redirects is deliberately not surfaced —
//! the response echoes the request URL.

use encoding_rs::{Encoding, UTF_8};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::core::app_state::AppState;
use crate::core::types::{ScrapeRequest, SuccessResponse};
use crate::detection::{self, MIN_APPLY_CONFIDENCE};
use crate::proxy;
use crate::scraping::stealth;
use crate::scraping::{ScrapeError, HTTP_ENGINE_TIMEOUT_MS};

const MAX_REDIRECTS: usize = 10;

/// Fixed browser-like baseline sent on every request. `Accept-Encoding` is
/// negotiated by the client so response bodies arrive decompressed.
const BASELINE_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Cache-Control", "max-age=0"),
    ("Pragma", "no-cache"),
    (
        "sec-ch-ua",
        "\"Chromium\";v=\"132\", \"Google Chrome\";v=\"132\", \"Not_A Brand\";v=\"24\"",
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("sec-ch-ua-platform-version", "\"15.0.0\""),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Upgrade-Insecure-Requests", "1"),
];

pub async fn scrape_with_http(
    state: &AppState,
    request: &ScrapeRequest,
) -> Result<SuccessResponse, ScrapeError> {
    let started = Instant::now();
    let budget = request
        .timeout_or(state.config.timeout_ms)
        .min(HTTP_ENGINE_TIMEOUT_MS);

    let response = match fetch(state, request, budget).await {
        Ok(response) => response,
        Err(message) => return Ok(transport_failure(request, started, message)),
    };

    let detection = detection::detect_block(response.status, &response.body, &response.headers);
    let blocked_reason = (detection.is_blocked && detection.confidence >= MIN_APPLY_CONFIDENCE)
        .then_some(detection.reason)
        .flatten();
    if let Some(reason) = &blocked_reason {
        info!(
            "http scrape: {} flagged as blocked ({:?}, confidence {:.2})",
            request.url, reason, detection.confidence
        );
    }

    Ok(SuccessResponse {
        time_taken: started.elapsed().as_millis() as u64,
        content: response.body,
        url: Some(request.url.clone()),
        page_status_code: response.status,
        response_headers: Some(response.headers),
        blocked_reason,
        used_mobile_proxy: Some(request.mobile_proxy),
        ..Default::default()
    })
}

struct RawResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: String,
}

async fn fetch(
    state: &AppState,
    request: &ScrapeRequest,
    budget_ms: u64,
) -> Result<RawResponse, String> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_millis(budget_ms))
        .connect_timeout(Duration::from_millis(budget_ms));

    if request.skip_tls_verification {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(settings) = proxy::resolve(request, &state.config) {
        let mut proxy = reqwest::Proxy::all(&settings.server)
            .map_err(|e| format!("invalid proxy '{}': {e}", settings.server))?;
        if let Some(username) = &settings.username {
            proxy = proxy.basic_auth(username, settings.password.as_deref().unwrap_or(""));
        }
        builder = builder.proxy(proxy);
        debug!("http scrape: using proxy {}", settings.server);
    }

    let client = builder
        .build()
        .map_err(|e| format!("http client build failed: {e}"))?;

    let user_agent = request
        .user_agent
        .clone()
        .unwrap_or_else(|| stealth::random_user_agent().to_string());

    let mut req = client.get(&request.url).header("User-Agent", user_agent);
    for (name, value) in BASELINE_HEADERS {
        req = req.header(*name, *value);
    }
    for (name, value) in &request.headers {
        req = req.header(name.as_str(), value.as_str());
    }
    if !request.cookies.is_empty() {
        let jar = request
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        req = req.header("Cookie", jar);
    }

    let response = req.send().await.map_err(|e| format!("request failed: {e}"))?;

    let status = response.status().as_u16();
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        headers.insert(
            name.to_string(),
            value.to_str().unwrap_or_default().to_string(),
        );
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| format!("body read failed: {e}"))?;

    let charset = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .and_then(|(_, v)| charset_from_content_type(v));
    let body = decode_body(&bytes, charset.as_deref());

    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

/// Extract the `charset=` parameter from a Content-Type value.
fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_ascii_lowercase())
        } else {
            None
        }
    })
}

/// Decode with the declared charset when it is known, falling back to UTF-8
/// (lossy) for unknown or missing labels.
fn decode_body(bytes: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn transport_failure(request: &ScrapeRequest, started: Instant, message: String) -> SuccessResponse {
    info!("http scrape: {} failed softly: {}", request.url, message);
    SuccessResponse {
        time_taken: started.elapsed().as_millis() as u64,
        content: String::new(),
        url: Some(request.url.clone()),
        page_status_code: 0,
        page_error: Some(message),
        used_mobile_proxy: Some(request.mobile_proxy),
        ..Default::default()
    }
}
