//! Browser-driven scrape pipeline.
//!
//! One request = one slot permit + one isolated browser context + one page.
//! The page is prepared (emulation, stealth, cookies, headers,
//! interception), navigated with layered timeouts, optionally scripted via
//! the action interpreter, then read out and classified.
//!
//! Failure policy: everything that is not an action failure folds into a
//! soft response with `pageStatusCode: 0` and `pageError` set — transport
//! problems are data, not errors. Cleanup (interceptor tasks, page, context,
//! slot permit) runs on every exit path.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTouchEmulationEnabledParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, CookieParam, EventResponseReceived, ResourceType, SetCookiesParams,
    SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::cdp::browser_protocol::security::SetIgnoreCertificateErrorsParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::app_state::AppState;
use crate::core::types::{
    ScrapeRequest, SuccessResponse, WaitUntil, MAX_SELECTOR_WAIT_MS, MAX_WAIT_MS,
};
use crate::detection::{self, MIN_APPLY_CONFIDENCE};
use crate::proxy;
use crate::scraping::actions::{self, wait_for_selector};
use crate::scraping::browser_pool::IsolatedPage;
use crate::scraping::intercept::{self, InterceptOptions};
use crate::scraping::stealth;
use crate::scraping::ScrapeError;

pub async fn scrape_with_browser(
    state: &AppState,
    request: &ScrapeRequest,
) -> Result<SuccessResponse, ScrapeError> {
    let started = Instant::now();

    let _permit = state.browser.acquire_slot().await?;
    debug!("browser scrape: slot acquired for {}", request.url);

    let proxy = proxy::resolve(request, &state.config);
    let isolated = match state
        .browser
        .new_isolated_page(proxy.as_ref().map(|p| p.server.as_str()))
        .await
    {
        Ok(isolated) => isolated,
        Err(e) => return Ok(transport_failure(request, started, format!("{e:#}"))),
    };
    let IsolatedPage { page, context_id } = isolated;

    let mut intercept_handles: Vec<JoinHandle<()>> = Vec::new();
    let outcome = drive(state, request, &page, proxy, started, &mut intercept_handles).await;

    for handle in intercept_handles {
        handle.abort();
    }
    let _ = page.close().await;
    state.browser.dispose_context(context_id).await;

    match outcome {
        Ok(response) => Ok(response),
        Err(ScrapeError::Action(e)) => Err(ScrapeError::Action(e)),
        Err(ScrapeError::Internal(e)) => Ok(transport_failure(request, started, format!("{e:#}"))),
    }
}

async fn drive(
    state: &AppState,
    request: &ScrapeRequest,
    page: &Page,
    proxy: Option<proxy::ProxySettings>,
    started: Instant,
    intercept_handles: &mut Vec<JoinHandle<()>>,
) -> Result<SuccessResponse, ScrapeError> {
    let config = &state.config;
    let target =
        url::Url::parse(&request.url).map_err(|e| anyhow!("invalid target URL: {e}"))?;
    let locale = request
        .geolocation
        .as_ref()
        .and_then(|g| g.languages.as_ref())
        .and_then(|l| l.first().cloned())
        .unwrap_or_else(|| stealth::DEFAULT_LOCALE.to_string());

    if request.skip_tls_verification {
        page.execute(SetIgnoreCertificateErrorsParams::new(true))
            .await
            .context("certificate-error override failed")?;
    }

    if request.mobile {
        let (width, height) = stealth::MOBILE_VIEWPORT;
        page.execute(SetDeviceMetricsOverrideParams::new(
            width as i64,
            height as i64,
            stealth::MOBILE_DEVICE_SCALE_FACTOR,
            true,
        ))
        .await
        .context("mobile viewport override failed")?;
        page.execute(SetTouchEmulationEnabledParams::new(true))
            .await
            .context("touch emulation failed")?;
        let ua = request
            .user_agent
            .clone()
            .unwrap_or_else(|| stealth::MOBILE_USER_AGENT.to_string());
        set_user_agent(page, &ua, &locale).await?;
    } else {
        let (width, height) = stealth::DESKTOP_VIEWPORT;
        page.execute(SetDeviceMetricsOverrideParams::new(
            width as i64,
            height as i64,
            1.0,
            false,
        ))
        .await
        .context("viewport override failed")?;
        if let Some(ua) = &request.user_agent {
            set_user_agent(page, ua, &locale).await?;
        }
    }

    page.execute(
        SetLocaleOverrideParams::builder()
            .locale(locale.clone())
            .build(),
    )
    .await
    .context("locale override failed")?;

    if request.stealth && config.stealth_enabled {
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            stealth::stealth_init_script().to_string(),
        ))
        .await
        .context("stealth injection failed")?;
    }

    if !request.headers.is_empty() {
        let headers = network::Headers::new(
            serde_json::to_value(&request.headers).context("header serialization failed")?,
        );
        page.execute(SetExtraHttpHeadersParams::new(headers))
            .await
            .context("extra headers failed")?;
    }

    if !request.cookies.is_empty() {
        let host = target.host_str().unwrap_or_default().to_string();
        let mut params = Vec::with_capacity(request.cookies.len());
        for cookie in &request.cookies {
            let param = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone().unwrap_or_else(|| host.clone()))
                .path(cookie.path.clone().unwrap_or_else(|| "/".to_string()))
                .build()
                .map_err(|e| anyhow!("invalid cookie '{}': {e}", cookie.name))?;
            params.push(param);
        }
        page.execute(SetCookiesParams::new(params))
            .await
            .context("cookie injection failed")?;
    }

    let intercept_opts = InterceptOptions {
        block_ads: request.block_ads,
        block_media: request.block_media && config.block_media,
        proxy_credentials: proxy.as_ref().and_then(|p| {
            p.username
                .clone()
                .map(|u| (u, p.password.clone().unwrap_or_default()))
        }),
    };
    if !intercept_opts.is_noop() {
        let handles = intercept::install(page, intercept_opts)
            .await
            .context("interception setup failed")?;
        intercept_handles.extend(handles);
    }

    page.execute(network::EnableParams::default())
        .await
        .context("network domain enable failed")?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .context("response listener failed")?;

    let total_budget = request.timeout_or(config.timeout_ms);
    let nav_timeout = total_budget.min(config.page_load_timeout_ms);
    tokio::time::timeout(
        Duration::from_millis(nav_timeout),
        page.goto(request.url.clone()),
    )
    .await
    .map_err(|_| anyhow!("navigation timeout after {nav_timeout}ms"))?
    .context("navigation failed")?;

    wait_for_readiness(page, request.wait_until, nav_timeout).await;

    if let Some(selector) = &request.wait_for_selector {
        let budget = total_budget.min(MAX_SELECTOR_WAIT_MS);
        wait_for_selector(page, selector, budget)
            .await
            .context("waitForSelector failed")?;
    }

    if request.wait > 0 {
        tokio::time::sleep(Duration::from_millis(request.wait.min(MAX_WAIT_MS))).await;
    }

    // Drain the buffered network events; the first document response is the
    // main navigation (redirect hops never emit responseReceived).
    let mut page_status: u16 = 200;
    let mut response_headers: HashMap<String, String> = HashMap::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(250), responses.next()).await
    {
        if event.r#type == ResourceType::Document {
            page_status = event.response.status as u16;
            response_headers = flatten_headers(&event.response.headers);
            break;
        }
    }
    drop(responses);

    let mut content = page.content().await.context("content read failed")?;
    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| request.url.clone());

    let mut action_results = None;
    let mut action_content = None;
    let mut screenshots = Vec::new();
    if !request.actions.is_empty() {
        let outcome = actions::run_actions(page, &request.actions).await?;
        if !outcome.results.is_empty() {
            action_results = Some(outcome.results);
        }
        if !outcome.contents.is_empty() {
            action_content = Some(outcome.contents);
        }
        screenshots = outcome.screenshots;
        content = page.content().await.context("content re-read failed")?;
    }

    let mut screenshot = None;
    if request.screenshot || request.full_page_screenshot {
        let png = page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(request.full_page_screenshot)
                    .build(),
            )
            .await
            .context("screenshot capture failed")?;
        screenshot = Some(general_purpose::STANDARD.encode(png));
    }

    let detection = detection::detect_block(page_status, &content, &response_headers);
    let blocked_reason = (detection.is_blocked && detection.confidence >= MIN_APPLY_CONFIDENCE)
        .then_some(detection.reason)
        .flatten();
    if let Some(reason) = &blocked_reason {
        info!(
            "browser scrape: {} flagged as blocked ({:?}, confidence {:.2})",
            request.url, reason, detection.confidence
        );
    }

    Ok(SuccessResponse {
        time_taken: started.elapsed().as_millis() as u64,
        content,
        url: Some(final_url),
        page_status_code: page_status,
        response_headers: Some(response_headers),
        screenshot,
        screenshots: (!screenshots.is_empty()).then_some(screenshots),
        action_content,
        action_results,
        blocked_reason,
        used_mobile_proxy: Some(request.mobile_proxy),
        ..Default::default()
    })
}

async fn set_user_agent(page: &Page, user_agent: &str, locale: &str) -> Result<()> {
    let params = SetUserAgentOverrideParams::builder()
        .user_agent(user_agent)
        .accept_language(locale)
        .build()
        .map_err(|e| anyhow!("invalid user-agent override: {e}"))?;
    page.execute(params)
        .await
        .context("user-agent override failed")?;
    Ok(())
}

/// Best-effort readiness wait after the navigation commits. The hard limit
/// is the goto timeout; running out of readiness budget is not an error.
async fn wait_for_readiness(page: &Page, wait_until: WaitUntil, budget_ms: u64) {
    match wait_until {
        WaitUntil::Load => poll_ready_state(page, "complete", budget_ms).await,
        WaitUntil::Domcontentloaded => poll_ready_state(page, "interactive", budget_ms).await,
        WaitUntil::Networkidle => wait_until_network_idle(page, 500, budget_ms).await,
    }
}

async fn poll_ready_state(page: &Page, minimum: &str, budget_ms: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(budget_ms);
    loop {
        let state: String = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .unwrap_or_default();
        let satisfied = match minimum {
            "interactive" => state == "interactive" || state == "complete",
            _ => state == "complete",
        };
        if satisfied || tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Playwright-style networkidle heuristic: the resource-entry count must
/// hold still for `quiet_ms` with a complete document.
async fn wait_until_network_idle(page: &Page, quiet_ms: u64, budget_ms: u64) {
    let start = Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = Instant::now();

    loop {
        if start.elapsed().as_millis() as u64 >= budget_ms {
            debug!("networkidle: budget of {budget_ms}ms exhausted");
            return;
        }

        let count: u64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_u64())
            .unwrap_or(0);
        let complete: bool = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .map(|s| s == "complete")
            .unwrap_or(false);

        if !complete || count != last_count {
            last_count = count;
            stable_since = Instant::now();
        } else if stable_since.elapsed().as_millis() as u64 >= quiet_ms {
            return;
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

fn flatten_headers(headers: &network::Headers) -> HashMap<String, String> {
    let mut flat = HashMap::new();
    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(headers) {
        for (name, value) in map {
            let rendered = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            flat.insert(name, rendered);
        }
    }
    flat
}

fn transport_failure(request: &ScrapeRequest, started: Instant, message: String) -> SuccessResponse {
    info!("browser scrape: {} failed softly: {}", request.url, message);
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
