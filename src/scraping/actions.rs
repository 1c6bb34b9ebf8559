//! Scripted page interactions.
//!
//! Actions run strictly in sequence against one live page. The first
//! failing action aborts the whole sequence with an [`ActionError`] naming
//! its index and type; unlike transport errors, action failures propagate
//! out of the scrape as a hard failure.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::Element;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use std::time::Duration;
use tracing::warn;

use crate::core::types::{
    Action, ActionContent, ActionResult, ScrollDirection, ACTION_SELECTOR_WAIT_MS, MAX_WAIT_MS,
};

pub const PDF_PLACEHOLDER_LINK: &str = "pdf-not-supported-in-self-hosted";

const DEFAULT_SCROLL_AMOUNT: i64 = 500;
const SELECTOR_POLL_MS: u64 = 250;

#[derive(Debug, thiserror::Error)]
#[error("action {index} ({kind}) failed: {message}")]
pub struct ActionError {
    pub index: usize,
    pub kind: &'static str,
    pub message: String,
}

/// Everything a sequence produced, merged into the response by the browser
/// pipeline.
#[derive(Debug, Default)]
pub struct ActionOutcome {
    pub results: Vec<ActionResult>,
    pub screenshots: Vec<String>,
    pub contents: Vec<ActionContent>,
}

/// Execute `actions` in order. Stops at the first failure.
pub async fn run_actions(page: &Page, actions: &[Action]) -> Result<ActionOutcome, ActionError> {
    let mut outcome = ActionOutcome::default();
    for (index, action) in actions.iter().enumerate() {
        run_one(page, index, action, &mut outcome)
            .await
            .map_err(|e| ActionError {
                index,
                kind: action.kind(),
                message: format!("{e:#}"),
            })?;
    }
    Ok(outcome)
}

async fn run_one(
    page: &Page,
    index: usize,
    action: &Action,
    outcome: &mut ActionOutcome,
) -> Result<()> {
    match action {
        Action::Wait { milliseconds } => {
            tokio::time::sleep(Duration::from_millis((*milliseconds).min(MAX_WAIT_MS))).await;
        }
        Action::Click { selector } => {
            let element = wait_for_selector(page, selector, ACTION_SELECTOR_WAIT_MS).await?;
            element.click().await.context("click failed")?;
        }
        Action::Type { selector, text } => {
            let element = wait_for_selector(page, selector, ACTION_SELECTOR_WAIT_MS).await?;
            element.click().await.context("focus failed")?;
            // Fill semantics: wipe whatever is there before typing.
            page.evaluate(format!(
                "(() => {{ const el = document.querySelector({}); if (el) el.value = ''; }})()",
                js_string(selector)
            ))
            .await
            .context("clearing input failed")?;
            element.type_str(text).await.context("typing failed")?;
        }
        Action::Scroll {
            direction,
            amount,
            selector,
        } => {
            if let Some(selector) = selector {
                let element = wait_for_selector(page, selector, ACTION_SELECTOR_WAIT_MS).await?;
                element
                    .scroll_into_view()
                    .await
                    .context("scroll into view failed")?;
            } else {
                let magnitude = amount.unwrap_or(DEFAULT_SCROLL_AMOUNT);
                let delta = match direction {
                    ScrollDirection::Down => magnitude,
                    ScrollDirection::Up => -magnitude,
                };
                page.evaluate(format!("window.scrollBy(0, {delta})"))
                    .await
                    .context("window scroll failed")?;
            }
        }
        Action::Screenshot {
            full_page,
            viewport,
        } => {
            if let Some(vp) = viewport {
                page.execute(SetDeviceMetricsOverrideParams::new(
                    vp.width as i64,
                    vp.height as i64,
                    1.0,
                    false,
                ))
                .await
                .context("viewport override failed")?;
            }
            let png = page
                .screenshot(
                    ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .full_page(*full_page)
                        .build(),
                )
                .await
                .context("screenshot capture failed")?;
            let encoded = general_purpose::STANDARD.encode(png);
            outcome.screenshots.push(encoded.clone());
            outcome.results.push(ActionResult {
                idx: index,
                action_type: "screenshot".into(),
                result: serde_json::json!({ "base64": encoded }),
            });
        }
        Action::Scrape { selector } => {
            let html = match selector {
                Some(selector) => page
                    .evaluate(format!(
                        "(() => {{ const el = document.querySelector({}); \
                         return el ? el.innerHTML : ''; }})()",
                        js_string(selector)
                    ))
                    .await
                    .context("selector scrape failed")?
                    .into_value::<String>()
                    .unwrap_or_default(),
                None => page.content().await.context("content read failed")?,
            };
            let url = page
                .url()
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            outcome.results.push(ActionResult {
                idx: index,
                action_type: "scrape".into(),
                result: serde_json::json!({ "url": url, "html": html }),
            });
            outcome.contents.push(ActionContent { url, html });
        }
        Action::ExecuteJavascript { script, .. } => {
            // The wrapped value is always a string: either the JSON of the
            // script's return value or the JSON of {"error": message}.
            let serialized = match page.evaluate(script.clone()).await {
                Ok(eval) => eval
                    .into_value::<serde_json::Value>()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|_| "null".to_string()),
                Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
            };
            outcome.results.push(ActionResult {
                idx: index,
                action_type: "executeJavascript".into(),
                result: serde_json::json!({ "return": serialized }),
            });
        }
        Action::Pdf {} => {
            warn!("pdf action requested but PDF rendering is not supported here");
            outcome.results.push(ActionResult {
                idx: index,
                action_type: "pdf".into(),
                result: serde_json::json!({ "link": PDF_PLACEHOLDER_LINK }),
            });
        }
    }
    Ok(())
}

/// Poll until `selector` matches an element or `timeout_ms` elapses.
pub(crate) async fn wait_for_selector(
    page: &Page,
    selector: &str,
    timeout_ms: u64,
) -> Result<Element> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("selector '{selector}' did not appear within {timeout_ms}ms");
        }
        tokio::time::sleep(Duration::from_millis(SELECTOR_POLL_MS)).await;
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_error_names_index_and_kind() {
        let err = ActionError {
            index: 3,
            kind: "click",
            message: "selector '#go' did not appear within 10000ms".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("action 3"));
        assert!(rendered.contains("click"));
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string("a\"b'c"), r#""a\"b'c""#);
    }
}
