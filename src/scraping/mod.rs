//! Engine routing and the scrape pipelines.

pub mod actions;
pub mod browser;
pub mod browser_pool;
pub mod http;
pub mod intercept;
pub mod stealth;

use tracing::warn;

use crate::core::app_state::AppState;
use crate::core::types::{Action, Engine, ScrapeRequest, SuccessResponse, DEFAULT_TIMEOUT_MS};
use actions::ActionError;

/// The raw HTTP engine never spends longer than this.
pub const HTTP_ENGINE_TIMEOUT_MS: u64 = 15_000;
/// Navigation-plus-readiness allowance assumed for browser engines.
const BROWSER_OVERHEAD_MS: u64 = 30_000;
/// Flat per-action allowance for everything except explicit waits.
const ACTION_OVERHEAD_MS: u64 = 250;

/// What a scrape can fail with. Transport problems never appear here — the
/// pipelines fold them into soft responses; only action failures (and
/// programmer errors) escape.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Dispatch a request to the pipeline its `engine` selects.
pub async fn run_scrape(
    state: &AppState,
    request: &ScrapeRequest,
) -> Result<SuccessResponse, ScrapeError> {
    match request.engine {
        Engine::TlsClient => http::scrape_with_http(state, request).await,
        Engine::ChromeCdp | Engine::Playwright => {
            browser::scrape_with_browser(state, request).await
        }
        Engine::Unknown => {
            warn!(
                "unknown engine requested for {}; using the browser pipeline",
                request.url
            );
            browser::scrape_with_browser(state, request).await
        }
    }
}

/// Best-effort upper bound on how long a request can take, used by callers
/// to size outer timeouts.
pub fn engine_max_time(request: &ScrapeRequest) -> u64 {
    let timeout = request.timeout_or(DEFAULT_TIMEOUT_MS);
    match request.engine {
        Engine::TlsClient => HTTP_ENGINE_TIMEOUT_MS.min(timeout),
        Engine::Playwright => (request.wait + BROWSER_OVERHEAD_MS).min(timeout),
        Engine::ChromeCdp | Engine::Unknown => {
            let action_budget: u64 = request
                .actions
                .iter()
                .map(|action| match action {
                    Action::Wait { milliseconds } => *milliseconds,
                    _ => ACTION_OVERHEAD_MS,
                })
                .sum();
            (request.wait + action_budget + BROWSER_OVERHEAD_MS).min(timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlsclient_bound_is_capped_at_fifteen_seconds() {
        let mut request = ScrapeRequest::new("https://example.com");
        request.engine = Engine::TlsClient;
        assert_eq!(engine_max_time(&request), 15_000);

        request.timeout = Some(5_000);
        assert_eq!(engine_max_time(&request), 5_000);
    }

    #[test]
    fn playwright_bound_ignores_actions() {
        let mut request = ScrapeRequest::new("https://example.com");
        request.engine = Engine::Playwright;
        request.wait = 2_000;
        request.actions = vec![Action::Wait { milliseconds: 60_000 }];
        assert_eq!(engine_max_time(&request), 32_000);
    }

    #[test]
    fn chrome_cdp_bound_charges_waits_fully_and_others_flat() {
        let mut request = ScrapeRequest::new("https://example.com");
        request.wait = 1_000;
        request.actions = vec![
            Action::Wait { milliseconds: 5_000 },
            Action::Click {
                selector: "#go".into(),
            },
            Action::Scrape { selector: None },
        ];
        // 1000 wait + 5000 wait action + 2 * 250 + 30000 overhead.
        assert_eq!(engine_max_time(&request), 36_500);
    }

    #[test]
    fn total_timeout_caps_every_engine() {
        let mut request = ScrapeRequest::new("https://example.com");
        request.timeout = Some(10_000);
        request.wait = 50_000;
        assert_eq!(engine_max_time(&request), 10_000);
    }
}
