//! Request interception: ad blocking, media blocking, proxy auth.
//!
//! Uses the CDP Fetch domain. Every paused request is either failed with
//! `BlockedByClient` or continued; when proxy credentials are present the
//! same Fetch session also answers auth challenges, which is the only way
//! to authenticate a proxy on a per-context basis over CDP.

use aho_corasick::AhoCorasick;
use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
    FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::OnceLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const AD_DOMAIN_PATTERNS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "googletagmanager.com",
    "googletagservices.com",
    "adservice.google.",
    "amazon-adsystem.com",
    "ads.twitter.com",
    "ads.linkedin.com",
    "advertising.com",
    "adnxs.com",
    "criteo.com",
    "taboola.com",
    "outbrain.com",
    "moatads.com",
    "pubmatic.com",
    "rubiconproject.com",
    "openx.net",
    "adsrvr.org",
    "smartadserver.com",
    "popads.net",
];

const BLOCKED_MEDIA_EXTENSIONS: &[&str] = &[
    ".mp4", ".webm", ".avi", ".mov", ".wmv", ".flv", ".mp3", ".wav", ".ogg", ".gif", ".webp",
];

static AD_MATCHER: OnceLock<AhoCorasick> = OnceLock::new();

fn ad_matcher() -> &'static AhoCorasick {
    AD_MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(AD_DOMAIN_PATTERNS)
            .expect("valid ad-domain patterns")
    })
}

/// Decide whether a paused request should be aborted.
pub fn should_block(
    url: &str,
    resource_type: &ResourceType,
    block_ads: bool,
    block_media: bool,
) -> bool {
    if block_ads && ad_matcher().is_match(url) {
        return true;
    }
    if block_media {
        if matches!(resource_type, ResourceType::Media | ResourceType::Font) {
            return true;
        }
        let lower = url.to_lowercase();
        if BLOCKED_MEDIA_EXTENSIONS.iter().any(|ext| lower.contains(ext)) {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Default)]
pub struct InterceptOptions {
    pub block_ads: bool,
    pub block_media: bool,
    /// `(username, password)` for the context proxy, answered on
    /// `Fetch.authRequired`.
    pub proxy_credentials: Option<(String, String)>,
}

impl InterceptOptions {
    pub fn is_noop(&self) -> bool {
        !self.block_ads && !self.block_media && self.proxy_credentials.is_none()
    }
}

/// Enable the Fetch domain on `page` and spawn the interception tasks.
///
/// The returned handles are tied to the page's event streams and finish when
/// the page closes; callers abort them during cleanup to not leak tasks on
/// early exits.
pub async fn install(page: &Page, opts: InterceptOptions) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();

    let enable = EnableParams::builder()
        .handle_auth_requests(opts.proxy_credentials.is_some())
        .build();
    page.execute(enable).await?;

    let mut paused = page.event_listener::<EventRequestPaused>().await?;
    let intercept_page = page.clone();
    let block_ads = opts.block_ads;
    let block_media = opts.block_media;
    handles.push(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let url = event.request.url.clone();
            let blocked = should_block(&url, &event.resource_type, block_ads, block_media);
            let outcome = if blocked {
                debug!("intercept: blocking {}", url);
                intercept_page
                    .execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
            } else {
                intercept_page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            };
            if let Err(e) = outcome {
                // The page is usually mid-close here; nothing to recover.
                debug!("intercept: could not resolve paused request: {e}");
                break;
            }
        }
    }));

    if let Some((username, password)) = opts.proxy_credentials {
        let mut auth_events = page.event_listener::<EventAuthRequired>().await?;
        let auth_page = page.clone();
        handles.push(tokio::spawn(async move {
            while let Some(event) = auth_events.next().await {
                let response = AuthChallengeResponse {
                    response: AuthChallengeResponseResponse::ProvideCredentials,
                    username: Some(username.clone()),
                    password: Some(password.clone()),
                };
                if let Err(e) = auth_page
                    .execute(ContinueWithAuthParams::new(
                        event.request_id.clone(),
                        response,
                    ))
                    .await
                {
                    warn!("intercept: proxy auth response failed: {e}");
                    break;
                }
            }
        }));
    }

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ad_domains_are_blocked_only_when_asked() {
        let url = "https://securepubads.doubleclick.net/gpt.js";
        assert!(should_block(url, &ResourceType::Script, true, false));
        assert!(!should_block(url, &ResourceType::Script, false, false));
    }

    #[test]
    fn media_blocking_covers_types_and_extensions() {
        assert!(should_block(
            "https://cdn.example.com/stream",
            &ResourceType::Media,
            false,
            true
        ));
        assert!(should_block(
            "https://cdn.example.com/font",
            &ResourceType::Font,
            false,
            true
        ));
        assert!(should_block(
            "https://cdn.example.com/clip.MP4?x=1",
            &ResourceType::Other,
            false,
            true
        ));
        assert!(should_block(
            "https://cdn.example.com/anim.gif",
            &ResourceType::Image,
            false,
            true
        ));
        assert!(!should_block(
            "https://cdn.example.com/photo.jpg",
            &ResourceType::Image,
            false,
            true
        ));
    }

    #[test]
    fn documents_pass_through_untouched() {
        assert!(!should_block(
            "https://example.com/",
            &ResourceType::Document,
            true,
            true
        ));
    }
}
