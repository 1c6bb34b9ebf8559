//! Shared browser instance and page-slot admission.
//!
//! One Chromium process serves every request. It is launched lazily under
//! the pool mutex, so concurrent first-callers wait on one launch instead of
//! racing several, and the same probe-and-relaunch path heals a crashed or
//! disconnected browser transparently on the next request.
//!
//! Page concurrency is bounded by a semaphore: permits are the admission
//! unit, waiters queue FIFO, and dropping the permit releases the slot on
//! every exit path.

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::core::config::Config;

const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-blink-features=AutomationControlled",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--disable-crash-reporter",
    "--disable-breakpad",
    "--no-first-run",
    "--no-default-browser-check",
    "--hide-scrollbars",
    "--mute-audio",
];

/// A page running in its own CDP browser context. Cookies, cache, and
/// storage are invisible to every other request; disposing the context
/// tears all of it down.
pub struct IsolatedPage {
    pub page: Page,
    pub context_id: BrowserContextId,
}

pub struct BrowserPool {
    config: Arc<Config>,
    browser: Mutex<Option<Browser>>,
    slots: Arc<Semaphore>,
}

impl BrowserPool {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_pages));
        Arc::new(Self {
            config,
            browser: Mutex::new(None),
            slots,
        })
    }

    /// Wait for a page slot. The permit is the slot: hold it for the whole
    /// scrape and let it drop on any exit path.
    pub async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .context("page-slot semaphore closed")
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Open a fresh page inside a new isolated browser context, launching or
    /// re-launching the browser if needed. `proxy_server` applies to the
    /// whole context.
    pub async fn new_isolated_page(&self, proxy_server: Option<&str>) -> Result<IsolatedPage> {
        let mut guard = self.browser.lock().await;

        let alive = match guard.as_mut() {
            Some(b) => b.version().await.is_ok(),
            None => false,
        };
        if !alive {
            if let Some(mut old) = guard.take() {
                warn!("browser pool: instance unreachable, restarting");
                let _ = old.close().await;
            }
            *guard = Some(self.launch().await?);
        }
        let browser = guard.as_mut().expect("browser present after init");

        let mut context_params = CreateBrowserContextParams::builder();
        if let Some(proxy) = proxy_server {
            context_params = context_params.proxy_server(proxy);
        }
        let context_id = browser
            .execute(context_params.build())
            .await
            .context("failed to create browser context")?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(|e| anyhow!("invalid target params: {e}"))?;
        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id.clone()))
                    .await;
                return Err(anyhow!("failed to open page: {e}"));
            }
        };

        Ok(IsolatedPage { page, context_id })
    }

    /// Dispose an isolated context and everything in it. Idempotent enough
    /// for cleanup paths: failures are logged, not surfaced.
    pub async fn dispose_context(&self, context_id: BrowserContextId) {
        let mut guard = self.browser.lock().await;
        if let Some(browser) = guard.as_mut() {
            if let Err(e) = browser
                .execute(DisposeBrowserContextParams::new(context_id))
                .await
            {
                warn!("browser pool: context dispose failed: {e}");
            }
        }
    }

    async fn launch(&self) -> Result<Browser> {
        let mut builder = BrowserConfig::builder().args(LAUNCH_ARGS.to_vec());
        if let Some(exe) = &self.config.chrome_executable {
            builder = builder.chrome_executable(exe.clone());
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        info!(
            "browser pool: launching browser (headless: {})",
            self.config.headless
        );
        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("browser launch failed")?;

        // Drives the CDP connection; ends on its own when the browser goes
        // away.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("browser pool: CDP handler error: {e}");
                }
            }
        });

        Ok(browser)
    }

    /// Gracefully close the browser if it is running.
    pub async fn shutdown(&self) {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                warn!("browser pool: close error (non-fatal): {e}");
            }
            info!("browser pool: shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool_with_slots(n: usize) -> Arc<BrowserPool> {
        BrowserPool::new(Arc::new(Config {
            max_concurrent_pages: n,
            ..Config::default()
        }))
    }

    #[tokio::test]
    async fn slots_bound_concurrency() {
        let pool = pool_with_slots(2);
        assert_eq!(pool.available_slots(), 2);

        let a = pool.acquire_slot().await.unwrap();
        let _b = pool.acquire_slot().await.unwrap();
        assert_eq!(pool.available_slots(), 0);

        // Third caller must wait until a slot is released.
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire_slot()).await;
        assert!(blocked.is_err());

        drop(a);
        let c = tokio::time::timeout(Duration::from_millis(50), pool.acquire_slot()).await;
        assert!(c.is_ok());
    }

    #[tokio::test]
    async fn waiters_are_served_in_fifo_order() {
        let pool = pool_with_slots(1);
        let held = pool.acquire_slot().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for id in 0..3 {
            let pool = pool.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let permit = pool.acquire_slot().await.unwrap();
                tx.send(id).unwrap();
                drop(permit);
            });
            // Give each waiter time to enqueue before the next arrives.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        drop(held);
        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv().await.unwrap());
        }
        assert_eq!(order, vec![0, 1, 2]);
    }
}
