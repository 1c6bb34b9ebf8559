//! Stealth shims and device profiles.
//!
//! The init script is installed on the context with
//! `Page.addScriptToEvaluateOnNewDocument` so it runs before every document.
//! It hides the usual automation fingerprints: `navigator.webdriver`, driver
//! globals, missing `window.chrome`, the notification-permission shortcut,
//! and the empty plugin/language lists headless profiles ship with.

use rand::seq::IndexedRandom;

/// Desktop viewport applied when the request does not ask for mobile.
pub const DESKTOP_VIEWPORT: (u32, u32) = (1920, 1080);

/// iPhone-12 emulation profile used for `mobile: true`.
pub const MOBILE_VIEWPORT: (u32, u32) = (390, 844);
pub const MOBILE_DEVICE_SCALE_FACTOR: f64 = 3.0;
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";

pub const DEFAULT_LOCALE: &str = "en-US";

/// Realistic desktop User-Agents for the raw HTTP engine.
const HTTP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0",
];

/// Returns a randomly-chosen realistic desktop User-Agent string.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    HTTP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(HTTP_USER_AGENTS[0])
}

/// Anti-fingerprinting script injected before every document on the context.
pub fn stealth_init_script() -> &'static str {
    r#"
// ====== STEALTH SHIMS ======
// Runs before any page script on every document in this context.

// 0. navigator.webdriver: prefer "absent" over false.
(() => {
    try {
        Object.defineProperty(Navigator.prototype, 'webdriver', {
            get: () => undefined,
            configurable: true,
        });
    } catch (e) {}
    try { delete navigator.webdriver; } catch (e) {}
})();

// 1. Automation-driver globals left behind by drivers.
delete window.__playwright;
delete window.__puppeteer;
delete window.__selenium;
delete window.__webdriver_evaluate;
delete window.__driver_evaluate;
delete window.__webdriver_script_fn;
delete window.callPhantom;
delete window._phantom;

// 2. Chrome runtime presence (CDP detection bypass).
if (!window.chrome) {
    window.chrome = { runtime: {} };
} else if (!window.chrome.runtime) {
    window.chrome.runtime = {};
}

// 3. Permissions query: notifications resolve from the Notification global
//    instead of hanging on the headless prompt state.
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : originalQuery(parameters)
    );
}

// 4. Headless profiles ship empty plugin/language lists.
(() => {
    try {
        Object.defineProperty(Navigator.prototype, 'plugins', {
            get: () => [1, 2, 3, 4, 5],
            configurable: true,
        });
        Object.defineProperty(Navigator.prototype, 'languages', {
            get: () => ['en-US', 'en'],
            configurable: true,
        });
        Object.defineProperty(Navigator.prototype, 'platform', {
            get: () => 'Win32',
            configurable: true,
        });
        Object.defineProperty(Navigator.prototype, 'hardwareConcurrency', {
            get: () => 8,
            configurable: true,
        });
        Object.defineProperty(Navigator.prototype, 'deviceMemory', {
            get: () => 8,
            configurable: true,
        });
    } catch (e) {}
})();
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_pool_holds_four_realistic_entries() {
        assert_eq!(HTTP_USER_AGENTS.len(), 4);
        for ua in HTTP_USER_AGENTS {
            assert!(ua.starts_with("Mozilla/5.0"));
        }
        assert!(random_user_agent().contains("Mozilla"));
    }

    #[test]
    fn stealth_script_covers_the_fingerprint_surface() {
        let script = stealth_init_script();
        for needle in [
            "webdriver",
            "window.chrome",
            "permissions.query",
            "plugins",
            "languages",
            "Win32",
            "hardwareConcurrency",
            "deviceMemory",
            "__playwright",
        ] {
            assert!(script.contains(needle), "missing shim: {needle}");
        }
    }
}
