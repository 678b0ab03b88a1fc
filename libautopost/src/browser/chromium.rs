//! Chrome DevTools Protocol driver
//!
//! One `Browser` process per context, so contexts never share cookies.
//! The persisted session is the page's cookie jar as JSON.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{BrowserContext, BrowserDriver, BrowserResult, ContextOptions, Locator};
use crate::error::PublishError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches a local Chrome/Chromium per context
#[derive(Debug, Clone, Default)]
pub struct ChromiumDriver;

impl ChromiumDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Cookie as persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    path: String,
    secure: bool,
    http_only: bool,
    /// Absent for session cookies
    expires: Option<f64>,
}

impl From<StoredCookie> for CookieParam {
    fn from(cookie: StoredCookie) -> Self {
        let mut param = CookieParam::new(cookie.name, cookie.value);
        param.domain = Some(cookie.domain);
        param.path = Some(cookie.path);
        param.secure = Some(cookie.secure);
        param.http_only = Some(cookie.http_only);
        param.expires = cookie.expires.map(TimeSinceEpoch::new);
        param
    }
}

fn browser_err(context: &str) -> impl Fn(chromiumoxide::error::CdpError) -> PublishError + '_ {
    move |e| PublishError::Browser(format!("{}: {}", context, e))
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn launch(&self, options: &ContextOptions) -> BrowserResult<Box<dyn BrowserContext>> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.viewport.width, options.viewport.height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={}", options.user_agent));

        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &options.executable {
            builder = builder.chrome_executable(exe);
        }
        if let Some(proxy) = &options.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy.server()));
            if proxy.credentials.is_some() {
                warn!(
                    proxy = %proxy,
                    "Chromium cannot take proxy credentials on the command line; \
                     the proxy must accept this host without authentication"
                );
            }
        }

        let config = builder
            .build()
            .map_err(|e| PublishError::Browser(format!("Invalid browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(browser_err("Failed to launch browser"))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(browser_err("Failed to open page"))?;

        if let Some(blob) = &options.session {
            match serde_json::from_str::<Vec<StoredCookie>>(blob) {
                Ok(cookies) => {
                    let params: Vec<CookieParam> = cookies.into_iter().map(Into::into).collect();
                    page.set_cookies(params)
                        .await
                        .map_err(browser_err("Failed to restore session"))?;
                }
                Err(e) => warn!("Ignoring unreadable session blob: {}", e),
            }
        }

        Ok(Box::new(ChromiumContext {
            browser,
            page,
            handler,
        }))
    }
}

struct ChromiumContext {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

/// JS returning the first button whose visible text contains `text`
fn button_lookup(text: &str) -> String {
    let needle = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "[...document.querySelectorAll('button')].find(b => b.innerText.includes({}))",
        needle
    )
}

impl ChromiumContext {
    async fn eval_bool(&self, script: String) -> BrowserResult<bool> {
        self.page
            .evaluate(script)
            .await
            .map_err(browser_err("Script failed"))?
            .into_value::<bool>()
            .map_err(|e| PublishError::Browser(format!("Unexpected script result: {}", e)))
    }

    async fn present(&self, locator: &Locator) -> BrowserResult<bool> {
        match locator {
            Locator::Css(selector) => Ok(self.page.find_element(selector.as_str()).await.is_ok()),
            Locator::ButtonWithText(text) => {
                self.eval_bool(format!("!!({})", button_lookup(text))).await
            }
        }
    }

    async fn key_event(&self, kind: DispatchKeyEventType, key: &str) -> BrowserResult<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(key.to_string())
            .code(key.to_string());
        if key == "Enter" {
            builder = builder.windows_virtual_key_code(13);
            if kind == DispatchKeyEventType::KeyDown {
                builder = builder.text("\r".to_string());
            }
        }
        let params = builder
            .build()
            .map_err(|e| PublishError::Browser(format!("Bad key event: {}", e)))?;
        self.page
            .execute(params)
            .await
            .map_err(browser_err("Key event failed"))?;
        Ok(())
    }
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        debug!(url, "Navigating");
        self.page
            .goto(url)
            .await
            .map_err(|e| PublishError::Navigation(format!("{}: {}", url, e)))?;
        Ok(())
    }

    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> BrowserResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.present(locator).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&mut self, locator: &Locator) -> BrowserResult<()> {
        match locator {
            Locator::Css(selector) => {
                let element = self
                    .page
                    .find_element(selector.as_str())
                    .await
                    .map_err(browser_err("Element not found"))?;
                element.click().await.map_err(browser_err("Click failed"))?;
                Ok(())
            }
            Locator::ButtonWithText(text) => {
                let script = format!(
                    "(() => {{ const b = {}; if (!b) return false; b.click(); return true; }})()",
                    button_lookup(text)
                );
                if self.eval_bool(script).await? {
                    Ok(())
                } else {
                    Err(PublishError::Browser(format!("no element matches {}", locator)))
                }
            }
        }
    }

    async fn type_text(&mut self, text: &str) -> BrowserResult<()> {
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(browser_err("Typing failed"))?;
        Ok(())
    }

    async fn press_key(&mut self, key: &str) -> BrowserResult<()> {
        self.key_event(DispatchKeyEventType::KeyDown, key).await?;
        self.key_event(DispatchKeyEventType::KeyUp, key).await
    }

    async fn is_actionable(&mut self, locator: &Locator) -> BrowserResult<bool> {
        let lookup = match locator {
            Locator::Css(selector) => format!(
                "document.querySelector({})",
                serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string())
            ),
            Locator::ButtonWithText(text) => button_lookup(text),
        };
        let script = format!(
            "(() => {{ const el = {}; if (!el) return false; \
             const r = el.getBoundingClientRect(); \
             return r.width > 0 && r.height > 0 && !el.disabled; }})()",
            lookup
        );
        self.eval_bool(script).await
    }

    async fn attach_files(&mut self, locator: &Locator, files: &[PathBuf]) -> BrowserResult<()> {
        let Locator::Css(selector) = locator else {
            return Err(PublishError::Attachment(format!(
                "file input must be a CSS locator, got {}",
                locator
            )));
        };
        let element = self
            .page
            .find_element(selector.as_str())
            .await
            .map_err(|e| PublishError::Attachment(format!("{}: {}", selector, e)))?;
        let params = SetFileInputFilesParams::builder()
            .files(files.iter().map(|f| f.to_string_lossy().to_string()))
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(PublishError::Attachment)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| PublishError::Attachment(e.to_string()))?;
        Ok(())
    }

    async fn session_state(&mut self) -> BrowserResult<String> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(browser_err("Failed to read cookies"))?;
        let stored: Vec<StoredCookie> = cookies
            .into_iter()
            .map(|c| StoredCookie {
                expires: (!c.session).then_some(c.expires),
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect();
        serde_json::to_string(&stored)
            .map_err(|e| PublishError::Browser(format!("Failed to encode session: {}", e)))
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        let ChromiumContext {
            mut browser,
            page,
            handler,
        } = *self;
        if let Err(e) = page.close().await {
            debug!("Page close failed: {}", e);
        }
        let result = browser.close().await;
        let _ = browser.wait().await;
        handler.abort();
        result
            .map(|_| ())
            .map_err(browser_err("Failed to close browser"))
    }
}
