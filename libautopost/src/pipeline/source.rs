//! Acquire stage

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AutopostError, Result};

/// Where the raw text of a cycle comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Fetch a page; with a CSS selector only the matching elements are kept
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    File {
        path: String,
    },
    Text {
        text: String,
    },
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Url { url, .. } => write!(f, "{}", url),
            SourceSpec::File { path } => write!(f, "file {}", path),
            SourceSpec::Text { .. } => write!(f, "inline text"),
        }
    }
}

/// Fetches raw text for a [`SourceSpec`]
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, spec: &SourceSpec) -> Result<String>;
}

/// HTTP / filesystem / inline source
pub struct SourceFetcher {
    client: Client,
}

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "svg",
];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "tr", "article", "section", "h1", "h2", "h3", "h4", "h5", "h6",
];

impl SourceFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| AutopostError::Acquisition(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn fetch_url(&self, url: &str, selector: Option<&str>) -> Result<String> {
        debug!(url, "Fetching source page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AutopostError::Acquisition(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AutopostError::Acquisition(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            )));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.to_lowercase().contains("html"))
            .unwrap_or(false);

        let body = response
            .text()
            .await
            .map_err(|e| AutopostError::Acquisition(format!("Failed to read body: {}", e)))?;

        if is_html || selector.is_some() {
            extract_text(&body, selector)
        } else {
            Ok(body)
        }
    }
}

#[async_trait]
impl ContentSource for SourceFetcher {
    async fn fetch(&self, spec: &SourceSpec) -> Result<String> {
        match spec {
            SourceSpec::Url { url, selector } => self.fetch_url(url, selector.as_deref()).await,
            SourceSpec::File { path } => {
                let path = crate::config::expand_path(path);
                tokio::fs::read_to_string(&path).await.map_err(|e| {
                    AutopostError::Acquisition(format!("Failed to read {}: {}", path.display(), e))
                })
            }
            SourceSpec::Text { text } => Ok(text.clone()),
        }
    }
}

/// Visible text of an HTML document, or of the elements matching `selector`
pub fn extract_text(html: &str, selector: Option<&str>) -> Result<String> {
    let document = Html::parse_document(html);

    let root_selector = selector.unwrap_or("body");
    let parsed = Selector::parse(root_selector).map_err(|e| {
        AutopostError::Acquisition(format!("Invalid selector '{}': {:?}", root_selector, e))
    })?;

    let blocks: Vec<String> = document
        .select(&parsed)
        .map(|element| {
            let mut raw = String::new();
            collect_text(element, &mut raw);
            normalize(&raw)
        })
        .filter(|text| !text.is_empty())
        .collect();

    Ok(blocks.join("\n\n"))
}

fn collect_text(node: ElementRef<'_>, out: &mut String) {
    for child in node.children() {
        if let Some(element) = ElementRef::wrap(child) {
            let tag = element.value().name();
            if SKIPPED_TAGS.contains(&tag) {
                continue;
            }
            let block = BLOCK_TAGS.contains(&tag);
            if block {
                out.push('\n');
            }
            collect_text(element, out);
            if block {
                out.push('\n');
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

/// Collapse runs of whitespace within lines and drop blank lines
fn normalize(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result of the acquire stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    pub text: String,
    /// Served from the last successful fetch because the live fetch failed
    pub from_cache: bool,
}

/// Acquire stage with last-known-value fallback
pub struct Acquirer {
    source: Arc<dyn ContentSource>,
    cache: Mutex<HashMap<SourceSpec, String>>,
}

impl Acquirer {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch `spec`; empty text counts as a failure
    pub async fn acquire(&self, spec: &SourceSpec) -> Result<Acquired> {
        let outcome = match self.source.fetch(spec).await {
            Ok(text) if text.trim().is_empty() => Err(AutopostError::Acquisition(format!(
                "{} returned no content",
                spec
            ))),
            Ok(text) => Ok(text.trim().to_string()),
            Err(AutopostError::Acquisition(msg)) => Err(AutopostError::Acquisition(msg)),
            Err(other) => Err(AutopostError::Acquisition(other.to_string())),
        };

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(text) => {
                cache.insert(spec.clone(), text.clone());
                Ok(Acquired {
                    text,
                    from_cache: false,
                })
            }
            Err(e) => match cache.get(spec) {
                Some(cached) => {
                    warn!(source = %spec, error = %e, "Acquisition failed, using cached content");
                    Ok(Acquired {
                        text: cached.clone(),
                        from_cache: true,
                    })
                }
                None => Err(e),
            },
        }
    }
}
