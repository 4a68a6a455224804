//! Headline client for JSON Feed documents (<https://jsonfeed.org/version/1.1>).
//! rss2json responses share the same `items` shape and parse as well.
//!
//! Feeds are fetched on demand by the sentiment strategy; caching and refresh
//! cadence live with the caller.

use std::time::Duration;

use async_trait::async_trait;
use common::{Error, Headline, NewsSource};
use serde::Deserialize;
use tracing::debug;

/// HTTP client for JSON Feed endpoints.
#[derive(Debug, Clone)]
pub struct JsonFeedClient {
    client: reqwest::Client,
}

// ── JSON Feed response types ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FeedDocument {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
pub struct FeedItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "description")]
    pub summary: Option<String>,
    #[serde(default, alias = "content")]
    pub content_text: Option<String>,
}

impl FeedItem {
    /// Items without a title carry nothing worth scoring.
    fn into_headline(self) -> Option<Headline> {
        let title = self.title?.trim().to_string();
        if title.is_empty() {
            return None;
        }
        let summary = self
            .summary
            .or(self.content_text)
            .unwrap_or_default()
            .trim()
            .to_string();
        Some(Headline { title, summary })
    }
}

impl FeedDocument {
    pub fn headlines(self, limit: usize) -> Vec<Headline> {
        self.items
            .into_iter()
            .filter_map(FeedItem::into_headline)
            .take(limit)
            .collect()
    }
}

impl JsonFeedClient {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("ensemble-bot/0.1 (news sentiment)")
            .pool_max_idle_per_host(2)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("failed to build news HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl NewsSource for JsonFeedClient {
    async fn fetch_headlines(&self, feed_url: &str, limit: usize) -> Result<Vec<Headline>, Error> {
        debug!("Fetching news feed: {}", feed_url);

        let resp = self
            .client
            .get(feed_url)
            .header("Accept", "application/feed+json, application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("news feed {}", feed_url))
                } else {
                    Error::Http(format!("news feed {}: {}", feed_url, e))
                }
            })?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(Error::RateLimited {
                retry_after_ms: 60_000,
            });
        }
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "news feed {} returned {}: {}",
                feed_url,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("news feed {}: {}", feed_url, e)))?;
        let doc: FeedDocument = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Validation(format!("news feed {} is not JSON Feed: {}", feed_url, e)))?;

        let headlines = doc.headlines(limit);
        debug!("Got {} headlines from {}", headlines.len(), feed_url);
        Ok(headlines)
    }
}
