//! Outbound HTTP shared by the catalog, the metadata sources and the stream
//! proxy.
//!
//! Every request goes through [`Fetcher::normalize`], which applies the
//! configured pass-through prefix, and every non-streaming request carries an
//! explicit timeout.  A timed-out request is an ordinary error, never a
//! pending future.

use std::time::Duration;

use anyhow::Context;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use airwave_proto::config::NetworkConfig;

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    prefix: Option<String>,
}

impl Fetcher {
    pub fn new(network: &NetworkConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(network.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            prefix: network
                .fetch_prefix
                .clone()
                .filter(|p| !p.trim().is_empty()),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Route `url` through the pass-through prefix.  Non-HTTP targets and
    /// direct mode return the url unchanged.
    pub fn normalize(&self, url: &str) -> String {
        let Some(prefix) = self.prefix.as_deref() else {
            return url.to_string();
        };
        if !is_remote(url) {
            return url.to_string();
        }
        let encoded = urlencoding::encode(url);
        if prefix.contains("{url}") {
            prefix.replace("{url}", &encoded)
        } else {
            format!("{prefix}{encoded}")
        }
    }

    pub async fn get_text(&self, url: &str, timeout: Duration) -> anyhow::Result<String> {
        let target = self.normalize(url);
        let fut = async {
            let response = self
                .client
                .get(&target)
                .send()
                .await
                .with_context(|| format!("request to {url} failed"))?;
            if !response.status().is_success() {
                anyhow::bail!("{url} returned HTTP {}", response.status());
            }
            response
                .text()
                .await
                .with_context(|| format!("failed to read body of {url}"))
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| anyhow::anyhow!("{url} timed out after {}ms", timeout.as_millis()))?
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> anyhow::Result<T> {
        let body = self.get_text(url, timeout).await?;
        serde_json::from_str(&body).with_context(|| format!("unexpected JSON from {url}"))
    }

    /// Open a plain audio stream.  Only connecting and the response head are
    /// bounded by `connect_timeout`; the body may run indefinitely.
    pub async fn open_stream(
        &self,
        url: &str,
        connect_timeout: Duration,
    ) -> anyhow::Result<reqwest::Response> {
        self.open(url, connect_timeout, false).await
    }

    /// Like [`Fetcher::open_stream`], but asks the server to interleave ICY
    /// metadata blocks.
    pub async fn open_icy_stream(
        &self,
        url: &str,
        connect_timeout: Duration,
    ) -> anyhow::Result<reqwest::Response> {
        self.open(url, connect_timeout, true).await
    }

    async fn open(
        &self,
        url: &str,
        connect_timeout: Duration,
        icy: bool,
    ) -> anyhow::Result<reqwest::Response> {
        let target = self.normalize(url);
        let mut request = self.client.get(&target);
        if icy {
            request = request.header("Icy-MetaData", "1");
        }
        let response = tokio::time::timeout(connect_timeout, request.send())
            .await
            .map_err(|_| anyhow::anyhow!("stream {url} did not answer in time"))?
            .with_context(|| format!("stream {url} connect failed"))?;
        if !response.status().is_success() {
            anyhow::bail!("stream {url} returned HTTP {}", response.status());
        }
        Ok(response)
    }
}

fn is_remote(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Interchangeable API mirrors.  Each lookup walks a fresh random ordering
/// and stops at the first mirror whose answer is useful.
#[derive(Debug, Clone)]
pub struct MirrorPool {
    mirrors: Vec<String>,
}

impl MirrorPool {
    pub fn new(mirrors: Vec<String>) -> Self {
        Self { mirrors }
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    pub fn shuffled(&self) -> Vec<String> {
        let mut order = self.mirrors.clone();
        order.shuffle(&mut rand::thread_rng());
        order
    }

    /// Fetch `path` from each mirror in random order until `accept` is
    /// satisfied.  Errors from individual mirrors are logged and skipped.
    pub async fn fetch_first<T, F>(
        &self,
        fetcher: &Fetcher,
        path: &str,
        timeout: Duration,
        accept: F,
    ) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let mut last_err = None;
        for mirror in self.shuffled() {
            let url = join_url(&mirror, path);
            match fetcher.get_json::<T>(&url, timeout).await {
                Ok(value) if accept(&value) => {
                    debug!("mirror {} answered {}", mirror, path);
                    return Ok(value);
                }
                Ok(_) => {
                    debug!("mirror {} had nothing for {}", mirror, path);
                }
                Err(e) => {
                    warn!("mirror {} failed: {:#}", mirror, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no mirror had a result for {path}")))
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(prefix: Option<&str>) -> Fetcher {
        Fetcher::new(&NetworkConfig {
            fetch_prefix: prefix.map(String::from),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_direct_mode_passes_through() {
        let f = fetcher(None);
        assert_eq!(f.normalize("https://a.test/x?y=1"), "https://a.test/x?y=1");
    }

    #[test]
    fn test_prefix_with_placeholder() {
        let f = fetcher(Some("https://relay.test/fetch?u={url}&raw=1"));
        assert_eq!(
            f.normalize("https://a.test/x?y=1"),
            "https://relay.test/fetch?u=https%3A%2F%2Fa.test%2Fx%3Fy%3D1&raw=1"
        );
    }

    #[test]
    fn test_prefix_without_placeholder_appends() {
        let f = fetcher(Some("https://relay.test/?"));
        assert_eq!(
            f.normalize("http://a.test/"),
            "https://relay.test/?http%3A%2F%2Fa.test%2F"
        );
    }

    #[test]
    fn test_blank_prefix_and_local_paths_untouched() {
        assert_eq!(fetcher(Some("  ")).normalize("http://a.test/"), "http://a.test/");
        let f = fetcher(Some("https://relay.test/?"));
        assert_eq!(f.normalize("/tmp/curated.json"), "/tmp/curated.json");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://m.test/", "/json/x"), "https://m.test/json/x");
        assert_eq!(join_url("https://m.test", "json/x"), "https://m.test/json/x");
    }

    #[test]
    fn test_shuffle_keeps_every_mirror() {
        let pool = MirrorPool::new(vec!["a".into(), "b".into(), "c".into()]);
        let mut order = pool.shuffled();
        order.sort();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
