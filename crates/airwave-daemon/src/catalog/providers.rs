//! Provider-specific station shapes and their mapping onto `StationRecord`.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use airwave_proto::protocol::StationRecord;

use super::canonical::{slug, Candidate, Origin};
use crate::fetch::{Fetcher, MirrorPool};

/// One entry of a radio-browser style list response.
#[derive(Debug, Deserialize)]
pub struct RawStation {
    #[serde(default)]
    pub stationuuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub url_resolved: String,
    #[serde(default)]
    pub favicon: String,
    /// Comma separated
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub countrycode: String,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub bitrate: Option<u32>,
}

impl RawStation {
    pub fn into_record(self) -> StationRecord {
        let stream_url = if self.url_resolved.trim().is_empty() {
            self.url
        } else {
            self.url_resolved
        };
        StationRecord {
            id: self.stationuuid,
            name: self.name,
            stream_url,
            icon_url: self.favicon,
            tags: split_tags(&self.tags),
            country_code: self.countrycode,
            codec: self.codec,
            bitrate: self.bitrate.unwrap_or(0),
        }
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Curated list entry.  Field names differ from the generic providers.
#[derive(Debug, Deserialize)]
pub struct CuratedStation {
    #[serde(default)]
    pub slug: String,
    pub title: String,
    pub stream: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub kbps: u32,
}

impl CuratedStation {
    pub fn into_record(self) -> StationRecord {
        let id = if self.slug.trim().is_empty() {
            slug(&self.title)
        } else {
            self.slug
        };
        StationRecord {
            id,
            name: self.title,
            stream_url: self.stream,
            icon_url: self.logo,
            tags: self.genres,
            country_code: self.country,
            codec: self.format,
            bitrate: self.kbps,
        }
    }
}

/// The curated file is either `{"stations": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CuratedFile {
    Wrapped { stations: Vec<CuratedStation> },
    Bare(Vec<CuratedStation>),
}

pub fn parse_curated(content: &str) -> anyhow::Result<Vec<StationRecord>> {
    let file: CuratedFile =
        serde_json::from_str(content).context("curated list is not in a known shape")?;
    let stations = match file {
        CuratedFile::Wrapped { stations } => stations,
        CuratedFile::Bare(stations) => stations,
    };
    Ok(stations.into_iter().map(CuratedStation::into_record).collect())
}

/// Generic list provider: one query path resolved against the mirror pool.
pub async fn fetch_generic(
    fetcher: &Fetcher,
    pool: &MirrorPool,
    query: &str,
    timeout: Duration,
) -> anyhow::Result<Vec<Candidate>> {
    let raw: Vec<RawStation> = pool
        .fetch_first(fetcher, query, timeout, |list: &Vec<RawStation>| {
            !list.is_empty()
        })
        .await?;
    Ok(raw
        .into_iter()
        .map(|r| Candidate::new(r.into_record(), Origin::Generic))
        .collect())
}

/// Curated provider: an https URL or a local file.
pub async fn fetch_curated(
    fetcher: &Fetcher,
    source: &str,
    timeout: Duration,
) -> anyhow::Result<Vec<Candidate>> {
    let content = if source.starts_with("http://") || source.starts_with("https://") {
        fetcher.get_text(source, timeout).await?
    } else {
        let path = Path::new(source);
        if !path.exists() {
            anyhow::bail!("curated list {} not found", path.display());
        }
        tokio::time::timeout(timeout, tokio::fs::read_to_string(path))
            .await
            .map_err(|_| anyhow::anyhow!("reading {} timed out", path.display()))?
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    Ok(parse_curated(&content)?
        .into_iter()
        .map(|r| Candidate::new(r, Origin::Curated))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_prefers_resolved_url() {
        let raw: Vec<RawStation> = serde_json::from_str(
            r#"[{"stationuuid":"u1","name":"Kan Bet","url":"http://a/pls",
                 "url_resolved":"http://a/live.mp3","favicon":"http://a/i.png",
                 "tags":"news, talk,,","countrycode":"IL","codec":"MP3","bitrate":128},
                {"stationuuid":"u2","name":"X","url":"http://b/live","favicon":"",
                 "bitrate":null}]"#,
        )
        .unwrap();
        let records: Vec<StationRecord> = raw.into_iter().map(RawStation::into_record).collect();
        assert_eq!(records[0].stream_url, "http://a/live.mp3");
        assert_eq!(records[0].tags, vec!["news", "talk"]);
        assert_eq!(records[0].bitrate, 128);
        assert_eq!(records[1].stream_url, "http://b/live");
        assert_eq!(records[1].bitrate, 0);
    }

    #[test]
    fn test_curated_shapes() {
        let wrapped = r#"{"stations":[{"slug":"kan-88","title":"כאן 88","stream":"http://k/88",
            "logo":"http://k/88.png","genres":["music"],"country":"IL","format":"AAC","kbps":96}]}"#;
        let bare = r#"[{"title":"Radio Haifa","stream":"http://h/live","logo":"http://h/i.png"}]"#;
        let a = parse_curated(wrapped).unwrap();
        assert_eq!(a[0].id, "kan-88");
        assert_eq!(a[0].codec, "AAC");
        assert_eq!(a[0].bitrate, 96);
        let b = parse_curated(bare).unwrap();
        assert_eq!(b[0].id, "radiohaifa");
        assert_eq!(b[0].bitrate, 0);
        assert!(parse_curated(r#"{"items":[]}"#).is_err());
    }
}
