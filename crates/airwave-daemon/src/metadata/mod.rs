//! Live now-playing aggregation.
//!
//! `MetadataAggregator::poll_once` turns a station into a fresh `TrackInfo`,
//! either through a station-specific [`Handler`] or through the generic
//! path: the mirror status lookup, then the stream's own ICY title.  `MetadataPoller` drives it on an interval for the current
//! station only.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use airwave_proto::config::MetadataConfig;
use airwave_proto::protocol::{StationRecord, TrackInfo};

use crate::catalog::AliasTable;
use crate::fetch::{Fetcher, MirrorPool};
use crate::icy;
use crate::schedule::ScheduleResolver;
pub use handlers::{Handler, HandlerTable};

/// Field names a generic status response may use for the current track.
const STATUS_FIELDS: &[&str] = &["now_playing", "nowplaying", "song", "title", "current"];

pub struct MetadataAggregator {
    fetcher: Fetcher,
    pool: MirrorPool,
    aliases: AliasTable,
    schedule: ScheduleResolver,
    handlers: HandlerTable,
    status_path: String,
    icy_titles: bool,
    timeout: Duration,
}

impl MetadataAggregator {
    pub fn new(
        config: &MetadataConfig,
        fetcher: Fetcher,
        pool: MirrorPool,
        aliases: AliasTable,
        schedule: ScheduleResolver,
    ) -> Self {
        Self {
            fetcher,
            pool,
            aliases,
            schedule,
            handlers: HandlerTable::builtin(),
            status_path: config.status_path.clone(),
            icy_titles: config.icy_titles,
            timeout: config.fetch_timeout(),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    pub async fn poll_once(&self, station: &StationRecord) -> TrackInfo {
        self.poll_at(station, Utc::now()).await
    }

    /// One poll cycle at a fixed instant.  Never fails; unreachable sources
    /// leave their fields absent.
    pub async fn poll_at(&self, station: &StationRecord, now: DateTime<Utc>) -> TrackInfo {
        let key = self.aliases.canonical_key(&station.name);
        let scheduled = || self.schedule.resolve(&key, now).map(String::from);

        let info = match self.handlers.get(&key) {
            Some(handler) => {
                debug!("metadata: {} via handler", key);
                let mut info = handler.fetch(&self.fetcher, self.timeout).await;
                if info.program.as_deref().map_or(true, |p| p.trim().is_empty()) {
                    info.program = scheduled();
                }
                info
            }
            None => {
                let (current, program) =
                    tokio::join!(self.lookup_current(station), async { scheduled() });
                TrackInfo {
                    program,
                    current: current.filter(|c| !echoes_station(c, &station.name)),
                    next: None,
                }
            }
        };
        normalize(info)
    }

    async fn lookup_current(&self, station: &StationRecord) -> Option<String> {
        if let Some(current) = self.lookup_status(station).await {
            return Some(current);
        }
        if !self.icy_titles || station.stream_url.is_empty() {
            return None;
        }
        match icy::stream_title(&self.fetcher, &station.stream_url, self.timeout).await {
            Ok(title) => title,
            Err(e) => {
                debug!("metadata: no ICY title for {}: {:#}", station.id, e);
                None
            }
        }
    }

    async fn lookup_status(&self, station: &StationRecord) -> Option<String> {
        if self.status_path.is_empty() || self.pool.is_empty() || station.id.is_empty() {
            return None;
        }
        let path = self
            .status_path
            .replace("{id}", &urlencoding::encode(&station.id));
        match self
            .pool
            .fetch_first(&self.fetcher, &path, self.timeout, |v: &Value| {
                status_text(v).is_some()
            })
            .await
        {
            Ok(value) => status_text(&value),
            Err(e) => {
                debug!("metadata: status lookup for {} failed: {:#}", station.id, e);
                None
            }
        }
    }
}

/// Current-track text from a status response: an object, or an array whose
/// first element is one.
fn status_text(value: &Value) -> Option<String> {
    let entry = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let map = entry.as_object()?;
    STATUS_FIELDS.iter().find_map(|field| {
        map.get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}

/// Case-insensitive containment either way between a track title and the
/// station name.
pub fn echoes_station(current: &str, station_name: &str) -> bool {
    let current = current.trim().to_lowercase();
    let name = station_name.trim().to_lowercase();
    if current.is_empty() || name.is_empty() {
        return false;
    }
    name.contains(&current) || current.contains(&name)
}

/// Trim every field, drop blanks, then null `current` when it overlaps the
/// program text.
pub fn normalize(info: TrackInfo) -> TrackInfo {
    let clean = |s: Option<String>| {
        s.map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let program = clean(info.program);
    let mut current = clean(info.current);
    let next = clean(info.next);

    if let (Some(p), Some(c)) = (program.as_deref(), current.as_deref()) {
        let (p, c) = (p.to_lowercase(), c.to_lowercase());
        if p.starts_with(&c) || c.starts_with(&p) {
            current = None;
        }
    }
    TrackInfo {
        program,
        current,
        next,
    }
}

/// A finished poll for one station.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackUpdate {
    pub station_id: String,
    pub info: TrackInfo,
}

/// Keeps exactly one poll loop alive, for the station being played.
pub struct MetadataPoller {
    aggregator: Arc<MetadataAggregator>,
    interval: Duration,
    tx: mpsc::Sender<TrackUpdate>,
    active: Option<(String, AbortHandle)>,
}

impl MetadataPoller {
    pub fn new(
        aggregator: Arc<MetadataAggregator>,
        interval: Duration,
        tx: mpsc::Sender<TrackUpdate>,
    ) -> Self {
        Self {
            aggregator,
            interval,
            tx,
            active: None,
        }
    }

    pub fn current_station(&self) -> Option<&str> {
        self.active.as_ref().map(|(id, _)| id.as_str())
    }

    /// Start polling `station` unless it is already being polled.  Any loop
    /// for a different station is aborted first.
    pub fn follow(&mut self, station: &StationRecord) {
        if self.current_station() == Some(station.id.as_str()) {
            return;
        }
        self.cancel();
        info!("metadata: polling {} every {:?}", station.name, self.interval);

        let aggregator = Arc::clone(&self.aggregator);
        let tx = self.tx.clone();
        let period = self.interval;
        let id = station.id.clone();
        let station = station.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let info = aggregator.poll_once(&station).await;
                let update = TrackUpdate {
                    station_id: station.id.clone(),
                    info,
                };
                if tx.send(update).await.is_err() {
                    break;
                }
            }
        });
        self.active = Some((id, task.abort_handle()));
    }

    pub fn cancel(&mut self) {
        if let Some((id, handle)) = self.active.take() {
            debug!("metadata: stop polling {}", id);
            handle.abort();
        }
    }
}

impl Drop for MetadataPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}
