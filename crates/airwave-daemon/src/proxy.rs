/// Local stream proxy.
///
/// Serves `GET /stream/:station_id` on a local port (default 8990).  The
/// media backend and the PCM tap are pointed here instead of at the station
/// origin, so every stream goes through the same access-normalization layer
/// as the rest of the outbound traffic.
///
/// Requests for the same path share one upstream connection: the first
/// opens it and a pump task fans the bytes out to every subscriber, so mpv
/// and the tap cost the origin a single listener.  The upstream closes once
/// its last subscriber goes away.  A recovery appends `?t=<nonce>`, which is
/// a new path and therefore a fresh connection.  ICY metadata is not
/// requested upstream, so a subscriber joining mid-stream only ever sees
/// audio frames.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use airwave_proto::state::StateManager;

use crate::fetch::Fetcher;

/// Chunks buffered per subscriber before it starts losing audio.
const FANOUT_CAPACITY: usize = 256;

/// One live upstream and the response head every subscriber replays.
struct Upstream {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
    tx: broadcast::Sender<Bytes>,
}

#[derive(Clone)]
pub struct ProxyState {
    state_manager: Arc<StateManager>,
    fetcher: Fetcher,
    connect_timeout: Duration,
    upstreams: Arc<Mutex<HashMap<String, Upstream>>>,
}

impl ProxyState {
    pub fn new(state_manager: Arc<StateManager>, fetcher: Fetcher, connect_timeout: Duration) -> Self {
        Self {
            state_manager,
            fetcher,
            connect_timeout,
            upstreams: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of upstream connections currently open.
    pub async fn open_upstreams(&self) -> usize {
        self.upstreams.lock().await.len()
    }

    /// Join the upstream for `key`, opening it first if nobody holds it.
    async fn subscribe(
        &self,
        key: &str,
        url: &str,
    ) -> anyhow::Result<(Arc<Vec<(HeaderName, HeaderValue)>>, broadcast::Receiver<Bytes>)> {
        // held across the connect so a concurrent request waits and joins
        let mut upstreams = self.upstreams.lock().await;
        if let Some(up) = upstreams.get(key) {
            debug!("proxy: joining upstream {}", key);
            return Ok((Arc::clone(&up.headers), up.tx.subscribe()));
        }

        let response = self.fetcher.open_stream(url, self.connect_timeout).await?;
        let headers: Vec<(HeaderName, HeaderValue)> = response
            .headers()
            .iter()
            .filter(|(name, _)| {
                let name = name.as_str();
                (name.starts_with("icy-") && name != "icy-metaint") || name == "content-type"
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let headers = Arc::new(headers);
        let (tx, rx) = broadcast::channel(FANOUT_CAPACITY);
        upstreams.insert(
            key.to_string(),
            Upstream {
                headers: Arc::clone(&headers),
                tx: tx.clone(),
            },
        );
        tokio::spawn(pump(
            key.to_string(),
            response,
            tx,
            Arc::clone(&self.upstreams),
        ));
        Ok((headers, rx))
    }
}

/// Copy upstream chunks to the subscribers until the origin ends or nobody
/// is listening, then forget the entry.
async fn pump(
    key: String,
    response: reqwest::Response,
    tx: broadcast::Sender<Bytes>,
    upstreams: Arc<Mutex<HashMap<String, Upstream>>>,
) {
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                if tx.send(bytes).is_err() {
                    debug!("proxy: last subscriber left {}", key);
                    break;
                }
            }
            Err(e) => {
                warn!("proxy: upstream {} failed: {}", key, e);
                break;
            }
        }
    }
    let mut upstreams = upstreams.lock().await;
    if upstreams
        .get(&key)
        .is_some_and(|up| up.tx.same_channel(&tx))
    {
        upstreams.remove(&key);
    }
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    t: Option<String>,
}

async fn stream_station(
    Path(station_id): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<ProxyState>,
) -> Response {
    let Some(station) = state.state_manager.station(&station_id).await else {
        warn!("proxy: unknown station {}", station_id);
        return StatusCode::NOT_FOUND.into_response();
    };

    let key = match query.t.as_deref() {
        Some(nonce) => format!("{station_id}?t={nonce}"),
        None => station_id.clone(),
    };
    let (headers, rx) = match state.subscribe(&key, &station.stream_url).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!("proxy: {:#}", e);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };
    info!("proxy: streaming {} → {}", station.name, station.stream_url);

    let body = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(bytes) => return Some((Ok::<_, std::io::Error>(bytes), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("proxy: subscriber dropped {} chunks", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let mut builder = Response::builder().status(StatusCode::OK);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            warn!("proxy: bad response head: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/stream/:station_id", get(stream_station))
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: ProxyState) -> tokio::task::JoinHandle<()> {
    let app = router(state);
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        info!("Stream proxy listening on http://{}", addr);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to bind stream proxy on {}: {}", addr, e);
                return;
            }
        };
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Stream proxy error: {}", e);
        }
    })
}

/// Local URL for a station, with an optional cache-busting marker.
pub fn proxy_url(base: &str, station_id: &str, nonce: Option<&str>) -> String {
    let url = format!(
        "{}/stream/{}",
        base.trim_end_matches('/'),
        urlencoding::encode(station_id)
    );
    match nonce {
        Some(n) => format!("{url}?t={}", urlencoding::encode(n)),
        None => url,
    }
}

pub fn proxy_base(bind_address: &str, port: u16) -> String {
    format!("http://{}:{}", bind_address, port)
}
