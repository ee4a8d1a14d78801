/// mpv media backend over JSON IPC.
///
/// ```text
///   MpvBackend::ensure_handle()
///         │
///         ├── writer_task     ← MpvRequest via mpsc, serialised → socket
///         ├── reader_task     ← JSON lines from socket
///         │                       ├── response (request_id) → matching oneshot
///         │                       └── event / property-change → event channel
///         └── signal forwarder ← event channel → MediaSignal → engine
/// ```
///
/// The process is spawned lazily on the first load and respawned if it has
/// died by the next one.  Observed properties map onto engine signals:
/// `core-idle=false` is ready, `pause=true` is paused, `time-pos` is
/// progress, `paused-for-cache=true` is a stall, and an `end-file` with an
/// error or network reason is an error.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use airwave_proto::eq::EqGains;

use crate::engine::backend::{MediaBackend, MediaSignal};
use crate::engine::chain::lavfi_graph;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;
pub const OBS_TIME_POS: u64 = 3;
pub const OBS_PAUSED_FOR_CACHE: u64 = 4;

const OBSERVED: [(u64, &str); 4] = [
    (OBS_CORE_IDLE, "core-idle"),
    (OBS_PAUSE, "pause"),
    (OBS_TIME_POS, "time-pos"),
    (OBS_PAUSED_FOR_CACHE, "paused-for-cache"),
];

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An unsolicited mpv message (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// The engine signal this event stands for, if any.
    pub fn to_signal(&self) -> Option<MediaSignal> {
        if let Some((id, data)) = self.as_property_change() {
            return match (id, data) {
                (OBS_CORE_IDLE, Value::Bool(false)) => Some(MediaSignal::Ready),
                (OBS_PAUSE, Value::Bool(true)) => Some(MediaSignal::Paused),
                (OBS_TIME_POS, v) => v.as_f64().map(MediaSignal::Progress),
                (OBS_PAUSED_FOR_CACHE, Value::Bool(true)) => Some(MediaSignal::Stall),
                _ => None,
            };
        }
        if self.event_name() == Some("end-file") {
            let reason = self.raw.get("reason").and_then(Value::as_str).unwrap_or("");
            if reason == "error" || reason == "network" {
                let detail = self
                    .raw
                    .get("file_error")
                    .and_then(Value::as_str)
                    .unwrap_or(reason);
                return Some(MediaSignal::Error(detail.to_string()));
            }
        }
        None
    }
}

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Register every observed property.  Needed after each fresh connection.
    pub async fn observe_all_properties(&self) {
        for (id, name) in OBSERVED {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }

    pub async fn set_equalizer(&self, gains: EqGains) -> anyhow::Result<()> {
        let filter = format!("@eq:{}", lavfi_graph(gains));
        self.send(json!(["af", "set", filter])).await?;
        Ok(())
    }
}

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: airwave_proto::platform::mpv_socket_name(),
            process: None,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    async fn spawn_process(&mut self, volume: f32) -> anyhow::Result<()> {
        self.kill().await;
        info!("mpv: spawning new process");
        let mpv_binary = airwave_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        let vol_arg = format!(
            "--volume={}",
            (volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--cache=yes")
            .arg(airwave_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        volume: f32,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;
        self.spawn_process(volume).await?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        volume: f32,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process(volume).await?;
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

impl Default for MpvDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));
    MpvHandle { tx: cmd_tx }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

pub struct MpvBackend {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    forwarder: Option<AbortHandle>,
    signal_tx: mpsc::Sender<MediaSignal>,
    volume: f32,
    gains: EqGains,
}

impl MpvBackend {
    pub fn new(signal_tx: mpsc::Sender<MediaSignal>, volume: f32) -> Self {
        Self {
            driver: MpvDriver::new(),
            handle: None,
            forwarder: None,
            signal_tx,
            volume,
            gains: EqGains::default(),
        }
    }

    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("mpv: process died, dropping handle");
            self.drop_handle();
        }
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(64);
        let handle = self.driver.spawn_and_connect(self.volume, event_tx).await?;
        handle.observe_all_properties().await;
        if let Err(e) = handle.set_equalizer(self.gains).await {
            warn!("mpv: failed to install equalizer: {}", e);
        }

        let signal_tx = self.signal_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(evt) = event_rx.recv().await {
                let Some(signal) = evt.to_signal() else {
                    continue;
                };
                if signal_tx.send(signal).await.is_err() {
                    break;
                }
            }
        });
        self.forwarder = Some(forwarder.abort_handle());
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    fn drop_handle(&mut self) {
        self.handle = None;
        if let Some(f) = self.forwarder.take() {
            f.abort();
        }
    }
}

#[async_trait]
impl MediaBackend for MpvBackend {
    async fn load(&mut self, url: &str, volume: f32) -> anyhow::Result<()> {
        self.volume = volume;
        let handle = self.ensure_handle().await?;
        handle.send(json!(["loadfile", url])).await?;
        let _ = handle.send(json!(["set_property", "pause", false])).await;
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        let _ = handle.send(json!(["set_property", "volume", vol_pct])).await;
        Ok(())
    }

    async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()> {
        if let Some(handle) = &self.handle {
            handle.send(json!(["set_property", "pause", paused])).await?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(handle) = &self.handle {
            let _ = handle.send(json!(["stop"])).await;
        }
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> anyhow::Result<()> {
        self.volume = volume;
        if let Some(handle) = &self.handle {
            let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
            handle.send(json!(["set_property", "volume", vol_pct])).await?;
        }
        Ok(())
    }

    async fn set_equalizer(&mut self, gains: EqGains) -> anyhow::Result<()> {
        self.gains = gains;
        if let Some(handle) = &self.handle {
            handle.set_equalizer(gains).await?;
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.handle.is_none() || self.driver.process_alive()
    }

    async fn shutdown(&mut self) {
        info!("mpv: shutting down");
        if let Some(handle) = &self.handle {
            let _ = handle.send(json!(["quit"])).await;
        }
        self.drop_handle();
        self.driver.kill().await;
    }
}
