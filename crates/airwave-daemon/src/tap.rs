//! PCM tap: an ffmpeg child decodes the proxied stream to mono s16le which is
//! pushed through the engine's signal chain for spectrum analysis.  Audible
//! output stays with mpv; both read the same proxy path, so the tap joins
//! mpv's upstream connection instead of opening its own.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::engine::chain::SignalChain;

pub const TAP_SAMPLE_RATE: u32 = 44100;
const BLOCK_SAMPLES: usize = 1024;
const RESTART_DELAY: Duration = Duration::from_secs(2);

/// Keep an ffmpeg decoder feeding `chain` until aborted.  A decoder that
/// exits is restarted after a short pause.
pub fn spawn(url: String, chain: Arc<Mutex<SignalChain>>) -> AbortHandle {
    let task = tokio::spawn(async move {
        loop {
            if let Err(e) = run_ffmpeg(&url, &chain).await {
                debug!("tap: ffmpeg exited: {:#}", e);
            }
            tokio::time::sleep(RESTART_DELAY).await;
        }
    });
    task.abort_handle()
}

async fn run_ffmpeg(url: &str, chain: &Arc<Mutex<SignalChain>>) -> anyhow::Result<()> {
    let rate = TAP_SAMPLE_RATE.to_string();
    let ffmpeg_bin =
        airwave_proto::platform::find_ffmpeg_binary().unwrap_or_else(|| PathBuf::from("ffmpeg"));
    let mut child = Command::new(ffmpeg_bin)
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-probesize",
            "64k",
            "-analyzeduration",
            "200000",
            "-i",
            url,
            "-vn",
            "-ac",
            "1",
            "-ar",
            &rate,
            "-f",
            "s16le",
            "pipe:1",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("failed to start ffmpeg")?;

    let mut stdout = child.stdout.take().context("ffmpeg stdout not captured")?;
    let mut buf = vec![0u8; BLOCK_SAMPLES * 2];
    let mut block: Vec<f32> = Vec::with_capacity(BLOCK_SAMPLES);
    let mut carry: Option<u8> = None;

    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        block.clear();
        decode_s16le(&buf[..n], &mut carry, &mut block);
        match chain.lock() {
            Ok(mut chain) => {
                chain.process(&block);
            }
            Err(_) => anyhow::bail!("signal chain lock poisoned"),
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        anyhow::bail!("ffmpeg exited: {}", status);
    }
    Ok(())
}

/// Little-endian 16-bit samples to [-1, 1).  A trailing odd byte is kept in
/// `carry` for the next read.
fn decode_s16le(bytes: &[u8], carry: &mut Option<u8>, out: &mut Vec<f32>) {
    let mut rest = bytes;
    if let Some(lo) = carry.take() {
        match rest.split_first() {
            Some((&hi, tail)) => {
                out.push(i16::from_le_bytes([lo, hi]) as f32 / 32768.0);
                rest = tail;
            }
            None => {
                *carry = Some(lo);
                return;
            }
        }
    }
    let mut pairs = rest.chunks_exact(2);
    for pair in &mut pairs {
        out.push(i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0);
    }
    if let [odd] = pairs.remainder() {
        *carry = Some(*odd);
    }
}
