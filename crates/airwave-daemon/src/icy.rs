//! In-band SHOUTcast/Icecast titles.
//!
//! A stream opened with `Icy-MetaData: 1` interleaves a length-prefixed
//! metadata block after every `icy-metaint` audio bytes.  The generic
//! now-playing fallback reads a few blocks and keeps the first non-empty
//! `StreamTitle`.

use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;

use crate::fetch::Fetcher;

/// Metadata blocks read before giving up on a silent stream.
const MAX_BLOCKS: usize = 3;
/// Anything larger is a misbehaving server, not an audio interval.
const MAX_METAINT: usize = 256_000;

/// Current `StreamTitle` of `url`, or `None` when the server sends no ICY
/// metadata or only empty titles.  The whole probe is bounded by `timeout`.
pub async fn stream_title(
    fetcher: &Fetcher,
    url: &str,
    timeout: Duration,
) -> anyhow::Result<Option<String>> {
    let deadline = Instant::now() + timeout;
    let mut response = fetcher.open_icy_stream(url, timeout).await?;

    let Some(metaint) = response
        .headers()
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
    else {
        return Ok(None);
    };
    if !(1..=MAX_METAINT).contains(&metaint) {
        anyhow::bail!("{url} sent icy-metaint={metaint}");
    }

    let mut buf: Vec<u8> = Vec::with_capacity(metaint + 1024);
    let mut cursor = 0usize;
    for _ in 0..MAX_BLOCKS {
        fill(&mut response, &mut buf, cursor + metaint + 1, deadline).await?;
        let meta_len = buf[cursor + metaint] as usize * 16;
        let meta_start = cursor + metaint + 1;
        let meta_end = meta_start + meta_len;
        fill(&mut response, &mut buf, meta_end, deadline).await?;

        if let Some(title) = parse_stream_title(&buf[meta_start..meta_end]) {
            return Ok(Some(title));
        }
        cursor = meta_end;
    }
    Ok(None)
}

/// Read chunks until `buf` holds at least `len` bytes.
async fn fill(
    response: &mut reqwest::Response,
    buf: &mut Vec<u8>,
    len: usize,
    deadline: Instant,
) -> anyhow::Result<()> {
    while buf.len() < len {
        let chunk = tokio::time::timeout_at(deadline, response.chunk())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for ICY metadata"))?
            .context("stream read failed")?;
        match chunk {
            Some(bytes) => buf.extend_from_slice(&bytes),
            None => anyhow::bail!("stream ended before an ICY metadata block"),
        }
    }
    Ok(())
}

/// `StreamTitle` from one metadata block, single or double quoted.
pub fn parse_stream_title(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let text = text.trim_matches(char::from(0)).trim();
    ["'", "\""].iter().find_map(|quote| {
        let open = format!("StreamTitle={quote}");
        let rest = &text[text.find(&open)? + open.len()..];
        let title = rest[..rest.find(&format!("{quote};"))?].trim();
        (!title.is_empty()).then(|| title.to_string())
    })
}
