//! Conditional HTTP fetching
//!
//! The fingerprint round-trips the response's validator header: an ETag
//! when the server sends one, the Last-Modified date otherwise. On the
//! next fetch the validator is replayed as `If-None-Match` /
//! `If-Modified-Since`; a 304 maps to [`FetchError::Unchanged`].
//!
//! Bodies are spooled to an unlinked temporary file and handed back
//! rewound, with gzip and bzip2 feeds decompressed transparently.

use std::io::{Read, Seek, SeekFrom};

use anyhow::{anyhow, Context};
use tracing::debug;
use ureq::http::StatusCode;

use stratum_core::{CancelToken, Fingerprint};

use crate::FetchError;

const ETAG_PREFIX: &str = "etag:";
const MODIFIED_PREFIX: &str = "modified:";

/// Fetch `url`, honoring a previous fingerprint
pub fn fetch_conditional(
    agent: &ureq::Agent,
    cancel: &CancelToken,
    url: &str,
    prev: Option<&Fingerprint>,
) -> Result<(Box<dyn Read + Send>, Fingerprint), FetchError> {
    cancel.checkpoint()?;

    let mut req = agent.get(url);
    if let Some(fp) = prev {
        if let Some(v) = fp.as_str().strip_prefix(ETAG_PREFIX) {
            req = req.header("If-None-Match", v);
        } else if let Some(v) = fp.as_str().strip_prefix(MODIFIED_PREFIX) {
            req = req.header("If-Modified-Since", v);
        }
    }

    let mut resp = match req.call() {
        Ok(resp) => resp,
        Err(ureq::Error::StatusCode(304)) => return Err(FetchError::Unchanged),
        Err(e) => return Err(anyhow!(e).context(format!("failed to fetch {}", url)).into()),
    };
    if resp.status() == StatusCode::NOT_MODIFIED {
        return Err(FetchError::Unchanged);
    }
    if !resp.status().is_success() {
        return Err(anyhow!("unexpected status {} fetching {}", resp.status(), url).into());
    }

    let fingerprint = fingerprint_of(&resp);
    debug!(url, %fingerprint, "feed fetched");

    let mut spool = tempfile::tempfile().context("failed to create fetch spool")?;
    let mut body = resp.body_mut().as_reader();
    std::io::copy(&mut body, &mut spool)
        .with_context(|| format!("failed to spool {}", url))?;
    cancel.checkpoint()?;
    spool
        .seek(SeekFrom::Start(0))
        .context("failed to rewind fetch spool")?;

    let rdr: Box<dyn Read + Send> = if url.ends_with(".gz") || url.ends_with(".tgz") {
        Box::new(flate2::read::GzDecoder::new(spool))
    } else if url.ends_with(".bz2") {
        Box::new(bzip2::read::BzDecoder::new(spool))
    } else {
        Box::new(spool)
    };
    Ok((rdr, fingerprint))
}

fn fingerprint_of(resp: &ureq::http::Response<ureq::Body>) -> Fingerprint {
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    if let Some(etag) = header("etag") {
        Fingerprint::new(format!("{}{}", ETAG_PREFIX, etag))
    } else if let Some(modified) = header("last-modified") {
        Fingerprint::new(format!("{}{}", MODIFIED_PREFIX, modified))
    } else {
        Fingerprint::default()
    }
}
