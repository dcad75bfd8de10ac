//! The layer arena: content-addressed realization of layer blobs
//!
//! A layer is "realized" by fetching its blob (or copying it from a local
//! path), verifying the digest, transparently decompressing gzip, and
//! opening the result as a [`TarFs`]. Realized layers are kept on disk
//! keyed by digest, so a layer shared by many images is fetched once.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use sha2::{Digest as _, Sha256, Sha512};
use tracing::{debug, trace};

use stratum_core::{Algorithm, CancelToken, Layer};
use stratum_tarfs::TarFs;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Content-addressed spool of realized layers
pub struct LayerArena {
    root: PathBuf,
    agent: ureq::Agent,
    // single-flight cells per digest
    inflight: Mutex<HashMap<String, Arc<OnceLock<std::result::Result<PathBuf, String>>>>>,
}

impl LayerArena {
    pub fn new(root: impl Into<PathBuf>, agent: ureq::Agent) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create layer arena at {}", root.display()))?;
        Ok(Self {
            root,
            agent,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Realize a layer and open its filesystem view
    pub fn realize(&self, cancel: &CancelToken, layer: &Layer) -> Result<TarFs> {
        let key = layer.hash.to_string();
        let cell = {
            let mut m = self.inflight.lock().expect("arena inflight poisoned");
            m.entry(key.clone()).or_default().clone()
        };
        let path = cell
            .get_or_init(|| {
                self.realize_path(cancel, layer)
                    .map_err(|e| format!("{:#}", e))
            })
            .clone();
        if path.is_err() {
            let mut m = self.inflight.lock().expect("arena inflight poisoned");
            if let Some(cur) = m.get(&key) {
                if Arc::ptr_eq(cur, &cell) {
                    m.remove(&key);
                }
            }
        }
        let path = path.map_err(|e| anyhow::anyhow!(e))?;
        let file = File::open(&path)
            .with_context(|| format!("failed to open realized layer {}", path.display()))?;
        TarFs::new(file).with_context(|| format!("layer {} is not a tar", layer.hash))
    }

    fn realize_path(&self, cancel: &CancelToken, layer: &Layer) -> Result<PathBuf> {
        cancel.checkpoint()?;
        let dest = self.root.join(layer.hash.to_string().replace(':', "-"));
        if dest.exists() {
            trace!(layer = %layer.hash, "arena hit");
            return Ok(dest);
        }
        debug!(layer = %layer.hash, "realizing layer");

        // spool the raw blob, hashing as it streams
        let mut spool = tempfile::NamedTempFile::new_in(&self.root)
            .context("failed to create layer spool file")?;
        let sum = match &layer.local_path {
            Some(p) => {
                let mut src =
                    File::open(p).with_context(|| format!("failed to open {}", p.display()))?;
                hash_copy(layer.hash.algorithm(), &mut src, spool.as_file_mut())?
            }
            None => {
                if layer.uri.is_empty() {
                    bail!("layer {} has no fetch hint", layer.hash);
                }
                let mut req = self.agent.get(&layer.uri);
                for (name, values) in &layer.headers {
                    for v in values {
                        req = req.header(name.as_str(), v.as_str());
                    }
                }
                let mut resp = req
                    .call()
                    .with_context(|| format!("failed to fetch layer {}", layer.uri))?;
                let mut rdr = resp.body_mut().as_reader();
                hash_copy(layer.hash.algorithm(), &mut rdr, spool.as_file_mut())?
            }
        };
        cancel.checkpoint()?;

        if sum != layer.hash.checksum() {
            bail!(
                "layer digest mismatch: want {}, got {}:{}",
                layer.hash,
                layer.hash.algorithm(),
                hex::encode(&sum)
            );
        }

        // sniff the compression
        let file = spool.as_file_mut();
        file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 4];
        let got = file.read(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        if got >= 4 && magic == ZSTD_MAGIC {
            bail!("layer {} is zstd-compressed, which is unsupported", layer.hash);
        }
        if got >= 2 && magic[..2] == GZIP_MAGIC {
            let mut out = tempfile::NamedTempFile::new_in(&self.root)
                .context("failed to create decompression spool")?;
            let mut gz = GzDecoder::new(file);
            std::io::copy(&mut gz, out.as_file_mut())
                .with_context(|| format!("failed to decompress layer {}", layer.hash))?;
            out.persist(&dest)
                .with_context(|| format!("failed to persist layer {}", layer.hash))?;
        } else {
            spool
                .persist(&dest)
                .with_context(|| format!("failed to persist layer {}", layer.hash))?;
        }
        Ok(dest)
    }
}

/// Stream-copy while hashing with the layer's digest algorithm
fn hash_copy(algo: Algorithm, src: &mut dyn Read, dst: &mut File) -> Result<Vec<u8>> {
    enum Hasher {
        S256(Sha256),
        S512(Sha512),
    }
    let mut hasher = match algo {
        Algorithm::Sha256 => Hasher::S256(Sha256::new()),
        Algorithm::Sha512 => Hasher::S512(Sha512::new()),
    };
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        match &mut hasher {
            Hasher::S256(h) => h.update(&buf[..n]),
            Hasher::S512(h) => h.update(&buf[..n]),
        }
        dst.write_all(&buf[..n])?;
    }
    dst.flush()?;
    Ok(match hasher {
        Hasher::S256(h) => h.finalize().to_vec(),
        Hasher::S512(h) => h.finalize().to_vec(),
    })
}

/// Digest a blob the way the arena would verify it
pub fn digest_blob(algo: Algorithm, data: &[u8]) -> stratum_core::Digest {
    let sum = match algo {
        Algorithm::Sha256 => Sha256::digest(data).to_vec(),
        Algorithm::Sha512 => Sha512::digest(data).to_vec(),
    };
    stratum_core::Digest::new(algo, sum).expect("digest length is fixed by the algorithm")
}
