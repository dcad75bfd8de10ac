//! Saved-image tarball loading
//!
//! `docker save` and OCI layout tarballs both carry a `manifest.json`
//! naming the layer blobs by path. Blobs are extracted to a working
//! directory and digested on the way out, so the resulting
//! [`Manifest`] references content-verified local layers.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use tracing::debug;

use stratum_core::{Algorithm, Digest, Layer, Manifest};

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Config")]
    #[allow(dead_code)]
    config: String,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

/// Extract an image tarball into a manifest of local layers
pub fn load_image(image: &Path, workdir: &Path) -> Result<Manifest> {
    std::fs::create_dir_all(workdir)
        .with_context(|| format!("failed to create {}", workdir.display()))?;
    let file = File::open(image)
        .with_context(|| format!("failed to open image {}", image.display()))?;
    let mut archive = tar::Archive::new(file);

    let mut manifest_json: Option<Vec<u8>> = None;
    let mut blobs: HashMap<String, (PathBuf, Digest)> = HashMap::new();

    for entry in archive.entries().context("image is not a tar")? {
        let mut entry = entry.context("image is not a tar")?;
        let name = entry
            .path()
            .context("bad member path")?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();

        if name == "manifest.json" {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            manifest_json = Some(data);
        } else if name.ends_with(".tar") || name.contains("blobs/") {
            let dest = workdir.join(format!("blob-{}", blobs.len()));
            let digest = extract_blob(&mut entry, &dest)
                .with_context(|| format!("failed to extract {}", name))?;
            debug!(member = name.as_str(), digest = %digest, "blob extracted");
            blobs.insert(name, (dest, digest));
        }
    }

    let Some(manifest_json) = manifest_json else {
        bail!("no manifest.json in {}", image.display());
    };
    let entries: Vec<ManifestEntry> =
        serde_json::from_slice(&manifest_json).context("failed to parse manifest.json")?;
    let Some(entry) = entries.first() else {
        bail!("manifest.json names no images");
    };

    let mut layers = Vec::with_capacity(entry.layers.len());
    for member in &entry.layers {
        let key = member.trim_start_matches("./");
        let Some((path, digest)) = blobs.get(key) else {
            bail!("layer {} referenced but not present", member);
        };
        layers.push(Layer::from_local(digest.clone(), path.clone()));
    }

    let sum = Sha256::digest(&manifest_json).to_vec();
    let hash = Digest::new(Algorithm::Sha256, sum).expect("sha256 digest length");
    Ok(Manifest { hash, layers })
}

fn extract_blob(entry: &mut tar::Entry<'_, File>, dest: &Path) -> Result<Digest> {
    let mut out = File::create(dest)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = entry.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
    }
    out.flush()?;
    Digest::new(Algorithm::Sha256, hasher.finalize().to_vec())
        .context("sha256 digest length")
}
