//! rpm header blob parsing
//!
//! The rpm database stores one header image per installed package: a
//! big-endian index count and data length, the 16-byte index entries
//! (tag, type, offset, count), then the data region. Only the handful of
//! tags the scanner needs are pulled out.

use anyhow::{bail, Result};

const TAG_NAME: u32 = 1000;
const TAG_VERSION: u32 = 1001;
const TAG_RELEASE: u32 = 1002;
const TAG_EPOCH: u32 = 1003;
const TAG_ARCH: u32 = 1022;
const TAG_SOURCERPM: u32 = 1044;

const TYPE_INT32: u32 = 4;
const TYPE_STRING: u32 = 6;
const TYPE_I18NSTRING: u32 = 9;

/// The fields the package scanner cares about
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpmHeader {
    pub name: String,
    pub version: String,
    pub release: String,
    pub epoch: Option<u32>,
    pub arch: Option<String>,
    pub source_rpm: Option<String>,
}

impl RpmHeader {
    /// Installed version as a full EVR string
    pub fn evr(&self) -> String {
        let vr = if self.release.is_empty() {
            self.version.clone()
        } else {
            format!("{}-{}", self.version, self.release)
        };
        match self.epoch {
            Some(e) if e > 0 => format!("{}:{}", e, vr),
            _ => vr,
        }
    }
}

fn be32(data: &[u8], at: usize) -> Result<u32> {
    match data.get(at..at + 4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => bail!("truncated rpm header at byte {}", at),
    }
}

fn c_string(data: &[u8], at: usize) -> Result<String> {
    let Some(rest) = data.get(at..) else {
        bail!("string offset {} outside rpm header data", at);
    };
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// Parse one header image
///
/// Accepts images with or without the 8-byte header magic prefix, since
/// database layouts differ on whether they keep it.
pub fn parse(blob: &[u8]) -> Result<RpmHeader> {
    let base = if blob.len() >= 8 && blob[0..3] == [0x8e, 0xad, 0xe8] {
        8
    } else {
        0
    };
    let index_len = be32(blob, base)? as usize;
    let data_len = be32(blob, base + 4)? as usize;
    if index_len == 0 || index_len > 65_536 {
        bail!("implausible rpm header index length {}", index_len);
    }
    let entries_at = base + 8;
    let data_at = entries_at + index_len * 16;
    let Some(data) = blob.get(data_at..data_at + data_len) else {
        bail!("rpm header data region out of bounds");
    };

    let mut out = RpmHeader::default();
    for n in 0..index_len {
        let at = entries_at + n * 16;
        let tag = be32(blob, at)?;
        let typ = be32(blob, at + 4)?;
        let offset = be32(blob, at + 8)? as usize;
        match (tag, typ) {
            (TAG_NAME, TYPE_STRING | TYPE_I18NSTRING) => out.name = c_string(data, offset)?,
            (TAG_VERSION, TYPE_STRING) => out.version = c_string(data, offset)?,
            (TAG_RELEASE, TYPE_STRING) => out.release = c_string(data, offset)?,
            (TAG_ARCH, TYPE_STRING) => out.arch = Some(c_string(data, offset)?),
            (TAG_SOURCERPM, TYPE_STRING) => out.source_rpm = Some(c_string(data, offset)?),
            (TAG_EPOCH, TYPE_INT32) => out.epoch = Some(be32(data, offset)?),
            _ => {}
        }
    }
    if out.name.is_empty() || out.version.is_empty() {
        bail!("rpm header missing name or version");
    }
    Ok(out)
}

/// Build a header image the way the database stores it; test support
#[cfg(test)]
pub fn build(header: &RpmHeader) -> Vec<u8> {
    let mut entries: Vec<(u32, u32, Vec<u8>)> = Vec::new();
    let mut string = |tag: u32, s: &str| {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        (tag, TYPE_STRING, v)
    };
    entries.push(string(TAG_NAME, &header.name));
    entries.push(string(TAG_VERSION, &header.version));
    entries.push(string(TAG_RELEASE, &header.release));
    if let Some(arch) = &header.arch {
        entries.push(string(TAG_ARCH, arch));
    }
    if let Some(src) = &header.source_rpm {
        entries.push(string(TAG_SOURCERPM, src));
    }
    if let Some(e) = header.epoch {
        entries.push((TAG_EPOCH, TYPE_INT32, e.to_be_bytes().to_vec()));
    }

    let mut index = Vec::new();
    let mut data = Vec::new();
    for (tag, typ, bytes) in &entries {
        if *typ == TYPE_INT32 {
            // int32 data is 4-byte aligned
            while data.len() % 4 != 0 {
                data.push(0);
            }
        }
        index.extend_from_slice(&tag.to_be_bytes());
        index.extend_from_slice(&typ.to_be_bytes());
        index.extend_from_slice(&(data.len() as u32).to_be_bytes());
        index.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(bytes);
    }

    let mut blob = Vec::new();
    blob.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    blob.extend_from_slice(&(data.len() as u32).to_be_bytes());
    blob.extend_from_slice(&index);
    blob.extend_from_slice(&data);
    blob
}
