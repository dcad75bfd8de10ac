//! Tar header parsing

use crate::{Error, Result, BLOCK_SIZE};

/// Member kinds recorded in the segment index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    Block,
    Char,
    Fifo,
}

/// Metadata for one indexed member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Normalized path: no leading `/` or `./`, no trailing `/`
    pub path: String,
    pub size: u64,
    pub kind: EntryKind,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Final path component
    pub fn base_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// One member in the segment index
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) info: FileInfo,
    /// Byte offset of the first data block
    pub(crate) data_offset: u64,
    /// Symlink or hardlink target, verbatim from the header or extension
    pub(crate) linkname: Option<String>,
}

/// Decoded raw header block, before extension attributes are applied
#[derive(Debug)]
pub(crate) struct RawHeader {
    pub(crate) name: String,
    pub(crate) size: i64,
    pub(crate) typeflag: u8,
    pub(crate) linkname: String,
}

impl RawHeader {
    /// Parse one 512-byte header block
    ///
    /// `Ok(None)` means an all-zero block (archive terminator candidate).
    pub(crate) fn parse(block: &[u8]) -> Result<Option<RawHeader>> {
        debug_assert_eq!(block.len(), BLOCK_SIZE);
        if block.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        // magic+version at 257..265: POSIX is "ustar\0" "00", GNU wrote
        // "ustar " with a space or NUL following
        let magic = &block[257..265];
        let posix = &magic[..6] == b"ustar\0" && &magic[6..8] == b"00";
        let gnu = &magic[..5] == b"ustar" && (magic[5] == b' ' || magic[5] == 0);
        if !posix && !gnu {
            return Err(Error::Format(format!(
                "bad magic in header block: {:?}",
                &magic[..6]
            )));
        }

        let size = parse_numeric(&block[124..136])?;
        if size < 0 {
            return Err(Error::Format(format!("negative size field: {}", size)));
        }

        let mut name = field_str(&block[0..100]);
        // POSIX split-path: prefix/name
        if posix {
            let prefix = field_str(&block[345..500]);
            if !prefix.is_empty() {
                name = format!("{}/{}", prefix, name);
            }
        }

        Ok(Some(RawHeader {
            name,
            size,
            typeflag: block[156],
            linkname: field_str(&block[157..257]),
        }))
    }

    pub(crate) fn kind(&self) -> Option<EntryKind> {
        match self.typeflag {
            b'0' | 0 | b'7' => Some(EntryKind::Regular),
            b'5' => Some(EntryKind::Directory),
            b'2' => Some(EntryKind::Symlink),
            b'1' => Some(EntryKind::Hardlink),
            b'3' => Some(EntryKind::Char),
            b'4' => Some(EntryKind::Block),
            b'6' => Some(EntryKind::Fifo),
            _ => None,
        }
    }
}

/// NUL-terminated text field
fn field_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Parse a tar numeric field: octal string or base-256 binary
///
/// Values that do not fit a signed 63-bit integer are format errors.
pub(crate) fn parse_numeric(field: &[u8]) -> Result<i64> {
    if field.is_empty() {
        return Ok(0);
    }
    if field[0] & 0x80 != 0 {
        // base-256: high bit marks the encoding, remaining bits are a
        // big-endian integer
        let mut val: i128 = (field[0] & 0x7f) as i128;
        for &b in &field[1..] {
            val = (val << 8) | b as i128;
            if val > i64::MAX as i128 {
                return Err(Error::Format(
                    "base-256 size field overflows 63 bits".to_string(),
                ));
            }
        }
        Ok(val as i64)
    } else {
        let s = field_str(field);
        let s = s.trim_matches(|c: char| c == ' ' || c == '\0');
        if s.is_empty() {
            return Ok(0);
        }
        i64::from_str_radix(s, 8)
            .map_err(|_| Error::Format(format!("bad octal field: {:?}", s)))
    }
}

/// Parse PAX extended-header records: `"%d %s=%s\n"` with the length
/// counting the whole record
pub(crate) fn parse_pax(data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let sp = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| Error::Format("pax record missing length".to_string()))?;
        let len: usize = std::str::from_utf8(&rest[..sp])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Format("bad pax record length".to_string()))?;
        if len <= sp + 1 || len > rest.len() {
            return Err(Error::Format("pax record length out of range".to_string()));
        }
        let body = &rest[sp + 1..len];
        let body = body.strip_suffix(b"\n").unwrap_or(body);
        let text = String::from_utf8_lossy(body);
        if let Some((k, v)) = text.split_once('=') {
            out.push((k.to_string(), v.to_string()));
        }
        rest = &rest[len..];
    }
    Ok(out)
}

/// Normalize a member path: strip leading `/` and `./`, drop `.` segments,
/// resolve `..` lexically, drop the trailing `/` directories carry
pub(crate) fn normalize_path(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in raw.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Resolve a link target relative to the directory of `from`
pub(crate) fn resolve_link(from: &str, target: &str) -> String {
    if let Some(stripped) = target.strip_prefix('/') {
        return normalize_path(stripped);
    }
    let dir = match from.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    };
    if dir.is_empty() {
        normalize_path(target)
    } else {
        normalize_path(&format!("{}/{}", dir, target))
    }
}
