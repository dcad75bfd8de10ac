//! The filesystem view proper

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Mutex;

use tracing::trace;

use crate::entry::{normalize_path, parse_pax, resolve_link, Entry, FileInfo, RawHeader};
use crate::{EntryKind, Error, Result, BLOCK_SIZE, NESTED_ARCHIVE_MAX, ZIP_MIN_SIZE};

/// Hop bound when chasing symlinks and hardlinks
const MAX_LINK_HOPS: usize = 40;

/// Readers the view can wrap
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Read-only random-access view over one tar blob
///
/// Construction scans the archive once and records a segment per member;
/// reads afterwards seek directly. The view is `Sync`: concurrent readers
/// serialize on the underlying reader but share the index.
pub struct TarFs {
    rdr: Mutex<Box<dyn ReadSeek>>,
    entries: Vec<Entry>,
    by_path: BTreeMap<String, usize>,
}

impl std::fmt::Debug for TarFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarFs")
            .field("members", &self.entries.len())
            .finish()
    }
}

impl TarFs {
    /// Scan `rdr` and build the view
    pub fn new<R: Read + Seek + Send + 'static>(mut rdr: R) -> Result<Self> {
        let entries = scan(&mut rdr)?;
        let mut by_path = BTreeMap::new();
        for (i, e) in entries.iter().enumerate() {
            // a path that appears twice is rewritten by the later member
            by_path.insert(e.info.path.clone(), i);
        }
        trace!(members = entries.len(), "tar segment index built");
        Ok(Self {
            rdr: Mutex::new(Box::new(rdr)),
            entries,
            by_path,
        })
    }

    /// Whether a member exists at `path` (without following links)
    pub fn exists(&self, path: &str) -> bool {
        self.by_path.contains_key(&normalize_path(path))
    }

    /// Member metadata, without following links
    pub fn stat(&self, path: &str) -> Result<FileInfo> {
        let norm = normalize_path(path);
        self.by_path
            .get(&norm)
            .map(|&i| self.entries[i].info.clone())
            .ok_or(Error::NotFound(norm))
    }

    /// All indexed members, deduplicated and in path order
    pub fn entries(&self) -> impl Iterator<Item = &FileInfo> + '_ {
        self.by_path.values().map(move |&i| &self.entries[i].info)
    }

    /// Paths matching a glob pattern, in path order
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let pat = glob::Pattern::new(pattern)?;
        Ok(self
            .by_path
            .keys()
            .filter(|p| pat.matches(p))
            .cloned()
            .collect())
    }

    /// Read a whole member, following symlinks and hardlinks
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.resolve(path)?;
        self.read_entry(entry)
    }

    /// Open a member as a reader
    pub fn open(&self, path: &str) -> Result<Cursor<Vec<u8>>> {
        self.read_file(path).map(Cursor::new)
    }

    /// View rooted under `prefix`
    pub fn sub(&self, prefix: &str) -> SubFs<'_> {
        SubFs {
            fs: self,
            prefix: normalize_path(prefix),
        }
    }

    /// Open a nested archive member as a zip
    ///
    /// `Ok(None)` when the member is too small to be a zip or does not
    /// start with the zip local-file-header magic. Members over the
    /// in-memory ceiling are refused.
    pub fn nested_archive(
        &self,
        path: &str,
    ) -> Result<Option<zip::ZipArchive<Cursor<Vec<u8>>>>> {
        let entry = self.resolve(path)?;
        if entry.info.size > NESTED_ARCHIVE_MAX {
            return Err(Error::NestedTooLarge {
                path: entry.info.path.clone(),
                size: entry.info.size,
                limit: NESTED_ARCHIVE_MAX,
            });
        }
        if entry.info.size < ZIP_MIN_SIZE {
            return Ok(None);
        }
        let data = self.read_entry(entry)?;
        if &data[..4] != b"PK\x03\x04" {
            return Ok(None);
        }
        zip::ZipArchive::new(Cursor::new(data))
            .map(Some)
            .map_err(|e| Error::Format(format!("nested zip: {}", e)))
    }

    /// Follow symlinks/hardlinks to a concrete member
    fn resolve(&self, path: &str) -> Result<&Entry> {
        let mut cur = normalize_path(path);
        for _ in 0..MAX_LINK_HOPS {
            let &i = self
                .by_path
                .get(&cur)
                .ok_or_else(|| Error::NotFound(cur.clone()))?;
            let entry = &self.entries[i];
            match entry.info.kind {
                EntryKind::Symlink => {
                    let target = entry.linkname.as_deref().unwrap_or("");
                    cur = resolve_link(&entry.info.path, target);
                }
                EntryKind::Hardlink => {
                    cur = normalize_path(entry.linkname.as_deref().unwrap_or(""));
                }
                _ => return Ok(entry),
            }
        }
        Err(Error::LinkLoop(normalize_path(path)))
    }

    fn read_entry(&self, entry: &Entry) -> Result<Vec<u8>> {
        if entry.info.kind != EntryKind::Regular {
            return Err(Error::NotFound(format!(
                "{} is not a regular file",
                entry.info.path
            )));
        }
        let mut rdr = self.rdr.lock().expect("tarfs reader poisoned");
        rdr.seek(SeekFrom::Start(entry.data_offset))?;
        let mut buf = Vec::with_capacity(entry.info.size as usize);
        rdr.by_ref().take(entry.info.size).read_to_end(&mut buf)?;
        if buf.len() as u64 != entry.info.size {
            return Err(Error::Format(format!(
                "short read in member {}",
                entry.info.path
            )));
        }
        Ok(buf)
    }
}

/// A view rooted below a prefix, with the same read surface
pub struct SubFs<'a> {
    fs: &'a TarFs,
    prefix: String,
}

impl<'a> SubFs<'a> {
    fn join(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            normalize_path(path)
        } else {
            format!("{}/{}", self.prefix, normalize_path(path))
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.fs.exists(&self.join(path))
    }

    pub fn stat(&self, path: &str) -> Result<FileInfo> {
        self.fs.stat(&self.join(path))
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.fs.read_file(&self.join(path))
    }

    pub fn open(&self, path: &str) -> Result<Cursor<Vec<u8>>> {
        self.fs.open(&self.join(path))
    }

    /// Glob relative to the prefix; returned paths are relative too
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let pat = glob::Pattern::new(pattern)?;
        let lead = format!("{}/", self.prefix);
        Ok(self
            .fs
            .by_path
            .keys()
            .filter_map(|p| p.strip_prefix(&lead))
            .filter(|rel| pat.matches(rel))
            .map(str::to_string)
            .collect())
    }
}

enum Block {
    Full,
    Eof,
}

/// Read one 512-byte block; EOF exactly on a boundary is reported, a
/// partial block is a format error
fn read_block<R: Read>(rdr: &mut R, block: &mut [u8; BLOCK_SIZE]) -> Result<Block> {
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        let n = rdr.read(&mut block[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(Block::Eof);
            }
            return Err(Error::Format(format!(
                "short read: {} bytes of a header block",
                filled
            )));
        }
        filled += n;
    }
    Ok(Block::Full)
}

fn data_span(size: i64) -> u64 {
    let blocks = (size as u64).div_ceil(BLOCK_SIZE as u64);
    blocks * BLOCK_SIZE as u64
}

/// Single pass over the archive building the segment index
fn scan<R: Read + Seek>(rdr: &mut R) -> Result<Vec<Entry>> {
    rdr.seek(SeekFrom::Start(0))?;
    let mut entries = Vec::new();
    let mut offset: u64 = 0;
    let mut zero_blocks = 0u8;
    let mut block = [0u8; BLOCK_SIZE];

    // attributes carried from extension headers into the next real member
    let mut pending_path: Option<String> = None;
    let mut pending_link: Option<String> = None;
    let mut pending_size: Option<i64> = None;

    loop {
        match read_block(rdr, &mut block)? {
            // clean EOF on a block boundary ends the archive, terminator
            // blocks or not
            Block::Eof => break,
            Block::Full => {}
        }
        offset += BLOCK_SIZE as u64;

        let header = match RawHeader::parse(&block)? {
            None => {
                zero_blocks += 1;
                if zero_blocks == 2 {
                    break;
                }
                continue;
            }
            Some(h) => {
                zero_blocks = 0;
                h
            }
        };

        let span = data_span(header.size);
        match header.typeflag {
            // PAX extended header: absorb into the following member
            b'x' => {
                let data = read_data(rdr, header.size)?;
                offset += span;
                for (key, val) in parse_pax(&data)? {
                    match key.as_str() {
                        "path" => pending_path = Some(val),
                        "linkpath" => pending_link = Some(val),
                        "size" => {
                            let sz: i64 = val.parse().map_err(|_| {
                                Error::Format(format!("bad pax size: {:?}", val))
                            })?;
                            pending_size = Some(sz);
                        }
                        _ => {}
                    }
                }
            }
            // PAX global header: skipped
            b'g' => {
                rdr.seek(SeekFrom::Start(offset + span))?;
                offset += span;
            }
            // GNU long name / long link
            b'L' => {
                let data = read_data(rdr, header.size)?;
                offset += span;
                pending_path = Some(trim_nul(&data));
            }
            b'K' => {
                let data = read_data(rdr, header.size)?;
                offset += span;
                pending_link = Some(trim_nul(&data));
            }
            // old-GNU sparse member: skip the sparse continuation blocks
            // and the stored data
            b'S' => {
                let mut extended = block[482] != 0;
                while extended {
                    match read_block(rdr, &mut block)? {
                        Block::Eof => {
                            return Err(Error::Format(
                                "EOF inside sparse continuation".to_string(),
                            ))
                        }
                        Block::Full => {}
                    }
                    offset += BLOCK_SIZE as u64;
                    extended = block[504] != 0;
                }
                rdr.seek(SeekFrom::Start(offset + span))?;
                offset += span;
                pending_path = None;
                pending_link = None;
                pending_size = None;
            }
            _ => {
                let kind = header.kind();
                let size = pending_size.take().unwrap_or(header.size);
                let span = data_span(size);
                let linkname = pending_link
                    .take()
                    .or_else(|| (!header.linkname.is_empty()).then(|| header.linkname.clone()));
                let raw_path = pending_path.take().unwrap_or(header.name);

                if let Some(kind) = kind {
                    let path = normalize_path(&raw_path);
                    if !path.is_empty() {
                        let stored = match kind {
                            EntryKind::Regular => size as u64,
                            _ => 0,
                        };
                        entries.push(Entry {
                            info: FileInfo {
                                path,
                                size: stored,
                                kind,
                            },
                            data_offset: offset,
                            linkname,
                        });
                    }
                }
                // unknown typeflags are skipped with their data
                rdr.seek(SeekFrom::Start(offset + span))?;
                offset += span;
            }
        }
    }
    Ok(entries)
}

fn read_data<R: Read>(rdr: &mut R, size: i64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(size as usize);
    rdr.take(size as u64).read_to_end(&mut buf)?;
    if buf.len() as u64 != size as u64 {
        return Err(Error::Format("short read in extension header".to_string()));
    }
    // consume padding up to the block boundary
    let span = data_span(size);
    let pad = span - size as u64;
    if pad > 0 {
        let mut sink = [0u8; BLOCK_SIZE];
        rdr.read_exact(&mut sink[..pad as usize])
            .map_err(|_| Error::Format("short read in extension padding".to_string()))?;
    }
    Ok(buf)
}

fn trim_nul(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}
