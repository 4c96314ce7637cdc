use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::{RandomizerError, Result};

const GAME_CODE_LEN: usize = 12;
const NAME_LEN: usize = 32;
// 32-byte NUL-padded name + u32 offset + u32 compressed size + u32 raw size.
const TOC_ENTRY_SIZE: usize = NAME_LEN + 12;
const HEADER_SIZE: usize = GAME_CODE_LEN + 4;

fn malformed(detail: impl Into<String>) -> RandomizerError {
    RandomizerError::ResourceLoad {
        resource: "rom container".to_string(),
        detail: detail.into(),
    }
}

struct TocEntry {
    name: String,
    offset: u32,
    cmp_size: u32,
    raw_size: u32,
}

/// The ROM-format container the pipeline reads from and writes to. The
/// payload of every entry is gzip-compressed; the TOC tracks both the
/// compressed and decompressed sizes so truncation is detectable.
pub struct RomContainer {
    source: Option<PathBuf>,
    raw: Vec<u8>,
    game_code: [u8; GAME_CODE_LEN],
    entries: Vec<TocEntry>,
}

impl RomContainer {
    pub fn open(path: &Path) -> Result<Self> {
        let raw = fs::read(path)?;
        let mut container = Self::from_bytes(raw)?;
        container.source = Some(path.to_path_buf());
        Ok(container)
    }

    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(malformed("file too small to contain a valid header"));
        }

        let mut game_code = [0u8; GAME_CODE_LEN];
        game_code.copy_from_slice(&raw[..GAME_CODE_LEN]);

        let entry_count = u32::from_le_bytes([
            raw[GAME_CODE_LEN],
            raw[GAME_CODE_LEN + 1],
            raw[GAME_CODE_LEN + 2],
            raw[GAME_CODE_LEN + 3],
        ]) as usize;

        let toc_len = entry_count.checked_mul(TOC_ENTRY_SIZE).ok_or_else(|| {
            malformed("entry count is unreasonably large")
        })?;
        if HEADER_SIZE + toc_len > raw.len() {
            return Err(malformed("TOC extends beyond end of file"));
        }

        let mut entries = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let base = HEADER_SIZE + i * TOC_ENTRY_SIZE;
            let name_bytes = &raw[base..base + NAME_LEN];
            let nul_pos = name_bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(name_bytes.len());
            let name = String::from_utf8_lossy(&name_bytes[..nul_pos]).to_string();

            let read_u32 = |off: usize| {
                u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]])
            };
            let offset = read_u32(base + NAME_LEN);
            let cmp_size = read_u32(base + NAME_LEN + 4);
            let raw_size = read_u32(base + NAME_LEN + 8);

            let end = (offset as usize)
                .checked_add(cmp_size as usize)
                .ok_or_else(|| malformed("entry size calculation overflowed"))?;
            if end > raw.len() {
                return Err(malformed(format!(
                    "entry '{}' data extends beyond end of file",
                    name
                )));
            }

            entries.push(TocEntry {
                name,
                offset,
                cmp_size,
                raw_size,
            });
        }

        Ok(RomContainer {
            source: None,
            raw,
            game_code,
            entries,
        })
    }

    /// Builds a container image from scratch. Used when synthesizing inputs,
    /// e.g. in tests; real runs go through `open`.
    pub fn from_entries(game_code: [u8; GAME_CODE_LEN], entries: &[(&str, &[u8])]) -> Result<Self> {
        let mut compressed = Vec::with_capacity(entries.len());
        for (name, payload) in entries {
            compressed.push((
                name.to_string(),
                compress_payload(payload)?,
                payload.len() as u32,
            ));
        }
        let image = assemble_image(&game_code, &compressed)?;
        Self::from_bytes(image)
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn game_code(&self) -> &[u8; GAME_CODE_LEN] {
        &self.game_code
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Reads and decompresses one named entry.
    pub fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| RandomizerError::ResourceLoad {
                resource: name.to_string(),
                detail: "no such entry in the container".to_string(),
            })?;

        let start = entry.offset as usize;
        let end = start + entry.cmp_size as usize;
        let mut decoder = GzDecoder::new(&self.raw[start..end]);
        let mut out = Vec::with_capacity(entry.raw_size as usize);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| RandomizerError::ResourceLoad {
                resource: name.to_string(),
                detail: format!("failed to decompress entry: {e}"),
            })?;

        if out.len() != entry.raw_size as usize {
            return Err(RandomizerError::ResourceLoad {
                resource: name.to_string(),
                detail: format!(
                    "decompressed to {} bytes but TOC declares {}",
                    out.len(),
                    entry.raw_size
                ),
            });
        }

        Ok(out)
    }

    /// Rebuilds the whole container image with the given entries replaced.
    /// Untouched entries keep their original compressed bytes, so a build
    /// with no replacements reproduces the input exactly.
    pub fn build(&self, replacements: &HashMap<String, Vec<u8>>) -> Result<Vec<u8>> {
        let mut compressed = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if let Some(payload) = replacements.get(&entry.name) {
                compressed.push((
                    entry.name.clone(),
                    compress_payload(payload)?,
                    payload.len() as u32,
                ));
            } else {
                let start = entry.offset as usize;
                let end = start + entry.cmp_size as usize;
                compressed.push((
                    entry.name.clone(),
                    self.raw[start..end].to_vec(),
                    entry.raw_size,
                ));
            }
        }
        assemble_image(&self.game_code, &compressed)
    }
}

fn compress_payload(payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

fn assemble_image(
    game_code: &[u8; GAME_CODE_LEN],
    entries: &[(String, Vec<u8>, u32)],
) -> Result<Vec<u8>> {
    let entry_count = u32::try_from(entries.len())
        .map_err(|_| malformed("too many entries for a u32 count"))?;

    let toc_len = entries.len() * TOC_ENTRY_SIZE;
    let data_start = HEADER_SIZE + toc_len;

    let mut out = Vec::with_capacity(data_start);
    out.extend_from_slice(game_code);
    out.extend_from_slice(&entry_count.to_le_bytes());

    let mut cursor = data_start;
    for (name, cmp_data, raw_size) in entries {
        if name.len() > NAME_LEN {
            return Err(malformed(format!(
                "entry name '{}' exceeds {} bytes",
                name, NAME_LEN
            )));
        }
        let mut name_bytes = [0u8; NAME_LEN];
        name_bytes[..name.len()].copy_from_slice(name.as_bytes());
        out.extend_from_slice(&name_bytes);

        let offset = u32::try_from(cursor)
            .map_err(|_| malformed("container data exceeds u32 addressing"))?;
        let cmp_size = u32::try_from(cmp_data.len())
            .map_err(|_| malformed("compressed entry exceeds u32 size"))?;
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&cmp_size.to_le_bytes());
        out.extend_from_slice(&raw_size.to_le_bytes());
        cursor += cmp_data.len();
    }

    for (_, cmp_data, _) in entries {
        out.extend_from_slice(cmp_data);
    }

    Ok(out)
}
