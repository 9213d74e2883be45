//! Content-based classification of audio and image files.
//!
//! A file is of format `T` only when its extension matches `T` and its leading
//! bytes agree with `T`'s signature. Formats without a fixed signature but with
//! an ISO base media container are checked by scanning their box structure.

use crate::error::Result;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Bytes read from the start of a file for signature and box checks.
const SNIFF_LEN: u64 = 4096;

const FTYP: &[u8; 4] = b"ftyp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
}

/// Extension plus content rule for one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub extension: &'static str,
    pub kind: MediaKind,
    /// Required leading bytes; empty means no fixed signature.
    pub signature: &'static [u8],
    /// Accepted major brands of the `ftyp` box for container formats.
    pub container_brands: &'static [&'static [u8; 4]],
}

impl FormatDescriptor {
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(self.extension))
    }

    /// Checks already-read leading bytes against the content rule.
    pub fn matches_content(&self, head: &[u8]) -> bool {
        if !self.signature.is_empty() {
            return head.starts_with(self.signature);
        }
        if !self.container_brands.is_empty() {
            return scan_container_brand(head, self.container_brands);
        }
        true
    }
}

const MP4_AUDIO_BRANDS: &[&[u8; 4]] =
    &[b"M4A ", b"M4B ", b"mp42", b"isom", b"mp41", b"iso2", b"dash"];

pub const MP3: FormatDescriptor = FormatDescriptor {
    extension: "mp3",
    kind: MediaKind::Audio,
    signature: b"ID3",
    container_brands: &[],
};

pub const WAV: FormatDescriptor = FormatDescriptor {
    extension: "wav",
    kind: MediaKind::Audio,
    signature: b"RIFF",
    container_brands: &[],
};

pub const FLAC: FormatDescriptor = FormatDescriptor {
    extension: "flac",
    kind: MediaKind::Audio,
    signature: b"fLaC",
    container_brands: &[],
};

pub const OGG: FormatDescriptor = FormatDescriptor {
    extension: "ogg",
    kind: MediaKind::Audio,
    signature: b"OggS",
    container_brands: &[],
};

pub const M4A: FormatDescriptor = FormatDescriptor {
    extension: "m4a",
    kind: MediaKind::Audio,
    signature: &[],
    container_brands: MP4_AUDIO_BRANDS,
};

pub const PNG: FormatDescriptor = FormatDescriptor {
    extension: "png",
    kind: MediaKind::Image,
    signature: &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
    container_brands: &[],
};

pub const JPG: FormatDescriptor = FormatDescriptor {
    extension: "jpg",
    kind: MediaKind::Image,
    signature: &[0xFF, 0xD8, 0xFF],
    container_brands: &[],
};

pub const JPEG: FormatDescriptor = FormatDescriptor {
    extension: "jpeg",
    ..JPG
};

pub const SUPPORTED_FORMATS: &[FormatDescriptor] = &[MP3, WAV, FLAC, OGG, M4A, PNG, JPG, JPEG];

/// Walks top-level boxes looking for an `ftyp` box with an accepted brand.
///
/// Each box starts with a 4-byte big-endian length and a 4-byte tag. The scan
/// stops without a match on a zero or undersized length, or once the cursor
/// would leave the buffer.
pub fn scan_container_brand(buf: &[u8], brands: &[&[u8; 4]]) -> bool {
    let mut cursor = 0usize;
    while cursor + 8 <= buf.len() {
        let len = u32::from_be_bytes([
            buf[cursor],
            buf[cursor + 1],
            buf[cursor + 2],
            buf[cursor + 3],
        ]) as usize;
        let tag = &buf[cursor + 4..cursor + 8];
        if tag == FTYP {
            let Some(brand) = buf.get(cursor + 8..cursor + 12) else {
                return false;
            };
            return brands.iter().any(|b| b.as_slice() == brand);
        }
        if len < 8 {
            debug!("Box scan stopped on length {} at offset {}", len, cursor);
            return false;
        }
        cursor = match cursor.checked_add(len) {
            Some(next) if next <= buf.len() => next,
            _ => return false,
        };
    }
    false
}

fn read_head(path: &Path) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    File::open(path)?.take(SNIFF_LEN).read_to_end(&mut head)?;
    Ok(head)
}

/// True iff `path` has `format`'s extension and content.
pub fn is_format(path: &Path, format: &FormatDescriptor) -> Result<bool> {
    if !format.matches_extension(path) {
        return Ok(false);
    }
    Ok(format.matches_content(&read_head(path)?))
}

/// The supported format `path` belongs to, if any.
pub fn classify(path: &Path) -> Result<Option<&'static FormatDescriptor>> {
    let candidates: Vec<&'static FormatDescriptor> = SUPPORTED_FORMATS
        .iter()
        .filter(|f| f.matches_extension(path))
        .collect();
    if candidates.is_empty() {
        return Ok(None);
    }
    let head = read_head(path)?;
    Ok(candidates.into_iter().find(|f| f.matches_content(&head)))
}

pub fn is_supported_audio(path: &Path) -> Result<bool> {
    Ok(classify(path)?.is_some_and(|f| f.kind == MediaKind::Audio))
}

pub fn is_supported_image(path: &Path) -> Result<bool> {
    Ok(classify(path)?.is_some_and(|f| f.kind == MediaKind::Image))
}
