//! Ready-made consumers for a fanout reader.
//!
//! Each takes any [`Read`], so they work on a [`ReaderHandle`](crate::ReaderHandle)
//! as well as on plain files in tests.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

/// Bytes the content sniffer looks at
pub const SNIFF_LEN: usize = 16;

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Copies everything from `reader` into a new file at `path`, creating parent
/// directories as needed. Returns the number of bytes written.
pub fn copy_to_file<R: Read>(mut reader: R, path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::with_capacity(COPY_CHUNK_SIZE, file);
    let written = io::copy(&mut reader, &mut writer)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(written)
}

/// BLAKE3 digest of everything in `reader`, hex encoded.
pub fn digest<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read data for digest"),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Counts the bytes in `reader`.
pub fn count<R: Read>(mut reader: R) -> Result<u64> {
    io::copy(&mut reader, &mut io::sink()).context("Failed to read data")
}

// =============================================================================
// Content sniffing
// =============================================================================

/// File type guessed from the first bytes of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Png,
    Jpeg,
    Gif,
    Webp,
    Pdf,
    Zip,
    Gzip,
    Mp4,
    Unknown,
}

impl ContentKind {
    pub fn from_header(header: &[u8]) -> Self {
        match header {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => ContentKind::Png,
            [0xFF, 0xD8, 0xFF, ..] => ContentKind::Jpeg,
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => ContentKind::Gif,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => ContentKind::Webp,
            [b'%', b'P', b'D', b'F', b'-', ..] => ContentKind::Pdf,
            [b'P', b'K', 0x03, 0x04, ..] => ContentKind::Zip,
            [0x1F, 0x8B, ..] => ContentKind::Gzip,
            [_, _, _, _, b'f', b't', b'y', b'p', ..] => ContentKind::Mp4,
            _ => ContentKind::Unknown,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentKind::Png => "image/png",
            ContentKind::Jpeg => "image/jpeg",
            ContentKind::Gif => "image/gif",
            ContentKind::Webp => "image/webp",
            ContentKind::Pdf => "application/pdf",
            ContentKind::Zip => "application/zip",
            ContentKind::Gzip => "application/gzip",
            ContentKind::Mp4 => "video/mp4",
            ContentKind::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Reads at most [`SNIFF_LEN`] bytes and classifies them. Stops early, so a
/// fanout handle passed in by value is closed well before the end of the
/// stream and stops holding back the other readers.
pub fn sniff<R: Read>(reader: R) -> Result<ContentKind> {
    let mut header = Vec::with_capacity(SNIFF_LEN);
    reader
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut header)
        .context("Failed to read header")?;
    Ok(ContentKind::from_header(&header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_copy_to_file_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/out.bin");

        let written = copy_to_file(Cursor::new(b"hello world".to_vec()), &path).unwrap();
        assert_eq!(written, 11);
        assert_eq!(fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn test_digest_matches_blake3() {
        let data = vec![7u8; 200_000];
        let expected = blake3::hash(&data).to_hex().to_string();
        assert_eq!(digest(Cursor::new(data)).unwrap(), expected);
    }

    #[test]
    fn test_count() {
        assert_eq!(count(Cursor::new(vec![0u8; 1234])).unwrap(), 1234);
        assert_eq!(count(io::empty()).unwrap(), 0);
    }

    #[test]
    fn test_sniff_known_headers() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
        assert_eq!(sniff(Cursor::new(png)).unwrap(), ContentKind::Png);

        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];
        assert_eq!(sniff(Cursor::new(jpeg)).unwrap(), ContentKind::Jpeg);

        assert_eq!(
            sniff(Cursor::new(b"%PDF-1.7\n".to_vec())).unwrap(),
            ContentKind::Pdf
        );
        assert_eq!(
            sniff(Cursor::new(b"RIFF\x10\0\0\0WEBPVP8 ".to_vec())).unwrap(),
            ContentKind::Webp
        );
        assert_eq!(
            sniff(Cursor::new(b"\0\0\0\x18ftypmp42".to_vec())).unwrap(),
            ContentKind::Mp4
        );
    }

    #[test]
    fn test_sniff_short_or_unknown() {
        assert_eq!(sniff(io::empty()).unwrap(), ContentKind::Unknown);
        assert_eq!(
            sniff(Cursor::new(b"plain text".to_vec())).unwrap(),
            ContentKind::Unknown
        );
        assert_eq!(ContentKind::Unknown.to_string(), "application/octet-stream");
    }
}
