//! Ramdisk composition: append the document as a compressed archive
//! member.
//!
//! Initial-ramdisk images are concatenations of cpio archives; the
//! kernel unpacks each member in order, so appending a gzip-compressed
//! cpio carrying `config.ign` makes the document appear in the booted
//! root without touching the base image.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use ember_core::{EmberError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{IgnitionInserter, ImageStream};

/// Path of the document inside the appended archive.
const ARCHIVE_MEMBER: &str = "config.ign";

/// A read+seek stream over a base stream followed by an in-memory suffix.
pub struct ChainStream<R> {
    base: R,
    base_len: u64,
    suffix: Vec<u8>,
    pos: u64,
}

impl<R: Read + Seek> ChainStream<R> {
    pub fn new(mut base: R, suffix: Vec<u8>) -> Result<Self> {
        let base_len = base.seek(SeekFrom::End(0))?;
        Ok(Self {
            base,
            base_len,
            suffix,
            pos: 0,
        })
    }

    fn total_len(&self) -> u64 {
        self.base_len + self.suffix.len() as u64
    }
}

impl<R: Read + Seek> Read for ChainStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.total_len() {
            return Ok(0);
        }
        let n = if self.pos < self.base_len {
            let max = ((self.base_len - self.pos) as usize).min(buf.len());
            self.base.seek(SeekFrom::Start(self.pos))?;
            self.base.read(&mut buf[..max])?
        } else {
            let idx = (self.pos - self.base_len) as usize;
            let max = (self.suffix.len() - idx).min(buf.len());
            buf[..max].copy_from_slice(&self.suffix[idx..idx + max]);
            max
        };
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for ChainStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.total_len() as i64 + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

/// Build a single-member cpio (newc) archive holding the document.
fn cpio_archive(name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 512);
    cpio_entry(&mut out, name, 0o100_644, data);
    cpio_entry(&mut out, "TRAILER!!!", 0, &[]);
    out
}

fn cpio_entry(out: &mut Vec<u8>, name: &str, mode: u32, data: &[u8]) {
    // newc header: magic plus 13 fixed-width hex fields
    out.extend_from_slice(b"070701");
    let fields = [
        0,                      // ino
        mode,                   // mode
        0,                      // uid
        0,                      // gid
        1,                      // nlink
        0,                      // mtime
        data.len() as u32,      // filesize
        0,                      // devmajor
        0,                      // devminor
        0,                      // rdevmajor
        0,                      // rdevminor
        name.len() as u32 + 1,  // namesize (with NUL)
        0,                      // check
    ];
    for field in fields {
        out.extend_from_slice(format!("{:08X}", field).as_bytes());
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad_to_4(out);
    out.extend_from_slice(data);
    pad_to_4(out);
}

fn pad_to_4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Compress the document into the archive member appended to the base.
///
/// Deterministic for a given document, so the length reported before
/// composing matches the stream composed later.
fn member_suffix(ignition: &[u8]) -> Result<Vec<u8>> {
    let archive = cpio_archive(ARCHIVE_MEMBER, ignition);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&archive)
        .map_err(|e| EmberError::Composition(format!("failed to compress document: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| EmberError::Composition(format!("failed to compress document: {}", e)))
}

/// Inserter for the initial-ramdisk image format.
#[derive(Debug, Default)]
pub struct RamdiskInserter;

impl IgnitionInserter for RamdiskInserter {
    fn insert(&self, base: &Path, ignition: &[u8]) -> Result<Box<dyn ImageStream>> {
        let file = File::open(base).map_err(EmberError::BaseImageUnavailable)?;
        let suffix = member_suffix(ignition)?;

        tracing::debug!(
            image = %base.display(),
            appended = suffix.len(),
            "composed ramdisk stream"
        );
        Ok(Box::new(ChainStream::new(file, suffix)?))
    }

    fn composed_len(&self, base_len: u64, ignition: &[u8]) -> Result<u64> {
        Ok(base_len + member_suffix(ignition)?.len() as u64)
    }
}
