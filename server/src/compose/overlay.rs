//! ISO composition: overlay the document onto the image's embed area.
//!
//! Boot ISOs built for config embedding reserve a zero-filled region and
//! describe it with a descriptor: the magic `coreiso+` followed by the
//! area's byte offset and length as little-endian u64s. Locating that
//! descriptor is the only format knowledge here; the composed stream is
//! the base file with the region replaced in flight.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use ember_core::{EmberError, Result};

use super::{IgnitionInserter, ImageStream};

const EMBED_MAGIC: &[u8] = b"coreiso+";

/// Location of the reserved embed region inside the base image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbedArea {
    pub offset: u64,
    pub length: u64,
}

/// Scan the image for the embed-area descriptor.
pub fn locate_embed_area(reader: &mut (impl Read + Seek)) -> Result<EmbedArea> {
    reader.seek(SeekFrom::Start(0))?;

    // Chunked scan with overlap so a descriptor straddling a chunk
    // boundary is still found.
    const CHUNK: usize = 64 * 1024;
    let keep = EMBED_MAGIC.len() + 16 - 1;
    let mut buf = vec![0u8; CHUNK];
    let mut tail: Vec<u8> = Vec::new();
    let mut base_pos: u64 = 0;

    loop {
        let prefix = tail.len();
        buf[..prefix].copy_from_slice(&tail);
        let n = read_full(reader, &mut buf[prefix..])?;
        if n == 0 {
            return Err(EmberError::Composition(
                "no embed area descriptor in base image".to_string(),
            ));
        }
        let window = &buf[..prefix + n];

        if let Some(idx) = find(window, EMBED_MAGIC) {
            let descriptor_at = base_pos + idx as u64;
            reader.seek(SeekFrom::Start(descriptor_at + EMBED_MAGIC.len() as u64))?;
            let mut fields = [0u8; 16];
            reader.read_exact(&mut fields).map_err(|_| {
                EmberError::Composition("truncated embed area descriptor".to_string())
            })?;
            let mut word = [0u8; 8];
            word.copy_from_slice(&fields[..8]);
            let offset = u64::from_le_bytes(word);
            word.copy_from_slice(&fields[8..]);
            let length = u64::from_le_bytes(word);
            return Ok(EmbedArea { offset, length });
        }

        let consumed = window.len().saturating_sub(keep);
        tail = window[consumed..].to_vec();
        base_pos += consumed as u64;
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A read+seek view of a base stream with one bounded region replaced.
///
/// Reads inside the region come from the replacement bytes (zero-padded
/// to the region length); everything else comes from the base. The
/// total length equals the base length, so the composed image reports
/// the same size as the base it wraps.
pub struct OverlayStream<R> {
    base: R,
    base_len: u64,
    area: EmbedArea,
    replacement: Vec<u8>,
    pos: u64,
}

impl<R: Read + Seek> OverlayStream<R> {
    pub fn new(mut base: R, area: EmbedArea, replacement: Vec<u8>) -> Result<Self> {
        let base_len = base.seek(SeekFrom::End(0))?;
        // A corrupt descriptor can carry fields that wrap u64
        let area_end = area.offset.checked_add(area.length).ok_or_else(|| {
            EmberError::Composition(format!(
                "embed area {}+{} overflows",
                area.offset, area.length
            ))
        })?;
        if area_end > base_len {
            return Err(EmberError::Composition(format!(
                "embed area {}+{} exceeds image size {}",
                area.offset, area.length, base_len
            )));
        }
        if replacement.len() as u64 > area.length {
            return Err(EmberError::Composition(format!(
                "document of {} bytes exceeds embed area of {} bytes",
                replacement.len(),
                area.length
            )));
        }
        Ok(Self {
            base,
            base_len,
            area,
            replacement,
            pos: 0,
        })
    }
}

impl<R: Read + Seek> Read for OverlayStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.base_len {
            return Ok(0);
        }
        let area_end = self.area.offset + self.area.length;

        let n = if self.pos < self.area.offset {
            // Before the region: pass through, stopping at its edge.
            let max = (self.area.offset - self.pos).min(buf.len() as u64) as usize;
            self.base.seek(SeekFrom::Start(self.pos))?;
            self.base.read(&mut buf[..max])?
        } else if self.pos < area_end {
            let idx = (self.pos - self.area.offset) as usize;
            let max = ((area_end - self.pos) as usize).min(buf.len());
            for (i, b) in buf[..max].iter_mut().enumerate() {
                *b = self.replacement.get(idx + i).copied().unwrap_or(0);
            }
            max
        } else {
            let max = ((self.base_len - self.pos) as usize).min(buf.len());
            self.base.seek(SeekFrom::Start(self.pos))?;
            self.base.read(&mut buf[..max])?
        };

        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for OverlayStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.base_len as i64 + offset,
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

/// Inserter for the optical-disc image format.
#[derive(Debug, Default)]
pub struct IsoInserter;

impl IgnitionInserter for IsoInserter {
    fn insert(&self, base: &Path, ignition: &[u8]) -> Result<Box<dyn ImageStream>> {
        let mut file = File::open(base).map_err(EmberError::BaseImageUnavailable)?;
        let area = locate_embed_area(&mut file)?;
        tracing::debug!(
            image = %base.display(),
            offset = area.offset,
            length = area.length,
            "located embed area"
        );
        Ok(Box::new(OverlayStream::new(file, area, ignition.to_vec())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn image_with_area(total: usize, offset: u64, length: u64) -> Vec<u8> {
        let mut image = vec![b'x'; total];
        let descriptor_at = 100;
        image[descriptor_at..descriptor_at + 8].copy_from_slice(EMBED_MAGIC);
        image[descriptor_at + 8..descriptor_at + 16].copy_from_slice(&offset.to_le_bytes());
        image[descriptor_at + 16..descriptor_at + 24].copy_from_slice(&length.to_le_bytes());
        for b in &mut image[offset as usize..(offset + length) as usize] {
            *b = 0;
        }
        image
    }

    #[test]
    fn test_locate_embed_area() {
        let image = image_with_area(4096, 1024, 512);
        let area = locate_embed_area(&mut Cursor::new(image)).unwrap();
        assert_eq!(
            area,
            EmbedArea {
                offset: 1024,
                length: 512
            }
        );
    }

    #[test]
    fn test_locate_across_chunk_boundary() {
        // Descriptor straddling the 64 KiB scan chunk
        let offset = 200_000u64;
        let mut image = vec![b'x'; 300_000];
        let at = 64 * 1024 - 3;
        image[at..at + 8].copy_from_slice(EMBED_MAGIC);
        image[at + 8..at + 16].copy_from_slice(&offset.to_le_bytes());
        image[at + 16..at + 24].copy_from_slice(&256u64.to_le_bytes());

        let area = locate_embed_area(&mut Cursor::new(image)).unwrap();
        assert_eq!(area.offset, 200_000);
        assert_eq!(area.length, 256);
    }

    #[test]
    fn test_locate_missing_descriptor() {
        let err = locate_embed_area(&mut Cursor::new(vec![b'x'; 4096])).unwrap_err();
        assert!(matches!(err, EmberError::Composition(_)));
    }

    #[test]
    fn test_overlay_replaces_region() {
        let image = image_with_area(4096, 1024, 512);
        let area = EmbedArea {
            offset: 1024,
            length: 512,
        };
        let mut stream =
            OverlayStream::new(Cursor::new(image), area, b"ignition!".to_vec()).unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 4096);
        // Pre-region bytes pass through untouched, descriptor included
        assert_eq!(&out[..100], &vec![b'x'; 100][..]);
        assert_eq!(&out[100..108], EMBED_MAGIC);
        assert_eq!(&out[124..1024], &vec![b'x'; 900][..]);
        assert_eq!(&out[1024..1033], b"ignition!");
        // Remainder of the area is zero-padded
        assert_eq!(&out[1033..1536], &vec![0u8; 503][..]);
        assert_eq!(&out[1536..], &vec![b'x'; 4096 - 1536][..]);
    }

    #[test]
    fn test_overlay_random_access() {
        let image = image_with_area(4096, 1024, 512);
        let area = EmbedArea {
            offset: 1024,
            length: 512,
        };
        let mut stream =
            OverlayStream::new(Cursor::new(image), area, b"ignition!".to_vec()).unwrap();

        // Read across the region's trailing edge
        stream.seek(SeekFrom::Start(1534)).unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &[0, 0, b'x', b'x']);

        // Seek backwards into the replacement
        stream.seek(SeekFrom::Start(1024)).unwrap();
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ignition");
    }

    #[test]
    fn test_overlay_length_matches_base() {
        let image = image_with_area(4096, 1024, 512);
        let area = EmbedArea {
            offset: 1024,
            length: 512,
        };
        let mut stream = OverlayStream::new(Cursor::new(image), area, Vec::new()).unwrap();
        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 4096);
    }

    #[test]
    fn test_overlay_rejects_oversized_document() {
        let image = image_with_area(4096, 1024, 8);
        let area = EmbedArea {
            offset: 1024,
            length: 8,
        };
        let result = OverlayStream::new(Cursor::new(image), area, vec![0u8; 9]);
        assert!(matches!(result, Err(EmberError::Composition(_))));
    }

    #[test]
    fn test_overlay_rejects_overflowing_descriptor() {
        let area = EmbedArea {
            offset: u64::MAX - 1,
            length: 2,
        };
        let result = OverlayStream::new(Cursor::new(vec![b'x'; 4096]), area, Vec::new());
        assert!(matches!(result, Err(EmberError::Composition(_))));
    }

    #[test]
    fn test_overlay_seek_before_start_fails() {
        let image = image_with_area(4096, 1024, 512);
        let area = EmbedArea {
            offset: 1024,
            length: 512,
        };
        let mut stream = OverlayStream::new(Cursor::new(image), area, Vec::new()).unwrap();
        assert!(stream.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_iso_inserter_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.iso");
        std::fs::write(&path, image_with_area(4096, 1024, 512)).unwrap();

        let mut stream = IsoInserter.insert(&path, b"{\"ignition\":{}}").unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 4096);
        assert_eq!(&out[1024..1039], b"{\"ignition\":{}}");
    }

    #[test]
    fn test_iso_inserter_missing_base() {
        let result = IsoInserter.insert(Path::new("/nonexistent/base.iso"), b"{}");
        assert!(matches!(result, Err(EmberError::BaseImageUnavailable(_))));
    }
}
