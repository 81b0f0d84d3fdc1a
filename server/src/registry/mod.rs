//! Virtual image registry.
//!
//! A concurrent map from caller-chosen keys to served images. Serving
//! registers the image and returns its public URL without touching any
//! image bytes; the composed stream is created lazily on the first open
//! of the exposed name and torn down when the serving handle is
//! dropped. Static keys are exposed verbatim; dynamic keys get an
//! opaque generated name that survives until the key is removed.

pub mod base;

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use ember_core::{EmberError, Result};
use parking_lot::Mutex;
use url::Url;
use uuid::Uuid;

pub use base::BaseImage;

use crate::compose::ImageStream;

/// Lazily composed stream slot shared between a record and its open handle.
type StreamSlot = Arc<Mutex<Option<Box<dyn ImageStream>>>>;

/// One served image: exposed name, reported size, the document to
/// embed, and the lazily composed stream.
struct ServedImage {
    name: String,
    size: u64,
    ignition: Vec<u8>,
    initramfs: bool,
    stream: StreamSlot,
}

/// Listing metadata for one live record.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Default)]
struct Maps {
    /// exposed name → key
    keys: HashMap<String, String>,
    /// key → record
    images: HashMap<String, ServedImage>,
}

/// Registry of virtual images served to machines being provisioned.
pub struct ImageRegistry {
    iso: BaseImage,
    initramfs: BaseImage,
    base_url: Url,
    state: Mutex<Maps>,
}

impl ImageRegistry {
    pub fn new(iso: BaseImage, initramfs: BaseImage, base_url: Url) -> Self {
        Self {
            iso,
            initramfs,
            base_url,
            state: Mutex::new(Maps::default()),
        }
    }

    fn base_image(&self, initramfs: bool) -> &BaseImage {
        if initramfs {
            &self.initramfs
        } else {
            &self.iso
        }
    }

    /// Register an image under `key` and return its public URL.
    ///
    /// Idempotent by key: serving an already-served key returns the same
    /// URL and leaves the existing record (and its document) untouched.
    /// Static keys are exposed as-is; dynamic keys get a generated
    /// opaque name.
    pub fn serve(
        &self,
        key: &str,
        ignition: Vec<u8>,
        initramfs: bool,
        is_static: bool,
    ) -> Result<String> {
        let size = self.base_image(initramfs).composed_size(&ignition)?;

        let mut maps = self.state.lock();

        let name = if is_static {
            key.to_string()
        } else {
            match maps.images.get(key) {
                Some(image) => image.name.clone(),
                None => Uuid::new_v4().to_string(),
            }
        };

        if !maps.images.contains_key(key) {
            maps.keys.insert(name.clone(), key.to_string());
            maps.images.insert(
                key.to_string(),
                ServedImage {
                    name: name.clone(),
                    size,
                    ignition,
                    initramfs,
                    stream: Arc::new(Mutex::new(None)),
                },
            );
            tracing::info!(key = %key, name = %name, size, "registered image");
        }

        let url = self
            .base_url
            .join(&format!("/{}", name))
            .map_err(|e| EmberError::Configuration(format!("cannot build image URL: {}", e)))?;
        Ok(url.to_string())
    }

    /// Open the image exposed as `name`, composing its stream on first use.
    ///
    /// Composition happens outside the registry lock so unrelated
    /// requests stream in parallel. The returned handle clears the
    /// record's stream when dropped; the next open composes afresh.
    pub fn open(&self, name: &str) -> Result<ImageFile> {
        let (size, initramfs, ignition, slot) = {
            let maps = self.state.lock();
            let key = maps
                .keys
                .get(name)
                .ok_or_else(|| EmberError::NotFound(name.to_string()))?;
            let image = maps
                .images
                .get(key)
                .ok_or_else(|| EmberError::NotFound(name.to_string()))?;
            (
                image.size,
                image.initramfs,
                image.ignition.clone(),
                image.stream.clone(),
            )
        };

        let mut stream = slot.lock();
        if stream.is_none() {
            tracing::info!(name = %name, "composing image stream");
            *stream = Some(self.base_image(initramfs).compose(&ignition)?);
        }
        drop(stream);

        Ok(ImageFile {
            name: name.to_string(),
            size,
            slot,
        })
    }

    /// Unregister `key` in both directions. Unknown keys are a no-op.
    pub fn remove(&self, key: &str) {
        let mut maps = self.state.lock();
        if let Some(image) = maps.images.remove(key) {
            maps.keys.remove(&image.name);
            tracing::info!(key = %key, name = %image.name, "removed image");
        }
    }

    /// Metadata for every live record, for directory listings.
    pub fn list(&self) -> Vec<ImageMetadata> {
        let maps = self.state.lock();
        maps.images
            .values()
            .map(|image| ImageMetadata {
                name: image.name.clone(),
                size: image.size,
                is_dir: false,
            })
            .collect()
    }
}

/// An open handle on one served image.
///
/// Reads and seeks go to the record's composed stream. Dropping the
/// handle tears the stream down; the record itself stays registered.
pub struct ImageFile {
    name: String,
    size: u64,
    slot: StreamSlot,
}

impl ImageFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for ImageFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.slot.lock().as_mut() {
            Some(stream) => stream.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "image stream closed",
            )),
        }
    }
}

impl Seek for ImageFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self.slot.lock().as_mut() {
            Some(stream) => stream.seek(pos),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "image stream closed",
            )),
        }
    }
}

impl Drop for ImageFile {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::IgnitionInserter;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a stream of the base file's bytes with the document
    /// "inserted" by replacement at the start, keeping the length.
    struct FakeInserter {
        composed: AtomicUsize,
    }

    impl FakeInserter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                composed: AtomicUsize::new(0),
            })
        }
    }

    impl IgnitionInserter for FakeInserter {
        fn insert(&self, base: &Path, ignition: &[u8]) -> Result<Box<dyn ImageStream>> {
            self.composed.fetch_add(1, Ordering::SeqCst);
            let mut data = std::fs::read(base).map_err(EmberError::BaseImageUnavailable)?;
            let n = ignition.len().min(data.len());
            data[..n].copy_from_slice(&ignition[..n]);
            Ok(Box::new(Cursor::new(data)))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: ImageRegistry,
        inserter: Arc<FakeInserter>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let iso_path = dir.path().join("base.iso");
        let initrd_path = dir.path().join("base.img");
        std::fs::write(&iso_path, vec![b'i'; 4096]).unwrap();
        std::fs::write(&initrd_path, vec![b'r'; 2048]).unwrap();

        let inserter = FakeInserter::new();
        let registry = ImageRegistry::new(
            BaseImage::new(&iso_path, inserter.clone()),
            BaseImage::new(&initrd_path, inserter.clone()),
            Url::parse("http://base.test:1234").unwrap(),
        );
        Fixture {
            _dir: dir,
            registry,
            inserter,
        }
    }

    fn last_segment(url: &str) -> &str {
        url.rsplit('/').next().unwrap()
    }

    #[test]
    fn test_serve_static_uses_key_as_name() {
        let f = fixture();
        let url = f
            .registry
            .serve("host-a.iso", b"{}".to_vec(), false, true)
            .unwrap();
        assert_eq!(url, "http://base.test:1234/host-a.iso");
    }

    #[test]
    fn test_serve_dynamic_generates_opaque_name() {
        let f = fixture();
        let url = f
            .registry
            .serve("host-a.iso", b"{}".to_vec(), false, false)
            .unwrap();
        assert_ne!(last_segment(&url), "host-a.iso");
    }

    #[test]
    fn test_serve_idempotent_by_key() {
        let f = fixture();
        let url1 = f
            .registry
            .serve("host-a.iso", b"{\"a\":1}".to_vec(), false, false)
            .unwrap();
        // A different document for the same key does not re-register
        let url2 = f
            .registry
            .serve("host-a.iso", b"{\"b\":2}".to_vec(), false, false)
            .unwrap();
        assert_eq!(url1, url2);
    }

    #[test]
    fn test_serve_distinct_keys_distinct_names() {
        let f = fixture();
        let url1 = f
            .registry
            .serve("host-a.iso", b"{}".to_vec(), false, false)
            .unwrap();
        let url2 = f
            .registry
            .serve("host-b.iso", b"{}".to_vec(), false, false)
            .unwrap();
        assert_ne!(url1, url2);
    }

    #[test]
    fn test_remove_then_serve_generates_new_name() {
        let f = fixture();
        let url1 = f
            .registry
            .serve("host-a.iso", b"{}".to_vec(), false, false)
            .unwrap();
        f.registry.remove("host-a.iso");
        let url2 = f
            .registry
            .serve("host-a.iso", b"{}".to_vec(), false, false)
            .unwrap();
        assert_ne!(url1, url2);
    }

    #[test]
    fn test_remove_unknown_key_is_noop() {
        let f = fixture();
        f.registry.remove("never-served");
        assert!(f.registry.list().is_empty());
    }

    #[test]
    fn test_serve_missing_base_image() {
        let dir = tempfile::tempdir().unwrap();
        let inserter = FakeInserter::new();
        let registry = ImageRegistry::new(
            BaseImage::new(dir.path().join("missing.iso"), inserter.clone()),
            BaseImage::new(dir.path().join("missing.img"), inserter),
            Url::parse("http://base.test:1234").unwrap(),
        );
        let err = registry
            .serve("host-a.iso", b"{}".to_vec(), false, false)
            .unwrap_err();
        assert!(matches!(err, EmberError::BaseImageUnavailable(_)));
    }

    #[test]
    fn test_open_unknown_name() {
        let f = fixture();
        let result = f.registry.open("no-such-image");
        assert!(matches!(result, Err(EmberError::NotFound(_))));
    }

    #[test]
    fn test_open_streams_reported_size() {
        let f = fixture();
        let url = f
            .registry
            .serve("host-a.iso", b"{\"ignition\":{}}".to_vec(), false, true)
            .unwrap();

        let mut file = f.registry.open(last_segment(&url)).unwrap();
        assert_eq!(file.size(), 4096);

        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        assert_eq!(out.len() as u64, file.size());
        assert_eq!(&out[..15], b"{\"ignition\":{}}");
    }

    #[test]
    fn test_ramdisk_stream_length_matches_reported_size() {
        let dir = tempfile::tempdir().unwrap();
        let initrd_path = dir.path().join("base.img");
        std::fs::write(&initrd_path, vec![b'r'; 2048]).unwrap();

        let inserter = FakeInserter::new();
        let registry = ImageRegistry::new(
            BaseImage::new(dir.path().join("unused.iso"), inserter),
            BaseImage::new(&initrd_path, Arc::new(crate::compose::RamdiskInserter)),
            Url::parse("http://base.test:1234").unwrap(),
        );

        registry
            .serve("host-a.img", b"{\"ignition\":{}}".to_vec(), true, true)
            .unwrap();
        let reported = registry.list()[0].size;
        assert!(reported > 2048);

        let mut file = registry.open("host-a.img").unwrap();
        assert_eq!(file.size(), reported);
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        assert_eq!(out.len() as u64, reported);
    }

    #[test]
    fn test_open_initramfs_uses_other_base() {
        let f = fixture();
        let url = f
            .registry
            .serve("host-a.img", b"{}".to_vec(), true, true)
            .unwrap();
        let file = f.registry.open(last_segment(&url)).unwrap();
        assert_eq!(file.size(), 2048);
    }

    #[test]
    fn test_compose_once_per_open_cycle() {
        let f = fixture();
        f.registry
            .serve("host-a.iso", b"{}".to_vec(), false, true)
            .unwrap();

        let file = f.registry.open("host-a.iso").unwrap();
        assert_eq!(f.inserter.composed.load(Ordering::SeqCst), 1);

        // Dropping the handle closes the stream; the record survives
        drop(file);
        let _file = f.registry.open("host-a.iso").unwrap();
        assert_eq!(f.inserter.composed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ranged_read_after_seek() {
        let f = fixture();
        f.registry
            .serve("host-a.iso", b"abcdef".to_vec(), false, true)
            .unwrap();

        let mut file = f.registry.open("host-a.iso").unwrap();
        file.seek(SeekFrom::Start(2)).unwrap();
        let mut buf = [0u8; 3];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"cde");
    }

    #[test]
    fn test_list_reports_live_records() {
        let f = fixture();
        f.registry
            .serve("host-a.iso", b"{}".to_vec(), false, true)
            .unwrap();
        f.registry
            .serve("host-b.img", b"{}".to_vec(), true, true)
            .unwrap();

        let mut listing = f.registry.list();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            listing,
            vec![
                ImageMetadata {
                    name: "host-a.iso".to_string(),
                    size: 4096,
                    is_dir: false,
                },
                ImageMetadata {
                    name: "host-b.img".to_string(),
                    size: 2048,
                    is_dir: false,
                },
            ]
        );

        f.registry.remove("host-a.iso");
        assert_eq!(f.registry.list().len(), 1);
    }

    #[test]
    fn test_parallel_reads_of_different_names() {
        let f = fixture();
        f.registry
            .serve("host-a.iso", b"{}".to_vec(), false, true)
            .unwrap();
        f.registry
            .serve("host-b.img", b"{}".to_vec(), true, true)
            .unwrap();

        let registry = &f.registry;
        std::thread::scope(|s| {
            for name in ["host-a.iso", "host-b.img"] {
                s.spawn(move || {
                    let mut file = registry.open(name).unwrap();
                    let mut out = Vec::new();
                    file.read_to_end(&mut out).unwrap();
                    assert_eq!(out.len() as u64, file.size());
                });
            }
        });
    }
}
