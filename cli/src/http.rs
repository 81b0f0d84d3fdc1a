//! HTTP surface over the image registry.
//!
//! A deliberately small file server: `GET /` lists the served images,
//! `GET /{name}` streams one, honoring a single byte range so machines
//! can resume interrupted downloads. Composition and reads are
//! blocking, so they run on the blocking pool and feed the response
//! body through a channel.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use ember_core::EmberError;
use ember_server::{ImageFile, ImageRegistry};
use serde::Serialize;
use tracing::{info, warn};

const CHUNK: usize = 64 * 1024;

type SharedRegistry = Arc<ImageRegistry>;

pub fn router(registry: SharedRegistry) -> Router {
    Router::new()
        .route("/", get(list_images))
        .route("/:name", get(get_image))
        .with_state(registry)
}

#[derive(Serialize)]
struct ListingEntry {
    name: String,
    size: u64,
}

async fn list_images(State(registry): State<SharedRegistry>) -> Json<Vec<ListingEntry>> {
    let mut entries: Vec<ListingEntry> = registry
        .list()
        .into_iter()
        .map(|image| ListingEntry {
            name: image.name,
            size: image.size,
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Json(entries)
}

async fn get_image(
    State(registry): State<SharedRegistry>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let opened = tokio::task::spawn_blocking({
        let registry = registry.clone();
        let name = name.clone();
        move || registry.open(&name)
    })
    .await;

    let file = match opened {
        Ok(Ok(file)) => file,
        Ok(Err(EmberError::NotFound(_))) => {
            return StatusCode::NOT_FOUND.into_response();
        }
        Ok(Err(e)) => {
            warn!(name = %name, error = %e, "failed to open image");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            warn!(name = %name, error = %e, "image open task failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let total = file.size();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, total));

    let (status, start, len, content_range) = match range {
        None => (StatusCode::OK, 0, total, None),
        Some(Some((start, end))) => (
            StatusCode::PARTIAL_CONTENT,
            start,
            end - start + 1,
            Some(format!("bytes {}-{}/{}", start, end, total)),
        ),
        Some(None) => {
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", total))],
            )
                .into_response();
        }
    };

    info!(name = %name, status = %status.as_u16(), length = len, "serving image");

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(content_range) = content_range {
        response = response.header(header::CONTENT_RANGE, content_range);
    }
    match response.body(stream_body(file, start, len)) {
        Ok(response) => response,
        Err(e) => {
            warn!(name = %name, error = %e, "failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Parse a `bytes=` range header against an image of `total` bytes.
///
/// Returns the inclusive byte span, or `None` when the header is
/// malformed or out of bounds. Only a single range is supported;
/// multipart ranges are rejected.
fn parse_range(header: &str, total: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;

    if start.is_empty() {
        // Suffix range: the last N bytes
        let n: u64 = end.parse().ok()?;
        if n == 0 || total == 0 {
            return None;
        }
        return Some((total.saturating_sub(n), total - 1));
    }

    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() {
        total.checked_sub(1)?
    } else {
        end.parse().ok()?
    };
    if start > end || end >= total {
        return None;
    }
    Some((start, end))
}

/// Stream `len` bytes of the image from `start` through the blocking pool.
fn stream_body(mut file: ImageFile, start: u64, len: u64) -> Body {
    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(8);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = file.seek(SeekFrom::Start(start)) {
            let _ = tx.blocking_send(Err(e));
            return;
        }
        let mut remaining = len;
        let mut buf = vec![0u8; CHUNK];
        while remaining > 0 {
            let want = (remaining as usize).min(buf.len());
            match file.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    remaining -= n as u64;
                    if tx
                        .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });
    Body::from_stream(tokio_stream::wrappers::ReceiverStream::new(rx))
}
