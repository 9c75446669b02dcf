//! Upload validation: reject bad uploads before any network call.
//!
//! Checks run in a fixed order and stop at the first failure, so the error
//! a user sees is deterministic: presence, then MIME class, then size. The
//! declared MIME type is what gets judged; [`sniff_mime_type`] exists only
//! to fill in a declaration when the caller supplied none.

use crate::error::CoverError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest accepted upload: 5 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 5_242_880;

/// Opaque identity of the user who owns an upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single upload event. Consumed by the scan; never persisted.
#[derive(Clone)]
pub struct UploadRequest {
    /// File contents; `None` when the user submitted without choosing a file.
    pub file: Option<Vec<u8>>,
    /// MIME type as declared by the client.
    pub declared_mime_type: String,
    /// Size as declared by the client.
    pub size_bytes: u64,
    pub owner_id: OwnerId,
}

impl UploadRequest {
    /// Build a request from in-memory bytes; the size is taken from the buffer.
    pub fn new(owner_id: impl Into<OwnerId>, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            size_bytes: bytes.len() as u64,
            file: Some(bytes),
            declared_mime_type: mime_type.into(),
            owner_id: owner_id.into(),
        }
    }

    /// A request with no file attached.
    pub fn empty(owner_id: impl Into<OwnerId>) -> Self {
        Self {
            file: None,
            declared_mime_type: String::new(),
            size_bytes: 0,
            owner_id: owner_id.into(),
        }
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("file", &self.file.as_ref().map(|b| format!("<{} bytes>", b.len())))
            .field("declared_mime_type", &self.declared_mime_type)
            .field("size_bytes", &self.size_bytes)
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

/// Check upload preconditions.
///
/// 1. a file is present, else [`CoverError::NoFile`]
/// 2. the declared type starts with `image/`, else [`CoverError::InvalidType`]
/// 3. `size_bytes ≤ MAX_UPLOAD_BYTES`, else [`CoverError::TooLarge`]
pub fn validate(request: &UploadRequest) -> Result<(), CoverError> {
    if request.file.is_none() {
        return Err(CoverError::NoFile);
    }

    if !is_image_mime(&request.declared_mime_type) {
        return Err(CoverError::InvalidType {
            mime_type: request.declared_mime_type.clone(),
        });
    }

    if request.size_bytes > MAX_UPLOAD_BYTES {
        return Err(CoverError::TooLarge {
            size: request.size_bytes,
            limit: MAX_UPLOAD_BYTES,
        });
    }

    Ok(())
}

/// `true` for MIME types in the `image/*` class.
pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// Detect an image MIME type from magic bytes.
///
/// Returns `None` for anything the `image` crate does not recognise.
pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG_MAGIC: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn request(mime: &str, size: u64) -> UploadRequest {
        UploadRequest {
            file: Some(vec![0u8; 16]),
            declared_mime_type: mime.to_string(),
            size_bytes: size,
            owner_id: OwnerId::new("user-1"),
        }
    }

    #[test]
    fn accepts_small_image() {
        assert!(validate(&request("image/jpeg", 1024)).is_ok());
    }

    #[test]
    fn accepts_exactly_the_ceiling() {
        assert!(validate(&request("image/png", MAX_UPLOAD_BYTES)).is_ok());
    }

    #[test]
    fn missing_file_reported_first() {
        let mut req = request("text/plain", MAX_UPLOAD_BYTES + 1);
        req.file = None;
        assert!(matches!(validate(&req), Err(CoverError::NoFile)));
    }

    #[test]
    fn too_large_regardless_of_image_subtype() {
        for mime in ["image/jpeg", "image/png", "image/webp", "image/x-anything"] {
            for size in [MAX_UPLOAD_BYTES + 1, MAX_UPLOAD_BYTES * 2, u64::MAX] {
                let err = validate(&request(mime, size)).unwrap_err();
                assert!(
                    matches!(err, CoverError::TooLarge { size: s, .. } if s == size),
                    "{mime} / {size}: {err}"
                );
            }
        }
    }

    #[test]
    fn type_checked_before_size() {
        for mime in ["application/pdf", "text/plain", "", "IMAGE/PNG", "video/mp4"] {
            let err = validate(&request(mime, MAX_UPLOAD_BYTES * 3)).unwrap_err();
            assert!(
                matches!(err, CoverError::InvalidType { .. }),
                "{mime:?} should be InvalidType, got {err}"
            );
        }
    }

    #[test]
    fn new_takes_size_from_buffer() {
        let req = UploadRequest::new("u", vec![1, 2, 3], "image/png");
        assert_eq!(req.size_bytes, 3);
        assert_eq!(req.owner_id.as_str(), "u");
    }

    #[test]
    fn sniff_known_formats() {
        let mut jpeg = JPEG_MAGIC.to_vec();
        jpeg.extend_from_slice(&[0u8; 16]);
        assert_eq!(sniff_mime_type(&jpeg), Some("image/jpeg"));

        let mut png = PNG_MAGIC.to_vec();
        png.extend_from_slice(&[0u8; 16]);
        assert_eq!(sniff_mime_type(&png), Some("image/png"));

        assert_eq!(sniff_mime_type(b"%PDF-1.7 not an image"), None);
    }

    #[test]
    fn debug_hides_file_contents() {
        let req = UploadRequest::new("u", vec![7; 42], "image/png");
        let dbg = format!("{req:?}");
        assert!(dbg.contains("<42 bytes>"));
    }
}
