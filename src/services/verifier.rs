//! Content type verification.
//!
//! A payload is accepted only when its declared extension is the endpoint's
//! single accepted extension *and* the media type sniffed from its first
//! bytes is the accepted MIME type. Sniffing borrows the payload's read cursor
//! through [`RewindGuard`], which puts the cursor back where it found it on
//! every exit path.

use serde::de::IgnoredAny;
use std::io::{self, Read, Seek, SeekFrom};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_SNIFF_WINDOW: usize = 2048;

const MIME_JSON: &str = "application/json";
const MIME_TEXT: &str = "text/plain";
const MIME_BINARY: &str = "application/octet-stream";
const MIME_EMPTY: &str = "application/x-empty";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Only .{expected} files are accepted")]
    UnsupportedExtension { expected: String },
    #[error("File is not a valid {label} file")]
    ContentMismatch {
        label: String,
        expected: String,
        detected: &'static str,
    },
    #[error("could not read upload payload: {0}")]
    Io(#[from] io::Error),
}

/// Verifies declared extension and sniffed content against one accepted type.
#[derive(Clone, Debug)]
pub struct ContentVerifier {
    accepted_extension: String,
    accepted_mime: String,
    window: usize,
}

impl ContentVerifier {
    pub fn new(
        accepted_extension: impl Into<String>,
        accepted_mime: impl Into<String>,
        window: usize,
    ) -> Self {
        let accepted_extension: String = accepted_extension.into();
        Self {
            accepted_extension: accepted_extension
                .trim_start_matches('.')
                .to_ascii_lowercase(),
            accepted_mime: accepted_mime.into(),
            window: window.max(1),
        }
    }

    pub fn accepted_extension(&self) -> &str {
        &self.accepted_extension
    }

    pub fn accepted_mime(&self) -> &str {
        &self.accepted_mime
    }

    /// Check `declared_extension`, then sniff at most `window` bytes from `reader`.
    ///
    /// On return, success or failure, `reader` is positioned where it was on entry.
    pub fn verify<R: Read + Seek>(
        &self,
        declared_extension: Option<&str>,
        reader: &mut R,
    ) -> Result<&'static str, ValidationError> {
        let extension_ok = declared_extension
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.accepted_extension));
        if !extension_ok {
            return Err(ValidationError::UnsupportedExtension {
                expected: self.accepted_extension.clone(),
            });
        }

        let mut guard = RewindGuard::acquire(reader)?;
        let (prefix, truncated) = guard.read_prefix(self.window)?;
        guard.release()?;

        let detected = sniff(&prefix, truncated);
        debug!(
            detected,
            prefix_len = prefix.len(),
            truncated,
            "sniffed upload content type"
        );
        if detected != self.accepted_mime {
            return Err(ValidationError::ContentMismatch {
                label: self.accepted_extension.to_ascii_uppercase(),
                expected: self.accepted_mime.clone(),
                detected,
            });
        }
        Ok(detected)
    }
}

/// Scoped hold on a reader's cursor.
///
/// The position at acquisition is restored by [`RewindGuard::release`], or by
/// `Drop` if the guard goes out of scope on an error path.
pub struct RewindGuard<'a, R: Seek> {
    inner: &'a mut R,
    origin: u64,
    released: bool,
}

impl<'a, R: Read + Seek> RewindGuard<'a, R> {
    pub fn acquire(inner: &'a mut R) -> io::Result<Self> {
        let origin = inner.stream_position()?;
        Ok(Self {
            inner,
            origin,
            released: false,
        })
    }

    /// Read up to `limit` bytes. The flag reports whether more bytes follow.
    pub fn read_prefix(&mut self, limit: usize) -> io::Result<(Vec<u8>, bool)> {
        let mut buf = Vec::with_capacity(limit + 1);
        self.inner
            .by_ref()
            .take(limit as u64 + 1)
            .read_to_end(&mut buf)?;
        let truncated = buf.len() > limit;
        buf.truncate(limit);
        Ok((buf, truncated))
    }

    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        self.inner.seek(SeekFrom::Start(self.origin)).map(|_| ())
    }
}

impl<R: Seek> Drop for RewindGuard<'_, R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.inner.seek(SeekFrom::Start(self.origin)) {
            warn!(error = %err, origin = self.origin, "failed to rewind payload cursor");
        }
    }
}

/// Determine the media type of `prefix` from its content alone.
///
/// `truncated` tells whether the payload continues past `prefix`; structured
/// text that is cut off mid-document still counts as that type.
pub fn sniff(prefix: &[u8], truncated: bool) -> &'static str {
    if prefix.is_empty() {
        return MIME_EMPTY;
    }
    if let Some(kind) = infer::get(prefix) {
        return kind.mime_type();
    }

    let body = prefix.strip_prefix(UTF8_BOM).unwrap_or(prefix);
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        // A multi-byte character split by the window boundary is still text.
        Err(err) if truncated && err.error_len().is_none() => {
            match std::str::from_utf8(&body[..err.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return MIME_BINARY,
            }
        }
        Err(_) => return MIME_BINARY,
    };

    if looks_like_json(text, truncated) {
        MIME_JSON
    } else {
        MIME_TEXT
    }
}

fn looks_like_json(text: &str, truncated: bool) -> bool {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return false;
    }
    match serde_json::from_str::<IgnoredAny>(trimmed) {
        Ok(_) => true,
        Err(err) => truncated && err.is_eof(),
    }
}
