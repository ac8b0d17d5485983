//! Central error types for the editor core.
//!
//! Component errors (`DecodeError`, `RenderError`) live next to the code that
//! raises them and convert into `EditorError` at the instance boundary.
//! All errors implement `Serialize` so the command layer can forward them.

use serde::Serialize;
use thiserror::Error;

/// Main error type for editor core operations.
#[derive(Error, Debug)]
pub enum EditorError {
    /// GPU adapter/device acquisition or pipeline creation failed
    #[error("Initialization failed: {0}")]
    Init(String),

    /// Container or codec cannot be decoded
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Filesystem or process I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unrecoverable decode failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// Per-frame render failure
    #[error("Render error: {0}")]
    Render(String),

    /// GPU device lost (recoverable - requires re-initialization)
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// Editor instance or export job not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Export stopped before the output was finalized
    #[error("Export aborted: {0}")]
    ExportAborted(String),

    /// Frame not decoded yet; retry shortly
    #[error("Frame at {timestamp_ms}ms is not ready yet")]
    FramePending { timestamp_ms: u64 },

    /// Instance is owned by a running export
    #[error("Editor instance is busy: {0}")]
    Busy(String),

    /// FFmpeg binary not found
    #[error("FFmpeg not found. Please ensure FFmpeg is installed or bundled.")]
    FfmpegNotFound,

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image processing error
    #[error("Image error: {0}")]
    Image(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl EditorError {
    /// True for errors a caller should simply retry (pending decode).
    pub fn is_retryable(&self) -> bool {
        matches!(self, EditorError::FramePending { .. })
    }

    /// True when the GPU device must be re-initialized before the next frame.
    pub fn needs_reinit(&self) -> bool {
        matches!(self, EditorError::DeviceLost(_))
    }
}

/// Serialize as the error message string for the command layer.
impl Serialize for EditorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<image::ImageError> for EditorError {
    fn from(err: image::ImageError) -> Self {
        EditorError::Image(err.to_string())
    }
}

impl From<String> for EditorError {
    fn from(msg: String) -> Self {
        EditorError::Other(msg)
    }
}

impl From<&str> for EditorError {
    fn from(msg: &str) -> Self {
        EditorError::Other(msg.to_string())
    }
}

/// Recover the guard from a poisoned std lock instead of propagating the panic.
pub trait LockRecover<G> {
    fn recover(self, context: &str) -> G;
}

impl<G> LockRecover<G> for Result<G, std::sync::PoisonError<G>> {
    fn recover(self, context: &str) -> G {
        self.unwrap_or_else(|poisoned| {
            log::warn!("Recovering poisoned lock: {}", context);
            poisoned.into_inner()
        })
    }
}

/// Extension trait for adding context to Results.
///
/// # Example
/// ```ignore
/// use crate::error::{EditorResult, ResultExt};
///
/// fn load() -> EditorResult<String> {
///     std::fs::read_to_string("config.json").context("failed to read config file")
/// }
/// ```
pub trait ResultExt<T> {
    /// Add context to an error, converting it to EditorError::Other.
    fn context(self, msg: &str) -> EditorResult<T>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F: FnOnce() -> String>(self, f: F) -> EditorResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn context(self, msg: &str) -> EditorResult<T> {
        self.map_err(|e| EditorError::Other(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> EditorResult<T> {
        self.map_err(|e| EditorError::Other(format!("{}: {}", f(), e)))
    }
}

/// Extension trait for adding context to Option types.
pub trait OptionExt<T> {
    /// Convert None to EditorError::Other with the given message.
    fn context(self, msg: &str) -> EditorResult<T>;

    /// Convert None to EditorError::Other with a lazily evaluated message.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> EditorResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn context(self, msg: &str) -> EditorResult<T> {
        self.ok_or_else(|| EditorError::Other(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> EditorResult<T> {
        self.ok_or_else(|| EditorError::Other(f()))
    }
}

/// Type alias for Results using EditorError.
pub type EditorResult<T> = Result<T, EditorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EditorError::UnsupportedFormat("prores".to_string());
        assert_eq!(err.to_string(), "Unsupported format: prores");
    }

    #[test]
    fn test_error_serialization() {
        let err = EditorError::FfmpegNotFound;
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("FFmpeg not found"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EditorError = io_err.into();
        assert!(matches!(err, EditorError::Io(_)));
    }

    #[test]
    fn test_from_string() {
        let err: EditorError = "test error".into();
        assert!(matches!(err, EditorError::Other(_)));
    }

    #[test]
    fn test_retry_and_reinit_tags() {
        assert!(EditorError::FramePending { timestamp_ms: 40 }.is_retryable());
        assert!(!EditorError::Render("x".into()).is_retryable());

        let lost = EditorError::DeviceLost("device removed".to_string());
        assert!(lost.needs_reinit());
        assert!(lost.to_string().contains("GPU device lost"));
        assert!(!EditorError::Init("no adapter".into()).needs_reinit());
    }

    #[test]
    fn test_lock_poisoning_recovery() {
        use std::sync::Mutex;

        let mutex = Mutex::new(42);

        let _ = std::panic::catch_unwind(|| {
            let _guard = mutex.lock().unwrap();
            panic!("intentional panic to poison mutex");
        });

        assert!(mutex.lock().is_err());

        let guard = mutex.lock().recover("test_mutex");
        assert_eq!(*guard, 42);
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<(), &str> = Err("original error");
        let with_context = result.context("operation failed");

        assert!(matches!(with_context, Err(EditorError::Other(_))));
        let msg = with_context.unwrap_err().to_string();
        assert!(msg.contains("operation failed"));
        assert!(msg.contains("original error"));
    }

    #[test]
    fn test_result_ext_with_context() {
        let result: Result<(), &str> = Err("inner");
        let msg = result
            .with_context(|| format!("ctx-{}", 42))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("ctx-42"));
        assert!(msg.contains("inner"));
    }

    #[test]
    fn test_option_ext() {
        let missing: Option<i32> = None;
        assert!(missing
            .context("value was missing")
            .unwrap_err()
            .to_string()
            .contains("value was missing"));

        assert_eq!(Some(42).context("should not appear").unwrap(), 42);

        let missing: Option<i32> = None;
        let msg = missing
            .with_context(|| format!("missing value at index {}", 5))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("missing value at index 5"));
    }
}
