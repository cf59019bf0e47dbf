//! Response contract and the bundled response types.
//!
//! A response is anything that can render itself into a wire [`Payload`].
//! Rendering may fail: a missing backing file surfaces as
//! [`RenderError::FileAccess`] (the pipeline turns it into a 404), anything
//! else as [`RenderError::Failed`] (a 500). Responses are held behind
//! [`SharedResponse`] handles: the dispatch pipeline and the response cache
//! may hold the same instance concurrently, and the instance is dropped when
//! the last holder lets go.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use http::StatusCode;
use serde_json::Value;

/// Rendered wire form of a response: status plus headers plus body bytes.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Payload {
    pub fn reason(&self) -> &'static str {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("OK")
    }
}

#[derive(Debug)]
pub enum RenderError {
    /// The response's backing file could not be opened.
    FileAccess(io::Error),
    /// Any other rendering failure.
    Failed(anyhow::Error),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::FileAccess(e) => write!(f, "file access failed: {e}"),
            RenderError::Failed(e) => write!(f, "render failed: {e}"),
        }
    }
}

impl std::error::Error for RenderError {}

/// Something the pipeline can materialise and send.
pub trait HttpResponse: Send + Sync {
    /// Produce the wire form. Called once per dispatch, possibly repeatedly
    /// for cached responses.
    fn render(&self) -> Result<Payload, RenderError>;

    /// Completion action, invoked after the connection has fully written
    /// the payload.
    fn on_complete(&self) {}
}

/// Shared handle through which the engine, the cache and the application
/// hold a response.
pub type SharedResponse = Arc<dyn HttpResponse>;

pub(crate) const NOT_FOUND_BODY: &str = r#"{"error":"Not Found"}"#;
pub(crate) const METHOD_NOT_ALLOWED_BODY: &str = r#"{"error":"Method Not Allowed"}"#;
pub(crate) const NOT_ACCEPTABLE_BODY: &str = r#"{"error":"Method Not Acceptable"}"#;
pub(crate) const INTERNAL_ERROR_BODY: &str = r#"{"error":"Internal Server Error"}"#;
pub(crate) const BAD_REQUEST_BODY: &str = r#"{"error":"Bad Request"}"#;
pub(crate) const TOO_LARGE_BODY: &str = r#"{"error":"Payload Too Large"}"#;

/// Build a payload straight from a static buffer, bypassing the response
/// machinery. Used for short-circuit replies (406, 413, parse failures).
pub(crate) fn static_page(status: u16, body: &'static str) -> Payload {
    Payload {
        status,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: body.as_bytes().to_vec(),
    }
}

type CompletionFn = Box<dyn Fn() + Send + Sync>;

/// A response with an in-memory string body.
pub struct TextResponse {
    status: u16,
    content_type: String,
    headers: Vec<(String, String)>,
    body: String,
    completion: Option<CompletionFn>,
}

impl TextResponse {
    pub fn new(body: impl Into<String>) -> Self {
        Self::with_status(body, 200)
    }

    pub fn with_status(body: impl Into<String>, status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            headers: Vec::new(),
            body: body.into(),
            completion: None,
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Attach a completion action, run once the payload has been written.
    pub fn on_completion(mut self, action: impl Fn() + Send + Sync + 'static) -> Self {
        self.completion = Some(Box::new(action));
        self
    }

    pub fn shared(self) -> SharedResponse {
        Arc::new(self)
    }
}

impl HttpResponse for TextResponse {
    fn render(&self) -> Result<Payload, RenderError> {
        let mut headers = vec![("Content-Type".to_string(), self.content_type.clone())];
        headers.extend(self.headers.iter().cloned());
        Ok(Payload {
            status: self.status,
            headers,
            body: self.body.clone().into_bytes(),
        })
    }

    fn on_complete(&self) {
        if let Some(action) = &self.completion {
            action();
        }
    }
}

/// A response carrying a JSON document.
pub struct JsonResponse {
    status: u16,
    value: Value,
}

impl JsonResponse {
    pub fn new(value: Value) -> Self {
        Self::with_status(value, 200)
    }

    pub fn with_status(value: Value, status: u16) -> Self {
        Self { status, value }
    }

    pub fn shared(self) -> SharedResponse {
        Arc::new(self)
    }
}

impl HttpResponse for JsonResponse {
    fn render(&self) -> Result<Payload, RenderError> {
        let body = serde_json::to_vec(&self.value)
            .map_err(|e| RenderError::Failed(anyhow::Error::new(e)))?;
        Ok(Payload {
            status: self.status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        })
    }
}

/// A response backed by a file on disk, read at render time.
pub struct FileResponse {
    path: PathBuf,
    content_type: String,
    status: u16,
}

impl FileResponse {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content_type: "application/octet-stream".to_string(),
            status: 200,
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn shared(self) -> SharedResponse {
        Arc::new(self)
    }
}

impl HttpResponse for FileResponse {
    fn render(&self) -> Result<Payload, RenderError> {
        let body = fs::read(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                RenderError::FileAccess(e)
            }
            _ => RenderError::Failed(anyhow::Error::new(e)),
        })?;
        Ok(Payload {
            status: self.status,
            headers: vec![("Content-Type".to_string(), self.content_type.clone())],
            body,
        })
    }
}
