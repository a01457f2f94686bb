//! Typed rejection and failure reasons.
//!
//! Every variant is recoverable at the request level: callers print it and
//! move on. Messages echo the offending name, token or path.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use scriptward_runner::LaunchError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path or file name")]
    EmptyName,
    #[error("absolute path not allowed: {0}")]
    AbsoluteNotAllowed(String),
    #[error("path traversal attempt: {0}")]
    TraversalAttempt(String),
    #[error("path outside the sandbox: {}", .0.display())]
    OutsideSandbox(PathBuf),
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("malformed URL `{url}`: {reason}")]
    Malformed { url: String, reason: String },
    #[error("URL scheme `{0}` is not allowed (http and https only)")]
    SchemeForbidden(String),
    #[error("URL has no host: {0}")]
    NoHost(String),
    #[error("local host `{0}` is not allowed")]
    LocalhostForbidden(String),
    #[error("more than {limit} redirects")]
    TooManyRedirects { limit: usize },
}

/// Why the scanner refused a script.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ScanViolation {
    #[error("forbidden import: {0}")]
    ImportForbidden(String),
    #[error("forbidden call: {0}")]
    CallForbidden(String),
    #[error("forbidden name: {0}")]
    NameForbidden(String),
    #[error("forbidden attribute: {0}")]
    AttributeForbidden(String),
    #[error("suspicious token: {0}")]
    SuspiciousToken(String),
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },
}

/// Which budget a killed run exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBudget {
    WallClock(Duration),
    CpuTime(u64),
}

impl std::fmt::Display for TimeBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WallClock(duration) => write!(f, "{}s wall-clock", duration.as_secs()),
            Self::CpuTime(seconds) => write!(f, "{seconds}s CPU"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("empty script")]
    EmptySource,
    #[error("script too long: {actual} characters (limit {limit})")]
    SourceTooLong { actual: usize, limit: usize },
    #[error("script rejected: {0}")]
    Rejected(#[from] ScanViolation),
    #[error("GUI toolkit `{0}` cannot run in the sandbox (no display)")]
    GuiNotSupported(String),
    #[error("execution timed out after {0}")]
    TimedOut(TimeBudget),
    #[error("failed to launch the interpreter: {0}")]
    LaunchFailed(String),
    #[error("script output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },
}

impl From<LaunchError> for ExecutionError {
    fn from(error: LaunchError) -> Self {
        Self::LaunchFailed(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SharedFileError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("content too long: {actual} characters (limit {limit})")]
    ContentTooLong { actual: usize, limit: usize },
    #[error("content contains forbidden marker `{0}`")]
    ForbiddenContent(String),
    #[error("refusing to return executable binary as text: {}", .0.display())]
    BinaryFile(PathBuf),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("unsupported content type `{0}`")]
    UnsupportedContentType(String),
    #[error("failed to write fetch cache {}: {source}", .path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory content is empty")]
    EmptyContent,
    #[error("failed to serialize memory store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write memory store {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Union of every error the [`crate::Sandbox`] facade can return.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error(transparent)]
    Scan(#[from] ScanViolation),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    SharedFile(#[from] SharedFileError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    /// True for policy rejections, false for environmental failures.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Path(_) | Self::Url(_) | Self::Scan(_) => true,
            Self::Execution(error) => matches!(
                error,
                ExecutionError::EmptySource
                    | ExecutionError::SourceTooLong { .. }
                    | ExecutionError::Rejected(_)
                    | ExecutionError::GuiNotSupported(_)
            ),
            Self::SharedFile(error) => !matches!(error, SharedFileError::Io { .. }),
            Self::Fetch(error) => matches!(
                error,
                FetchError::Url(_) | FetchError::UnsupportedContentType(_)
            ),
            Self::Memory(error) => matches!(error, MemoryError::EmptyContent),
            Self::Io { .. } => false,
        }
    }
}
