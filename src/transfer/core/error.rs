use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a host name lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveErrorKind {
    /// The name does not exist.
    NotFound,
    /// The resolver could not answer right now.
    Transient,
    /// The name exists but has no usable address.
    NoAddress,
    /// Anything else the resolver reported.
    Unknown(String),
}

impl ResolveErrorKind {
    /// Classify a lookup failure reported by the system resolver.
    ///
    /// The standard library only exposes `getaddrinfo` failures as text, so
    /// the message is matched against the strings glibc, musl, macOS and
    /// Windows produce for each case.
    pub fn classify(err: &io::Error) -> Self {
        let msg = err.to_string();
        let lower = msg.to_ascii_lowercase();

        if lower.contains("not known")
            || lower.contains("no such host")
            || lower.contains("not found")
        {
            ResolveErrorKind::NotFound
        } else if lower.contains("temporary failure") || lower.contains("try again") {
            ResolveErrorKind::Transient
        } else if lower.contains("no address") {
            ResolveErrorKind::NoAddress
        } else {
            ResolveErrorKind::Unknown(msg)
        }
    }
}

impl fmt::Display for ResolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveErrorKind::NotFound => write!(f, "host not found, check connection settings"),
            ResolveErrorKind::Transient => write!(f, "temporary failure, try again later"),
            ResolveErrorKind::NoAddress => write!(f, "no IP address for host"),
            ResolveErrorKind::Unknown(detail) => write!(f, "unknown error: {}", detail),
        }
    }
}

/// Every way a transfer can fail. All of them end the current transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("could not resolve host {host}: {kind}")]
    Resolution {
        host: String,
        kind: ResolveErrorKind,
    },

    #[error("no IP address or host name entered, check connection settings")]
    NoDestination,

    #[error("could not create socket: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("could not {operation} file {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not allocate a {size} byte buffer")]
    Allocation { size: usize },

    #[error("invalid transfer parameters: {0}")]
    InvalidParameters(String),

    #[error("the connection timed out after {0:?} without progress")]
    Timeout(Duration),
}

impl TransferError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        TransferError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Numeric system error code behind this failure, if there is one.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            TransferError::SocketCreate(e)
            | TransferError::Accept(e)
            | TransferError::Send(e)
            | TransferError::Receive(e) => e.raw_os_error(),
            TransferError::Bind { source, .. }
            | TransferError::Connect { source, .. }
            | TransferError::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
