//! Collaborator interfaces the probes and the resolver talk through.
//!
//! Real implementations live in [`crate::platform`]; tests swap in fakes.

use crate::types::ErrorKind;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Result type for collaborator operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("tls error: {0}")]
    Tls(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub follow_redirects: bool,
    pub verify_tls: bool,
    pub basic_auth: Option<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// GET with TLS verification on and redirects followed.
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            follow_redirects: true,
            verify_tls: true,
            basic_auth: None,
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are stored lowercased.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(&self, req: HttpRequest) -> TransportResult<HttpResponse>;
}

// ---------------------------------------------------------------------------
// DNS
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait DnsResolver: Send + Sync {
    /// A records for `host` from the given nameservers only. An empty answer
    /// (including NXDOMAIN) is `Ok(vec![])`.
    async fn lookup_a(
        &self,
        host: &str,
        nameservers: &[IpAddr],
        timeout: Duration,
    ) -> TransportResult<Vec<Ipv4Addr>>;

    /// PTR names for `ip`.
    async fn reverse(
        &self,
        ip: IpAddr,
        nameservers: &[IpAddr],
        timeout: Duration,
    ) -> TransportResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DbTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

#[async_trait::async_trait]
pub trait DbConnection: Send {
    /// Run `sql` and return the first column of the first row.
    async fn query_scalar(&mut self, sql: &str) -> TransportResult<i64>;

    async fn close(self: Box<Self>);
}

#[async_trait::async_trait]
pub trait Database: Send + Sync {
    async fn connect(
        &self,
        target: &DbTarget,
        timeout: Duration,
    ) -> TransportResult<Box<dyn DbConnection>>;
}

// ---------------------------------------------------------------------------
// Container runtime
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    pub id: String,
}

#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look a container up by name; [`TransportError::NotFound`] if absent.
    async fn get(&self, name: &str) -> TransportResult<ContainerHandle>;

    async fn restart(&self, handle: &ContainerHandle) -> TransportResult<()>;
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// Optional free-text annotation for a failure, supplied from outside the core.
#[async_trait::async_trait]
pub trait Annotator: Send + Sync {
    async fn annotate(&self, kind: ErrorKind, message: &str) -> Option<String>;
}
