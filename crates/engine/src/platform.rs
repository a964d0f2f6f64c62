//! Real implementations of the collaborator traits.
//!
//! - [`ReqwestHttp`]: HTTP(S) via reqwest + rustls
//! - [`HickoryDns`]: DNS queries pinned to explicit nameservers
//! - [`PgDatabase`]: single Postgres connection via sqlx
//! - [`DockerCli`]: container lookup/restart through the docker (or podman) CLI

use crate::traits::*;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};
use std::error::Error as StdError;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Once;
use std::time::Duration;

/// Install the ring crypto provider for rustls once per process.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

// ===========================================================================
// HTTP – wraps reqwest
// ===========================================================================

pub struct ReqwestHttp;

impl ReqwestHttp {
    pub fn new() -> Self {
        install_crypto_provider();
        Self
    }
}

impl Default for ReqwestHttp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttp {
    async fn request(&self, req: HttpRequest) -> TransportResult<HttpResponse> {
        let redirect = if req.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = reqwest::Client::builder()
            .redirect(redirect)
            .danger_accept_invalid_certs(!req.verify_tls)
            .connect_timeout(req.timeout)
            .timeout(req.timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {}", e)))?;

        let mut builder = client.get(&req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((user, password)) = &req.basic_auth {
            builder = builder.basic_auth(user, Some(password));
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(&req.url, req.timeout, e))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        // Body is informational only; a broken body does not fail the request.
        let body = resp.text().await.unwrap_or_default();
        let body: String = body.chars().take(4096).collect();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(url: &str, timeout: Duration, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(timeout);
    }
    let detail = format!("GET {}: {}", url, error_chain(&err));
    if is_tls_failure(&err) {
        TransportError::Tls(detail)
    } else if err.is_connect() {
        TransportError::Connect(detail)
    } else {
        TransportError::Other(detail)
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut cur = err.source();
    while let Some(e) = cur {
        let s = e.to_string();
        if !parts.contains(&s) {
            parts.push(s);
        }
        cur = e.source();
    }
    parts.join(": ")
}

/// True when anything in the source chain is a rustls failure.
fn is_tls_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut cur = Some(err);
    while let Some(e) = cur {
        if e.downcast_ref::<rustls::Error>().is_some() {
            return true;
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io
                .get_ref()
                .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some())
            {
                return true;
            }
        }
        cur = e.source();
    }
    // Some verifier failures only survive as text in the chain.
    error_chain(err).to_ascii_lowercase().contains("certificate")
}

// ===========================================================================
// DNS – wraps hickory-resolver
// ===========================================================================

pub struct HickoryDns;

impl HickoryDns {
    fn resolver(nameservers: &[IpAddr], timeout: Duration) -> TokioAsyncResolver {
        let group = NameServerConfigGroup::from_ips_clear(nameservers, 53, true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        TokioAsyncResolver::tokio(config, opts)
    }
}

/// `Ok(())` for an empty answer so the caller returns an empty record list.
fn map_resolve_error(query: &str, timeout: Duration, err: ResolveError) -> TransportResult<()> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => Ok(()),
        ResolveErrorKind::Timeout => Err(TransportError::Timeout(timeout)),
        ResolveErrorKind::Io(e) => Err(TransportError::Connect(format!("{}: {}", query, e))),
        _ => Err(TransportError::Protocol(format!("{}: {}", query, err))),
    }
}

#[async_trait::async_trait]
impl DnsResolver for HickoryDns {
    async fn lookup_a(
        &self,
        host: &str,
        nameservers: &[IpAddr],
        timeout: Duration,
    ) -> TransportResult<Vec<Ipv4Addr>> {
        let resolver = Self::resolver(nameservers, timeout);
        let lookup = tokio::time::timeout(timeout, resolver.ipv4_lookup(host))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?;
        match lookup {
            Ok(answers) => Ok(answers.iter().map(|a| a.0).collect()),
            Err(e) => map_resolve_error(host, timeout, e).map(|()| Vec::new()),
        }
    }

    async fn reverse(
        &self,
        ip: IpAddr,
        nameservers: &[IpAddr],
        timeout: Duration,
    ) -> TransportResult<Vec<String>> {
        let resolver = Self::resolver(nameservers, timeout);
        let lookup = tokio::time::timeout(timeout, resolver.reverse_lookup(ip))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?;
        match lookup {
            Ok(names) => Ok(names.iter().map(|ptr| ptr.to_string()).collect()),
            Err(e) => map_resolve_error(&ip.to_string(), timeout, e).map(|()| Vec::new()),
        }
    }
}

// ===========================================================================
// Database – wraps sqlx (Postgres)
// ===========================================================================

pub struct PgDatabase;

struct PgSession {
    conn: PgConnection,
    timeout: Duration,
}

fn map_sqlx_error(err: sqlx::Error) -> TransportError {
    match err {
        sqlx::Error::Io(e) => TransportError::Connect(e.to_string()),
        sqlx::Error::Tls(e) => TransportError::Tls(e.to_string()),
        sqlx::Error::RowNotFound => TransportError::Protocol("query returned no rows".into()),
        other => TransportError::Other(other.to_string()),
    }
}

#[async_trait::async_trait]
impl Database for PgDatabase {
    async fn connect(
        &self,
        target: &DbTarget,
        timeout: Duration,
    ) -> TransportResult<Box<dyn DbConnection>> {
        let opts = PgConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .database(&target.database)
            .username(&target.user)
            .password(&target.password);

        let conn = tokio::time::timeout(timeout, PgConnection::connect_with(&opts))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| match map_sqlx_error(e) {
                // Auth and startup failures surface as database errors.
                TransportError::Other(m) => TransportError::Connect(m),
                other => other,
            })?;

        Ok(Box::new(PgSession { conn, timeout }))
    }
}

#[async_trait::async_trait]
impl DbConnection for PgSession {
    async fn query_scalar(&mut self, sql: &str) -> TransportResult<i64> {
        let row = tokio::time::timeout(self.timeout, sqlx::query(sql).fetch_one(&mut self.conn))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(map_sqlx_error)?;

        row.try_get::<i32, _>(0)
            .map(i64::from)
            .or_else(|_| row.try_get::<i64, _>(0))
            .map_err(|e| TransportError::Protocol(format!("non-integer scalar: {}", e)))
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "closing database connection failed");
        }
    }
}

// ===========================================================================
// Container runtime – docker / podman CLI
// ===========================================================================

pub struct DockerCli {
    bin: String,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[&str]) -> TransportResult<String> {
        let output = tokio::process::Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TransportError::Connect(format!("{} not found", self.bin))
                } else {
                    TransportError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("No such") {
                return Err(TransportError::NotFound(stderr));
            }
            return Err(TransportError::Other(format!(
                "{} {} exited with {}: {}",
                self.bin,
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerCli {
    async fn get(&self, name: &str) -> TransportResult<ContainerHandle> {
        let id = self
            .run(&["container", "inspect", "--format", "{{.Id}}", name])
            .await?;
        if id.is_empty() {
            return Err(TransportError::NotFound(name.to_string()));
        }
        Ok(ContainerHandle {
            name: name.to_string(),
            id,
        })
    }

    async fn restart(&self, handle: &ContainerHandle) -> TransportResult<()> {
        self.run(&["container", "restart", &handle.id]).await.map(|_| ())
    }
}
