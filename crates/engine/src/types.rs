use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// The monitored services, in the fixed order the orchestrator walks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceId {
    /// Reverse proxy / TLS termination.
    Traefik,
    /// Internal DNS.
    Bind9,
    /// Internal web server.
    Nginx,
    /// External (filtering) DNS.
    Pihole,
    /// Relational database.
    Postgresql,
}

impl ServiceId {
    pub const ALL: [ServiceId; 5] = [
        ServiceId::Traefik,
        ServiceId::Bind9,
        ServiceId::Nginx,
        ServiceId::Pihole,
        ServiceId::Postgresql,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceId::Traefik => "traefik",
            ServiceId::Bind9 => "bind9",
            ServiceId::Nginx => "nginx",
            ServiceId::Pihole => "pihole",
            ServiceId::Postgresql => "postgresql",
        }
    }

    pub fn role(self) -> &'static str {
        match self {
            ServiceId::Traefik => "reverse proxy",
            ServiceId::Bind9 => "internal DNS",
            ServiceId::Nginx => "internal web server",
            ServiceId::Pihole => "external DNS",
            ServiceId::Postgresql => "database",
        }
    }

    /// Probes run for this service, in execution order.
    pub fn probes(self, extended: bool) -> &'static [ProbeKind] {
        use ProbeKind::*;
        match (self, extended) {
            (ServiceId::Traefik, false) => &[HttpRedirect, HttpsAccess],
            (ServiceId::Traefik, true) => &[HttpRedirect, HttpsAccess, DashboardAuth],
            (ServiceId::Bind9, false) => &[InternalResolution],
            (ServiceId::Bind9, true) => &[InternalResolution, ReverseDns],
            (ServiceId::Nginx, _) => &[InternalAccess],
            (ServiceId::Pihole, false) => &[ExternalResolution],
            (ServiceId::Pihole, true) => &[ExternalResolution, AdminInterface],
            (ServiceId::Postgresql, _) => &[DbConnection],
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown service: {} (available: traefik, bind9, nginx, pihole, postgresql)",
                    s
                )
            })
    }
}

/// One functional check. The serialised name is the report's `test_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    HttpRedirect,
    HttpsAccess,
    DashboardAuth,
    InternalResolution,
    ReverseDns,
    InternalAccess,
    ExternalResolution,
    AdminInterface,
    #[serde(rename = "connection")]
    DbConnection,
}

impl ProbeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::HttpRedirect => "http_redirect",
            ProbeKind::HttpsAccess => "https_access",
            ProbeKind::DashboardAuth => "dashboard_auth",
            ProbeKind::InternalResolution => "internal_resolution",
            ProbeKind::ReverseDns => "reverse_dns",
            ProbeKind::InternalAccess => "internal_access",
            ProbeKind::ExternalResolution => "external_resolution",
            ProbeKind::AdminInterface => "admin_interface",
            ProbeKind::DbConnection => "connection",
        }
    }

    pub fn service(self) -> ServiceId {
        match self {
            ProbeKind::HttpRedirect | ProbeKind::HttpsAccess | ProbeKind::DashboardAuth => {
                ServiceId::Traefik
            }
            ProbeKind::InternalResolution | ProbeKind::ReverseDns => ServiceId::Bind9,
            ProbeKind::InternalAccess => ServiceId::Nginx,
            ProbeKind::ExternalResolution | ProbeKind::AdminInterface => ServiceId::Pihole,
            ProbeKind::DbConnection => ServiceId::Postgresql,
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Escalation level of a failure. Ordering follows escalation impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Moderate,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectionError,
    SslError,
    ResolutionError,
    DnsError,
    ServiceUnavailable,
    QueryError,
    RedirectError,
    HttpsError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::ConnectionError,
        ErrorKind::SslError,
        ErrorKind::ResolutionError,
        ErrorKind::DnsError,
        ErrorKind::ServiceUnavailable,
        ErrorKind::QueryError,
        ErrorKind::RedirectError,
        ErrorKind::HttpsError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::SslError => "ssl_error",
            ErrorKind::ResolutionError => "resolution_error",
            ErrorKind::DnsError => "dns_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::QueryError => "query_error",
            ErrorKind::RedirectError => "redirect_error",
            ErrorKind::HttpsError => "https_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown error kind: {}", s))
    }
}

/// A classified probe failure. Built only by the classifier; read-only after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    service: ServiceId,
    error_kind: ErrorKind,
    message: String,
    severity: Severity,
    timestamp: DateTime<Utc>,
}

impl TestError {
    pub(crate) fn new(
        service: ServiceId,
        error_kind: ErrorKind,
        message: String,
        severity: Severity,
    ) -> Self {
        Self {
            service,
            error_kind,
            message,
            severity,
            timestamp: Utc::now(),
        }
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn error_kind(&self) -> ErrorKind {
        self.error_kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

// ---------------------------------------------------------------------------
// Probe results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Pass,
    Fail,
    /// The run deadline expired before this probe was launched or finished.
    NotEvaluated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub service: ServiceId,
    pub test_name: String,
    pub status: ProbeStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Raw failure detail a probe hands to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What one probe invocation returns: the result row plus failure detail.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub result: ProbeResult,
    pub failure: Option<Failure>,
}

impl ProbeOutcome {
    pub fn pass(probe: ProbeKind, message: impl Into<String>) -> Self {
        Self {
            result: ProbeResult {
                service: probe.service(),
                test_name: probe.as_str().to_string(),
                status: ProbeStatus::Pass,
                message: message.into(),
                timestamp: Utc::now(),
            },
            failure: None,
        }
    }

    pub fn fail(probe: ProbeKind, failure: Failure) -> Self {
        Self {
            result: ProbeResult {
                service: probe.service(),
                test_name: probe.as_str().to_string(),
                status: ProbeStatus::Fail,
                message: failure.message.clone(),
                timestamp: Utc::now(),
            },
            failure: Some(failure),
        }
    }

    pub fn passed(&self) -> bool {
        self.result.status == ProbeStatus::Pass
    }
}

pub fn not_evaluated(probe: ProbeKind) -> ProbeResult {
    ProbeResult {
        service: probe.service(),
        test_name: probe.as_str().to_string(),
        status: ProbeStatus::NotEvaluated,
        message: "run deadline expired before this probe completed".to_string(),
        timestamp: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Resolution outcome and report – the stable output contract
// ---------------------------------------------------------------------------

/// Terminal state of the auto-resolution step for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Resolved,
    Ineligible,
    Exhausted,
    RestartFailed,
}

/// What happened to one classified failure after detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub service: ServiceId,
    pub error_kind: ErrorKind,
    pub test_name: String,
    pub disposition: Disposition,
    /// Attempt counter for the (service, kind) key after this incident.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Outcome of re-running the probe after a successful restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ProbeResult>,
    pub errors: Vec<TestError>,
    pub incidents: Vec<Incident>,
    #[serde(default)]
    pub not_evaluated: Vec<ServiceId>,
    pub error_count: usize,
}

impl Report {
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }

    /// 0 iff no failure was recorded during the run, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_healthy() {
            0
        } else {
            1
        }
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &Incident> {
        self.incidents
            .iter()
            .filter(|i| i.disposition != Disposition::Resolved)
    }
}

/// Generate a new run ID (UUIDv4).
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
