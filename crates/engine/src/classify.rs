//! Failure classification – a total function over (service, error kind).

use crate::types::*;

/// Severity assigned to `kind` when it is raised by `service`.
pub fn severity_for(service: ServiceId, kind: ErrorKind) -> Severity {
    match kind {
        ErrorKind::ConnectionError => match service {
            ServiceId::Nginx => Severity::Moderate,
            _ => Severity::Critical,
        },
        ErrorKind::SslError
        | ErrorKind::HttpsError
        | ErrorKind::ResolutionError
        | ErrorKind::DnsError => Severity::Critical,
        ErrorKind::ServiceUnavailable | ErrorKind::QueryError | ErrorKind::RedirectError => {
            Severity::Moderate
        }
    }
}

/// Turn a probe failure into an immutable, timestamped [`TestError`].
pub fn classify(service: ServiceId, failure: Failure) -> TestError {
    let severity = severity_for(service, failure.kind);
    tracing::debug!(
        service = %service,
        kind = %failure.kind,
        severity = %severity,
        "classified probe failure"
    );
    TestError::new(service, failure.kind, failure.message, severity)
}
