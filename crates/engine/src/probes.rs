//! Service probes – HTTP redirect, HTTPS, DNS, internal HTTP and database.
//!
//! Every probe carries an explicit timeout, never touches shared state and
//! never returns an error: transport faults are converted into a
//! [`Failure`] with the error kind the classifier expects.

use crate::context::AppContext;
use crate::settings::{DatabaseSettings, Ipv4Subnet};
use crate::traits::*;
use crate::types::*;
use std::net::IpAddr;
use std::time::Duration;

/// Run one probe against the services described by the context settings.
pub async fn run_probe(probe: ProbeKind, ctx: &AppContext) -> ProbeOutcome {
    let s = &ctx.settings;
    let timeout = s.probes.timeout();

    let outcome = match probe {
        ProbeKind::HttpRedirect => http_redirect(ctx.http(), &s.proxy.redirect_url, timeout).await,
        ProbeKind::HttpsAccess => https_access(ctx.http(), &s.proxy.https_url, timeout).await,
        ProbeKind::DashboardAuth => {
            dashboard_auth(
                ctx.http(),
                &s.proxy.dashboard_url,
                &s.proxy.dashboard_user,
                &s.proxy.dashboard_password,
                timeout,
            )
            .await
        }
        ProbeKind::InternalResolution => {
            internal_resolution(
                ctx.dns(),
                &s.internal_dns.hostname,
                &s.internal_dns.nameservers,
                &s.internal_dns.subnet,
                timeout,
            )
            .await
        }
        ProbeKind::ReverseDns => {
            reverse_dns(
                ctx.dns(),
                s.internal_dns.reverse_ip,
                &s.internal_dns.reverse_zone,
                &s.internal_dns.nameservers,
                timeout,
            )
            .await
        }
        ProbeKind::InternalAccess => {
            internal_access(
                ctx.http(),
                &s.internal_web.url,
                &s.internal_web.host_header,
                timeout,
            )
            .await
        }
        ProbeKind::ExternalResolution => {
            external_resolution(
                ctx.dns(),
                &s.external_dns.hostname,
                &s.external_dns.nameservers,
                timeout,
            )
            .await
        }
        ProbeKind::AdminInterface => {
            admin_interface(ctx.http(), &s.external_dns.admin_url, timeout).await
        }
        ProbeKind::DbConnection => database(ctx.db(), &s.database, timeout).await,
    };

    match &outcome.failure {
        None => tracing::debug!(probe = %probe, "probe passed"),
        Some(f) => tracing::warn!(
            service = %probe.service(),
            probe = %probe,
            kind = %f.kind,
            message = %f.message,
            "probe failed"
        ),
    }
    outcome
}

fn describe(err: &TransportError) -> String {
    match err {
        TransportError::Timeout(d) => format!("timed out after {}ms", d.as_millis()),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Reverse proxy
// ---------------------------------------------------------------------------

/// Plain HTTP must answer 301 with a `Location` on the https scheme.
pub async fn http_redirect(http: &dyn HttpClient, url: &str, timeout: Duration) -> ProbeOutcome {
    let probe = ProbeKind::HttpRedirect;
    match http.request(HttpRequest::get(url, timeout).no_redirects()).await {
        Ok(resp) => {
            let location = resp.header("location").unwrap_or_default();
            if resp.status == 301 && location.to_ascii_lowercase().starts_with("https://") {
                ProbeOutcome::pass(probe, "HTTP to HTTPS redirect working")
            } else {
                ProbeOutcome::fail(
                    probe,
                    Failure::new(
                        ErrorKind::RedirectError,
                        format!(
                            "HTTP to HTTPS redirect not working: status {}, Location {:?}",
                            resp.status, location
                        ),
                    ),
                )
            }
        }
        Err(e) => ProbeOutcome::fail(probe, Failure::new(ErrorKind::ConnectionError, describe(&e))),
    }
}

/// HTTPS with full certificate validation must answer 200.
pub async fn https_access(http: &dyn HttpClient, url: &str, timeout: Duration) -> ProbeOutcome {
    https_check(
        ProbeKind::HttpsAccess,
        http,
        HttpRequest::get(url, timeout),
        "HTTPS access working",
    )
    .await
}

pub async fn dashboard_auth(
    http: &dyn HttpClient,
    url: &str,
    user: &str,
    password: &str,
    timeout: Duration,
) -> ProbeOutcome {
    https_check(
        ProbeKind::DashboardAuth,
        http,
        HttpRequest::get(url, timeout).basic_auth(user, password),
        "Dashboard authentication working",
    )
    .await
}

async fn https_check(
    probe: ProbeKind,
    http: &dyn HttpClient,
    req: HttpRequest,
    ok_message: &str,
) -> ProbeOutcome {
    match http.request(req).await {
        Ok(resp) if resp.status == 200 => ProbeOutcome::pass(probe, ok_message),
        Ok(resp) => ProbeOutcome::fail(
            probe,
            Failure::new(
                ErrorKind::HttpsError,
                format!("HTTPS request failed with status {}", resp.status),
            ),
        ),
        Err(e @ TransportError::Tls(_)) => {
            ProbeOutcome::fail(probe, Failure::new(ErrorKind::SslError, describe(&e)))
        }
        Err(e) => ProbeOutcome::fail(probe, Failure::new(ErrorKind::ConnectionError, describe(&e))),
    }
}

// ---------------------------------------------------------------------------
// DNS
// ---------------------------------------------------------------------------

/// The first A record from the internal resolver must fall inside `subnet`.
pub async fn internal_resolution(
    dns: &dyn DnsResolver,
    hostname: &str,
    nameservers: &[IpAddr],
    subnet: &Ipv4Subnet,
    timeout: Duration,
) -> ProbeOutcome {
    let probe = ProbeKind::InternalResolution;
    let fail = |msg: String| ProbeOutcome::fail(probe, Failure::new(ErrorKind::ResolutionError, msg));

    match dns.lookup_a(hostname, nameservers, timeout).await {
        Ok(addrs) => match addrs.first() {
            None => fail(format!("Internal DNS returned no A records for {}", hostname)),
            Some(addr) if subnet.contains(*addr) => ProbeOutcome::pass(
                probe,
                format!("Internal DNS resolution working ({} -> {})", hostname, addr),
            ),
            Some(addr) => fail(format!(
                "Internal DNS resolved {} to {}, outside {}",
                hostname, addr, subnet
            )),
        },
        Err(e) => fail(format!("Internal DNS resolution failed: {}", describe(&e))),
    }
}

/// A PTR record for `ip` must name a host inside `zone`.
pub async fn reverse_dns(
    dns: &dyn DnsResolver,
    ip: IpAddr,
    zone: &str,
    nameservers: &[IpAddr],
    timeout: Duration,
) -> ProbeOutcome {
    let probe = ProbeKind::ReverseDns;
    let zone = zone.trim_end_matches('.').to_ascii_lowercase();

    match dns.reverse(ip, nameservers, timeout).await {
        Ok(names) => {
            let matched = names.iter().find(|n| {
                let n = n.trim_end_matches('.').to_ascii_lowercase();
                n == zone || n.ends_with(&format!(".{}", zone))
            });
            match matched {
                Some(name) => ProbeOutcome::pass(probe, format!("Reverse DNS working ({})", name)),
                None => ProbeOutcome::fail(
                    probe,
                    Failure::new(
                        ErrorKind::ResolutionError,
                        format!("Reverse DNS for {} returned no name in {}", ip, zone),
                    ),
                ),
            }
        }
        Err(e) => ProbeOutcome::fail(
            probe,
            Failure::new(
                ErrorKind::ResolutionError,
                format!("Reverse DNS failed: {}", describe(&e)),
            ),
        ),
    }
}

/// Any A record through the external resolver is enough.
pub async fn external_resolution(
    dns: &dyn DnsResolver,
    hostname: &str,
    nameservers: &[IpAddr],
    timeout: Duration,
) -> ProbeOutcome {
    let probe = ProbeKind::ExternalResolution;
    match dns.lookup_a(hostname, nameservers, timeout).await {
        Ok(addrs) if !addrs.is_empty() => {
            ProbeOutcome::pass(probe, "External DNS resolution working")
        }
        Ok(_) => ProbeOutcome::fail(
            probe,
            Failure::new(
                ErrorKind::DnsError,
                format!("External DNS returned no records for {}", hostname),
            ),
        ),
        Err(e) => ProbeOutcome::fail(
            probe,
            Failure::new(
                ErrorKind::DnsError,
                format!("External DNS resolution failed: {}", describe(&e)),
            ),
        ),
    }
}

// ---------------------------------------------------------------------------
// Internal HTTP
// ---------------------------------------------------------------------------

pub async fn internal_access(
    http: &dyn HttpClient,
    url: &str,
    host_header: &str,
    timeout: Duration,
) -> ProbeOutcome {
    plain_http_check(
        ProbeKind::InternalAccess,
        http,
        HttpRequest::get(url, timeout).header("Host", host_header),
        "Internal web server access working",
    )
    .await
}

pub async fn admin_interface(http: &dyn HttpClient, url: &str, timeout: Duration) -> ProbeOutcome {
    plain_http_check(
        ProbeKind::AdminInterface,
        http,
        HttpRequest::get(url, timeout),
        "Admin interface accessible",
    )
    .await
}

async fn plain_http_check(
    probe: ProbeKind,
    http: &dyn HttpClient,
    req: HttpRequest,
    ok_message: &str,
) -> ProbeOutcome {
    match http.request(req).await {
        Ok(resp) if resp.status == 200 => ProbeOutcome::pass(probe, ok_message),
        Ok(resp) => ProbeOutcome::fail(
            probe,
            Failure::new(
                ErrorKind::ServiceUnavailable,
                format!("service not responding correctly: status {}", resp.status),
            ),
        ),
        Err(e) => ProbeOutcome::fail(probe, Failure::new(ErrorKind::ConnectionError, describe(&e))),
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Connect, run the scalar query and compare against the expected value.
pub async fn database(db: &dyn Database, cfg: &DatabaseSettings, timeout: Duration) -> ProbeOutcome {
    let probe = ProbeKind::DbConnection;
    let target = DbTarget {
        host: cfg.host.clone(),
        port: cfg.port,
        database: cfg.database.clone(),
        user: cfg.user.clone(),
        password: cfg.password.clone(),
    };

    let mut conn = match db.connect(&target, timeout).await {
        Ok(c) => c,
        Err(e) => {
            return ProbeOutcome::fail(
                probe,
                Failure::new(
                    ErrorKind::ConnectionError,
                    format!("Database connection failed: {}", describe(&e)),
                ),
            )
        }
    };

    let queried = conn.query_scalar(&cfg.query).await;
    conn.close().await;

    match queried {
        Ok(v) if v == cfg.expected => ProbeOutcome::pass(probe, "Database connection working"),
        Ok(v) => ProbeOutcome::fail(
            probe,
            Failure::new(
                ErrorKind::QueryError,
                format!("Database query returned {}, expected {}", v, cfg.expected),
            ),
        ),
        Err(e) => ProbeOutcome::fail(
            probe,
            Failure::new(
                ErrorKind::QueryError,
                format!("Database query failed: {}", describe(&e)),
            ),
        ),
    }
}
