//! Troubleshooting guides – static remediation text per (service, error kind).

use crate::types::{ErrorKind, ServiceId};

pub const NO_GUIDE: &str = "No specific troubleshooting guide available for this error.";

const TRAEFIK_CONNECTION: &str = "\
1. Check the proxy container is running: docker ps --filter name=traefik
2. Review the proxy configuration:
   - entrypoints for ports 80 and 443
   - certificate resolver and certificate paths
   - router rules for the affected hosts
3. Read the proxy logs: docker logs <prefix>traefik_<instance>
4. Confirm ports 80 and 443 are listening (ss -tuln) and not firewalled.
5. Check certificate validity and the DNS provider API token.";

const TRAEFIK_SSL: &str = "\
1. Check certificate expiry and the subject names it covers.
2. Confirm the public DNS records still point at the proxy.
3. Review the certificate resolver and ACME challenge settings.
4. Search the proxy logs for ACME or TLS handshake errors.
5. Verify the DNS provider API token and its permissions.";

const TRAEFIK_HTTPS: &str = "\
1. Request the site with curl -vk and note the status code.
2. Check the router for the host exists and targets a healthy backend.
3. Confirm the backend service is up; a 502/504 usually means it is not.
4. Review middlewares (auth, redirects) attached to the router.";

const TRAEFIK_REDIRECT: &str = "\
1. Confirm the web entrypoint redirects to websecure.
2. Check the redirect scheme is https and the status is permanent (301).
3. Make sure no router on port 80 answers before the redirect applies.";

const BIND9_RESOLUTION: &str = "\
1. Check the internal DNS container is running.
2. Review the forward zone for the expected A records.
3. Review the reverse zone for the matching PTR records.
4. Validate the configuration: named-checkconf and named-checkzone.
5. Read the resolver logs for zone load errors.
6. Query the server directly: dig @<internal resolver> <hostname>";

const NGINX_UNAVAILABLE: &str = "\
1. Check the internal web container is running.
2. Validate the configuration: nginx -t
3. Review the server block for the requested Host header.
4. Read the access and error logs.
5. Check file permissions on the served content.
6. Request it locally: curl -H \"Host: <host header>\" http://localhost:8080";

const NGINX_CONNECTION: &str = "\
1. Check the internal web container is running and has not crash-looped.
2. Confirm it is attached to the internal network and listening on 8080.
3. Check the hostname resolves to the container address.";

const PIHOLE_DNS: &str = "\
1. Check the external DNS container is running.
2. Review the upstream DNS servers it forwards to.
3. Review local DNS entries and block lists for the queried name.
4. Read the resolver logs.
5. Query it directly: dig @<external resolver> <hostname>
6. Check the admin interface for a disabled or paused resolver.";

const PIHOLE_UNAVAILABLE: &str = "\
1. Check the external DNS container is running.
2. Confirm the admin web server is enabled and listening on port 80.
3. Read the web server logs inside the container.";

const POSTGRES_CONNECTION: &str = "\
1. Check the database container is running.
2. Test connectivity: pg_isready -h <host> -p <port>
3. Read the database logs for startup or authentication errors.
4. Verify the configured user and password.
5. Check pg_hba.conf allows the probing host.";

const POSTGRES_QUERY: &str = "\
1. Connect with psql and run the probe query by hand.
2. Check the database is not in recovery or read-only mode.
3. Check the probing role has permission to run the query.";

/// Guide text for `(service, kind)`, or [`NO_GUIDE`].
pub fn guide(service: ServiceId, kind: ErrorKind) -> &'static str {
    match (service, kind) {
        (ServiceId::Traefik, ErrorKind::ConnectionError) => TRAEFIK_CONNECTION,
        (ServiceId::Traefik, ErrorKind::SslError) => TRAEFIK_SSL,
        (ServiceId::Traefik, ErrorKind::HttpsError) => TRAEFIK_HTTPS,
        (ServiceId::Traefik, ErrorKind::RedirectError) => TRAEFIK_REDIRECT,
        (ServiceId::Bind9, ErrorKind::ResolutionError) => BIND9_RESOLUTION,
        (ServiceId::Nginx, ErrorKind::ServiceUnavailable) => NGINX_UNAVAILABLE,
        (ServiceId::Nginx, ErrorKind::ConnectionError) => NGINX_CONNECTION,
        (ServiceId::Pihole, ErrorKind::DnsError) => PIHOLE_DNS,
        (ServiceId::Pihole, ErrorKind::ServiceUnavailable) => PIHOLE_UNAVAILABLE,
        (ServiceId::Postgresql, ErrorKind::ConnectionError) => POSTGRES_CONNECTION,
        (ServiceId::Postgresql, ErrorKind::QueryError) => POSTGRES_QUERY,
        _ => NO_GUIDE,
    }
}
