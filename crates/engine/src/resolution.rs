//! Auto-resolution – bounded, dependency-aware container restarts.
//!
//! One [`AutoResolver`] lives for the whole process and is shared by every
//! service task. It owns the attempt counter, so the cap holds across runs
//! made by the same process and resets only when the process restarts.

use crate::context::AppContext;
use crate::settings::ContainerNaming;
use crate::traits::{ContainerRuntime, TransportError};
use crate::types::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Maximum resolution attempts per (service, error kind) per process.
pub const MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Static tables
// ---------------------------------------------------------------------------

/// Which (error kind, severity) pairs may be fixed by a restart.
#[derive(Debug, Clone)]
pub struct EligibilityTable {
    allowed: HashMap<ErrorKind, Vec<Severity>>,
}

impl EligibilityTable {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ErrorKind, S)>,
        S: IntoIterator<Item = Severity>,
    {
        Self {
            allowed: entries
                .into_iter()
                .map(|(kind, sevs)| (kind, sevs.into_iter().collect()))
                .collect(),
        }
    }

    pub fn allows(&self, kind: ErrorKind, severity: Severity) -> bool {
        self.allowed
            .get(&kind)
            .is_some_and(|sevs| sevs.contains(&severity))
    }
}

impl Default for EligibilityTable {
    fn default() -> Self {
        Self::from_entries([
            (ErrorKind::ConnectionError, [Severity::Moderate]),
            (ErrorKind::ServiceUnavailable, [Severity::Moderate]),
        ])
    }
}

/// Services restarted after their upstream recovers from a critical failure.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    dependents: HashMap<ServiceId, Vec<ServiceId>>,
}

impl DependencyGraph {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ServiceId, Vec<ServiceId>)>,
    {
        Self {
            dependents: entries.into_iter().collect(),
        }
    }

    pub fn dependents(&self, service: ServiceId) -> &[ServiceId] {
        self.dependents
            .get(&service)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::from_entries([
            (ServiceId::Traefik, vec![ServiceId::Nginx]),
            (ServiceId::Bind9, vec![ServiceId::Pihole]),
            (ServiceId::Postgresql, vec![]),
        ])
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct AutoResolver {
    runtime: Arc<dyn ContainerRuntime>,
    naming: ContainerNaming,
    restart_timeout: Duration,
    eligibility: EligibilityTable,
    dependencies: DependencyGraph,
    attempts: Mutex<HashMap<(ServiceId, ErrorKind), u32>>,
    /// One lock per service so restarts of the same container never overlap.
    restart_locks: HashMap<ServiceId, tokio::sync::Mutex<()>>,
}

impl AutoResolver {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        naming: ContainerNaming,
        restart_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            naming,
            restart_timeout,
            eligibility: EligibilityTable::default(),
            dependencies: DependencyGraph::default(),
            attempts: Mutex::new(HashMap::new()),
            restart_locks: ServiceId::ALL
                .into_iter()
                .map(|id| (id, tokio::sync::Mutex::new(())))
                .collect(),
        }
    }

    pub fn from_context(ctx: &AppContext) -> Self {
        Self::new(
            ctx.runtime(),
            ctx.settings.containers.clone(),
            ctx.settings.resolution.restart_timeout(),
        )
    }

    pub fn with_eligibility(mut self, table: EligibilityTable) -> Self {
        self.eligibility = table;
        self
    }

    pub fn with_dependencies(mut self, graph: DependencyGraph) -> Self {
        self.dependencies = graph;
        self
    }

    pub fn is_eligible(&self, error: &TestError) -> bool {
        self.eligibility
            .allows(error.error_kind(), error.severity())
    }

    /// Attempts made so far for `(service, kind)`.
    pub fn attempts(&self, service: ServiceId, kind: ErrorKind) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(service, kind))
            .copied()
            .unwrap_or(0)
    }

    /// Check the cap and count the attempt in one critical section.
    fn reserve_attempt(&self, key: (ServiceId, ErrorKind)) -> Option<u32> {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = attempts.entry(key).or_insert(0);
        if *count >= MAX_ATTEMPTS {
            return None;
        }
        *count += 1;
        Some(*count)
    }

    /// `true` iff the service was restarted successfully.
    pub async fn resolve(&self, error: &TestError) -> bool {
        self.attempt(error).await == Disposition::Resolved
    }

    /// Run the eligibility, cap, restart and cascade steps for one failure.
    pub async fn attempt(&self, error: &TestError) -> Disposition {
        let service = error.service();
        let kind = error.error_kind();

        if !self.is_eligible(error) {
            tracing::debug!(
                service = %service,
                kind = %kind,
                severity = %error.severity(),
                "not eligible for auto-resolution"
            );
            return Disposition::Ineligible;
        }

        let attempt = match self.reserve_attempt((service, kind)) {
            Some(n) => n,
            None => {
                tracing::warn!(
                    service = %service,
                    kind = %kind,
                    max_attempts = MAX_ATTEMPTS,
                    "maximum auto-resolution attempts reached"
                );
                return Disposition::Exhausted;
            }
        };

        tracing::info!(
            service = %service,
            kind = %kind,
            attempt,
            max_attempts = MAX_ATTEMPTS,
            "attempting automatic resolution"
        );

        if !self.restart(service).await {
            return Disposition::RestartFailed;
        }

        if error.severity() == Severity::Critical {
            self.cascade(service).await;
        }
        Disposition::Resolved
    }

    /// Best-effort restart of every declared dependent.
    async fn cascade(&self, service: ServiceId) {
        for &dependent in self.dependencies.dependents(service) {
            if !self.restart(dependent).await {
                tracing::warn!(
                    service = %service,
                    dependent = %dependent,
                    "dependent restart failed"
                );
            }
        }
    }

    async fn restart(&self, service: ServiceId) -> bool {
        let name = self.naming.container_name(service);
        let _guard = match self.restart_locks.get(&service) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let restarted = tokio::time::timeout(self.restart_timeout, async {
            let handle = self.runtime.get(&name).await?;
            self.runtime.restart(&handle).await
        })
        .await
        .unwrap_or(Err(TransportError::Timeout(self.restart_timeout)));

        match restarted {
            Ok(()) => {
                tracing::info!(service = %service, container = %name, "container restarted");
                true
            }
            Err(e) => {
                tracing::error!(
                    service = %service,
                    container = %name,
                    error = %e,
                    "failed to restart container"
                );
                false
            }
        }
    }
}
