//! Application context – holds collaborator trait objects and settings.

use crate::platform::{DockerCli, HickoryDns, PgDatabase, ReqwestHttp};
use crate::settings::Settings;
use crate::traits::*;
use std::sync::Arc;

/// Central context passed to probes, the resolver and the orchestrator.
///
/// Holds `Arc`ed trait objects so callers can swap implementations (real
/// network stack vs test fakes) and so spawned service tasks can share them.
#[derive(Clone)]
pub struct AppContext {
    http: Arc<dyn HttpClient>,
    dns: Arc<dyn DnsResolver>,
    db: Arc<dyn Database>,
    runtime: Arc<dyn ContainerRuntime>,
    annotator: Option<Arc<dyn Annotator>>,
    pub settings: Arc<Settings>,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        http: Arc<dyn HttpClient>,
        dns: Arc<dyn DnsResolver>,
        db: Arc<dyn Database>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            http,
            dns,
            db,
            runtime,
            annotator: None,
            settings: Arc::new(settings),
        }
    }

    /// Create a context backed by the real network, database and container CLI.
    pub fn default_platform(settings: Settings) -> Self {
        let runtime = DockerCli::new(settings.containers.runtime_bin.clone());
        Self::new(
            settings,
            Arc::new(ReqwestHttp::new()),
            Arc::new(HickoryDns),
            Arc::new(PgDatabase),
            Arc::new(runtime),
        )
    }

    /// Attach an external enrichment hook for failure annotations.
    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn http(&self) -> &dyn HttpClient {
        self.http.as_ref()
    }

    pub fn dns(&self) -> &dyn DnsResolver {
        self.dns.as_ref()
    }

    pub fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    pub fn annotator(&self) -> Option<&dyn Annotator> {
        self.annotator.as_deref()
    }
}
