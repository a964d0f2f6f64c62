//! Orchestrator – runs every service pipeline and aggregates the report.
//!
//! Each service gets its own task: probe, classify, attempt resolution,
//! attach guidance. Tasks run under a bounded semaphore and the whole run is
//! capped by a deadline. Probe results stream back as they complete, so a
//! failure seen before the deadline is always reported; only probes that
//! never ran are marked not evaluated.

use crate::classify::classify;
use crate::context::AppContext;
use crate::guides;
use crate::probes;
use crate::resolution::AutoResolver;
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{timeout, timeout_at, Instant};

/// Problems that prevent a run from starting at all.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no services configured")]
    NoServices,
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// What a service task reports back, as soon as each step completes.
#[derive(Debug)]
enum ServiceEvent {
    /// A probe finished; its failure, if any, is already classified.
    Probed {
        result: ProbeResult,
        error: Option<TestError>,
    },
    /// Resolution and guidance for the most recent failure.
    Incident(Incident),
    Finished,
}

/// Everything one service contributed before the deadline.
#[derive(Debug, Default)]
struct ServiceOutcome {
    results: Vec<ProbeResult>,
    errors: Vec<TestError>,
    incidents: Vec<Incident>,
}

type EventSender = mpsc::UnboundedSender<(usize, ServiceEvent)>;

#[derive(Clone)]
pub struct Orchestrator {
    ctx: AppContext,
    resolver: Arc<AutoResolver>,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        let resolver = Arc::new(AutoResolver::from_context(&ctx));
        Self { ctx, resolver }
    }

    /// Share one resolver (and so one attempt counter) across orchestrators.
    pub fn with_resolver(ctx: AppContext, resolver: Arc<AutoResolver>) -> Self {
        Self { ctx, resolver }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn resolver(&self) -> &AutoResolver {
        &self.resolver
    }

    /// Run one service's probes without classification or resolution.
    pub async fn probe_service(&self, service: ServiceId) -> Vec<ProbeOutcome> {
        let mut outcomes = Vec::new();
        for &probe in service.probes(self.ctx.settings.probes.extended_checks) {
            outcomes.push(probes::run_probe(probe, &self.ctx).await);
        }
        outcomes
    }

    /// Execute a full pass over the configured services.
    pub async fn run(&self) -> Result<Report, EngineError> {
        let settings = &self.ctx.settings;
        settings.validate()?;

        let services = settings.ordered_services();
        let run_id = new_run_id();
        let started_at = Utc::now();
        let deadline = Instant::now() + settings.orchestrator.run_deadline();
        let semaphore = Arc::new(Semaphore::new(settings.orchestrator.max_concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ServiceEvent)>();

        tracing::info!(run_id = %run_id, services = services.len(), "starting health run");

        let mut launched = 0;
        for (index, &service) in services.iter().enumerate() {
            let permit = match timeout_at(deadline, Arc::clone(&semaphore).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                _ => {
                    tracing::warn!(
                        run_id = %run_id,
                        service = %service,
                        "run deadline reached before service started"
                    );
                    break;
                }
            };

            let this = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                this.run_service(index, service, &tx).await;
                drop(permit);
                let _ = tx.send((index, ServiceEvent::Finished));
            });
            launched += 1;
        }
        drop(tx);

        let mut slots: Vec<ServiceOutcome> =
            services.iter().map(|_| ServiceOutcome::default()).collect();
        let mut finished = 0;
        while finished < launched {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((index, event))) => {
                    let slot = &mut slots[index];
                    match event {
                        ServiceEvent::Probed { result, error } => {
                            slot.results.push(result);
                            slot.errors.extend(error);
                        }
                        ServiceEvent::Incident(incident) => slot.incidents.push(incident),
                        ServiceEvent::Finished => finished += 1,
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        run_id = %run_id,
                        pending = launched - finished,
                        "run deadline reached; reporting probes completed so far"
                    );
                    break;
                }
            }
        }
        // Late senders now fail and log their outcome instead.
        drop(rx);

        let extended = settings.probes.extended_checks;
        let mut report = Report {
            run_id,
            started_at,
            finished_at: started_at,
            results: Vec::new(),
            errors: Vec::new(),
            incidents: Vec::new(),
            not_evaluated: Vec::new(),
            error_count: 0,
        };
        for (service, slot) in services.into_iter().zip(slots) {
            let declared = service.probes(extended);
            let completed = slot.results.len();
            report.results.extend(slot.results);
            report.errors.extend(slot.errors);
            report.incidents.extend(slot.incidents);
            if completed < declared.len() {
                report
                    .results
                    .extend(declared[completed..].iter().map(|&p| not_evaluated(p)));
                report.not_evaluated.push(service);
            }
        }
        report.error_count = report.errors.len();
        report.finished_at = Utc::now();

        tracing::info!(
            run_id = %report.run_id,
            errors = report.error_count,
            not_evaluated = report.not_evaluated.len(),
            "health run complete"
        );
        Ok(report)
    }

    async fn run_service(&self, index: usize, service: ServiceId, tx: &EventSender) {
        for &probe in service.probes(self.ctx.settings.probes.extended_checks) {
            // The run is over once the receiver is gone; launch nothing new.
            if tx.is_closed() {
                tracing::warn!(
                    service = %service,
                    probe = %probe,
                    "skipping probe after the run deadline"
                );
                break;
            }

            let outcome = probes::run_probe(probe, &self.ctx).await;
            let error = outcome.failure.map(|f| classify(service, f));
            let event = ServiceEvent::Probed {
                result: outcome.result,
                error: error.clone(),
            };
            if tx.send((index, event)).is_err() {
                tracing::warn!(
                    service = %service,
                    probe = %probe,
                    failed = error.is_some(),
                    "probe finished after the run deadline; result not reported"
                );
            }

            if let Some(error) = error {
                let incident = self.handle_failure(probe, &error).await;
                let disposition = incident.disposition;
                if tx.send((index, ServiceEvent::Incident(incident))).is_err() {
                    tracing::warn!(
                        service = %service,
                        kind = %error.error_kind(),
                        disposition = ?disposition,
                        "resolution finished after the run deadline; outcome not reported"
                    );
                }
            }
        }
    }

    /// Drive one failure from detection to a terminal state.
    async fn handle_failure(&self, probe: ProbeKind, error: &TestError) -> Incident {
        let service = error.service();
        let kind = error.error_kind();
        let settings = &self.ctx.settings;
        let resolution = &settings.resolution;

        let disposition = if resolution.enabled {
            self.resolver.attempt(error).await
        } else {
            Disposition::Ineligible
        };

        let guide = if disposition == Disposition::Resolved {
            None
        } else {
            tracing::info!(
                service = %service,
                kind = %kind,
                disposition = ?disposition,
                "emitting troubleshooting guide"
            );
            Some(guides::guide(service, kind).to_string())
        };

        let annotation = match self.ctx.annotator() {
            Some(annotator) => {
                let limit = settings.probes.timeout();
                timeout(limit, annotator.annotate(kind, error.message()))
                    .await
                    .unwrap_or_else(|_| {
                        tracing::warn!(
                            service = %service,
                            kind = %kind,
                            timeout_ms = limit.as_millis() as u64,
                            "annotation hook timed out"
                        );
                        None
                    })
            }
            None => None,
        };

        let verified = if disposition == Disposition::Resolved && resolution.verify_after_resolve {
            tokio::time::sleep(resolution.verify_delay()).await;
            let recheck = probes::run_probe(probe, &self.ctx).await;
            tracing::info!(
                service = %service,
                probe = %probe,
                recovered = recheck.passed(),
                "post-restart verification"
            );
            Some(recheck.passed())
        } else {
            None
        };

        Incident {
            service,
            error_kind: kind,
            test_name: probe.as_str().to_string(),
            disposition,
            attempts: self.resolver.attempts(service, kind),
            guide,
            annotation,
            verified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::*;
    use crate::resolution::EligibilityTable;
    use crate::settings::Settings;
    use std::net::Ipv4Addr;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Stack {
        http: Arc<FakeHttp>,
        dns: Arc<FakeDns>,
        db: Arc<FakeDb>,
        runtime: Arc<FakeRuntime>,
    }

    impl Stack {
        /// Fakes scripted so every default probe passes.
        fn healthy(settings: &Settings) -> Self {
            let http = Arc::new(FakeHttp::default());
            http.respond(
                &settings.proxy.redirect_url,
                301,
                &[("Location", "https://www.terrerov.com/")],
            );
            http.respond(&settings.proxy.https_url, 200, &[]);
            http.respond(&settings.proxy.dashboard_url, 200, &[]);
            http.respond(&settings.internal_web.url, 200, &[]);
            http.respond(&settings.external_dns.admin_url, 200, &[]);

            let dns = Arc::new(FakeDns::default());
            dns.a_records(&settings.internal_dns.hostname, &[Ipv4Addr::new(172, 20, 0, 2)]);
            dns.a_records(&settings.external_dns.hostname, &[Ipv4Addr::new(142, 250, 1, 1)]);
            dns.ptr_records(settings.internal_dns.reverse_ip, &["ns.terrerov.com."]);

            Self {
                http,
                dns,
                db: Arc::new(FakeDb::default()),
                runtime: Arc::new(FakeRuntime::default()),
            }
        }

        fn context(&self, settings: Settings) -> AppContext {
            AppContext::new(
                settings,
                self.http.clone(),
                self.dns.clone(),
                self.db.clone(),
                self.runtime.clone(),
            )
        }
    }

    fn test_settings() -> Settings {
        let mut s = Settings::default();
        s.resolution.verify_delay_ms = 0;
        s
    }

    #[tokio::test]
    async fn test_healthy_run_reports_every_probe_in_order() {
        let settings = test_settings();
        let stack = Stack::healthy(&settings);
        let orch = Orchestrator::new(stack.context(settings));

        let report = orch.run().await.unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(report.exit_code(), 0);
        let names: Vec<_> = report.results.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(
            names,
            [
                "http_redirect",
                "https_access",
                "internal_resolution",
                "internal_access",
                "external_resolution",
                "connection"
            ]
        );
        assert!(report.results.iter().all(|r| r.status == ProbeStatus::Pass));
        assert!(report.not_evaluated.is_empty());
        assert!(stack.runtime.restarted().is_empty());
    }

    #[tokio::test]
    async fn test_extended_checks_add_probes() {
        let mut settings = test_settings();
        settings.probes.extended_checks = true;
        let stack = Stack::healthy(&settings);
        let orch = Orchestrator::new(stack.context(settings));

        let report = orch.run().await.unwrap();
        assert_eq!(report.results.len(), 9);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_resolved_and_ineligible_failures_both_recorded() {
        let settings = test_settings();
        let stack = Stack::healthy(&settings);
        // nginx: service_unavailable (Moderate, eligible)
        stack.http.respond(&settings.internal_web.url, 503, &[]);
        // bind9: empty answer, resolution_error (Critical, not eligible)
        stack.dns.a_records(&settings.internal_dns.hostname, &[]);
        let orch = Orchestrator::new(stack.context(settings));

        let report = orch.run().await.unwrap();
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.error_count, 2);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.errors[0].service(), ServiceId::Bind9);
        assert_eq!(report.errors[0].severity(), Severity::Critical);
        assert_eq!(report.errors[1].service(), ServiceId::Nginx);

        let bind9 = &report.incidents[0];
        assert_eq!(bind9.disposition, Disposition::Ineligible);
        assert_eq!(bind9.attempts, 0);
        assert_eq!(
            bind9.guide.as_deref(),
            Some(guides::guide(ServiceId::Bind9, ErrorKind::ResolutionError))
        );

        let nginx = &report.incidents[1];
        assert_eq!(nginx.disposition, Disposition::Resolved);
        assert_eq!(nginx.attempts, 1);
        assert!(nginx.guide.is_none());
        // The fake server still answers 503 after the restart.
        assert_eq!(nginx.verified, Some(false));

        assert_eq!(stack.runtime.restarted(), vec!["terrerov_net_nginx_1"]);
        assert_eq!(report.unresolved().count(), 1);
    }

    #[tokio::test]
    async fn test_fourth_failure_emits_guide_instead_of_restart() {
        let mut settings = test_settings();
        settings.resolution.verify_after_resolve = false;
        settings.services = vec![ServiceId::Nginx];
        let stack = Stack::healthy(&settings);
        stack.http.fail(&settings.internal_web.url, Fault::Connect);
        let orch = Orchestrator::new(stack.context(settings));

        for n in 1..=3 {
            let report = orch.run().await.unwrap();
            let incident = &report.incidents[0];
            assert_eq!(incident.error_kind, ErrorKind::ConnectionError);
            assert_eq!(incident.disposition, Disposition::Resolved);
            assert_eq!(incident.attempts, n);
            assert!(incident.verified.is_none());
        }

        let report = orch.run().await.unwrap();
        let incident = &report.incidents[0];
        assert_eq!(incident.disposition, Disposition::Exhausted);
        assert_eq!(incident.attempts, 3);
        assert!(incident.guide.is_some());
        assert_eq!(stack.runtime.restarted().len(), 3);
    }

    #[tokio::test]
    async fn test_resolution_disabled_never_restarts() {
        let mut settings = test_settings();
        settings.resolution.enabled = false;
        let stack = Stack::healthy(&settings);
        stack.http.respond(&settings.internal_web.url, 503, &[]);
        let orch = Orchestrator::new(stack.context(settings));

        let report = orch.run().await.unwrap();
        assert_eq!(report.incidents[0].disposition, Disposition::Ineligible);
        assert!(report.incidents[0].guide.is_some());
        assert!(stack.runtime.restarted().is_empty());
    }

    #[tokio::test]
    async fn test_annotator_text_lands_on_incident() {
        let settings = test_settings();
        let stack = Stack::healthy(&settings);
        stack.db.set(DbScript::Scalar(0));
        let ctx = stack.context(settings).with_annotator(Arc::new(EchoAnnotator));
        let orch = Orchestrator::new(ctx);

        let report = orch.run().await.unwrap();
        let incident = &report.incidents[0];
        assert_eq!(incident.service, ServiceId::Postgresql);
        assert_eq!(incident.error_kind, ErrorKind::QueryError);
        assert!(incident
            .annotation
            .as_deref()
            .is_some_and(|a| a.starts_with("query_error: ")));
    }

    #[tokio::test]
    async fn test_deadline_keeps_failures_seen_before_it() {
        let mut settings = test_settings();
        settings.orchestrator.run_deadline_ms = 200;
        let stack = Stack::healthy(&settings);
        stack.http.fail(&settings.internal_web.url, Fault::Connect);
        // The restart outlives the deadline.
        stack.runtime.set_delay(Duration::from_secs(5));
        let orch = Orchestrator::new(stack.context(settings));

        let report = orch.run().await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].service(), ServiceId::Nginx);
        assert_eq!(report.errors[0].error_kind(), ErrorKind::ConnectionError);
        assert_eq!(report.exit_code(), 1);

        let nginx: Vec<_> = report
            .results
            .iter()
            .filter(|r| r.service == ServiceId::Nginx)
            .collect();
        assert_eq!(nginx.len(), 1);
        assert_eq!(nginx[0].status, ProbeStatus::Fail);
        // The pending restart is logged, not reported.
        assert!(report.incidents.is_empty());
        assert!(report.not_evaluated.is_empty());
        assert_eq!(report.results.len(), 6);
    }

    #[tokio::test]
    async fn test_deadline_marks_only_checks_that_never_ran() {
        let mut settings = test_settings();
        settings.orchestrator.run_deadline_ms = 200;
        let stack = Stack::healthy(&settings);
        stack.http.fail(&settings.proxy.redirect_url, Fault::Connect);
        stack.runtime.set_delay(Duration::from_secs(5));
        let ctx = stack.context(settings);
        let resolver = AutoResolver::from_context(&ctx).with_eligibility(
            EligibilityTable::from_entries([(ErrorKind::ConnectionError, [Severity::Critical])]),
        );
        let orch = Orchestrator::with_resolver(ctx, Arc::new(resolver));

        let report = orch.run().await.unwrap();
        assert_eq!(report.not_evaluated, vec![ServiceId::Traefik]);
        let traefik: Vec<_> = report
            .results
            .iter()
            .filter(|r| r.service == ServiceId::Traefik)
            .map(|r| (r.test_name.as_str(), r.status))
            .collect();
        assert_eq!(
            traefik,
            [
                ("http_redirect", ProbeStatus::Fail),
                ("https_access", ProbeStatus::NotEvaluated)
            ]
        );
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].severity(), Severity::Critical);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_worker_runs_services_one_at_a_time() {
        let mut settings = test_settings();
        settings.orchestrator.max_concurrency = 1;
        settings.services = vec![ServiceId::Traefik, ServiceId::Nginx];
        let stack = Stack::healthy(&settings);
        for url in [
            &settings.proxy.redirect_url,
            &settings.proxy.https_url,
            &settings.internal_web.url,
        ] {
            stack.http.slow(url, Duration::from_millis(50));
        }
        let orch = Orchestrator::new(stack.context(settings));

        let report = orch.run().await.unwrap();
        assert_eq!(report.exit_code(), 0);
        assert_eq!(stack.http.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_pool_runs_services_in_parallel() {
        let mut settings = test_settings();
        settings.orchestrator.max_concurrency = 2;
        settings.services = vec![ServiceId::Traefik, ServiceId::Nginx];
        let stack = Stack::healthy(&settings);
        stack.http.slow(&settings.proxy.redirect_url, Duration::from_millis(200));
        stack.http.slow(&settings.internal_web.url, Duration::from_millis(200));
        let orch = Orchestrator::new(stack.context(settings));

        let report = orch.run().await.unwrap();
        assert_eq!(report.exit_code(), 0);
        assert_eq!(stack.http.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_service_does_not_hold_back_others() {
        let mut settings = test_settings();
        settings.orchestrator.max_concurrency = 2;
        settings.orchestrator.run_deadline_ms = 300;
        settings.services = vec![ServiceId::Traefik, ServiceId::Nginx];
        let stack = Stack::healthy(&settings);
        stack.http.slow(&settings.proxy.redirect_url, Duration::from_secs(5));
        let orch = Orchestrator::new(stack.context(settings));

        let report = orch.run().await.unwrap();
        let nginx = report
            .results
            .iter()
            .find(|r| r.service == ServiceId::Nginx)
            .unwrap();
        assert_eq!(nginx.status, ProbeStatus::Pass);
        assert_eq!(report.not_evaluated, vec![ServiceId::Traefik]);
        assert!(report.errors.is_empty());
    }

    struct StalledAnnotator;

    #[async_trait::async_trait]
    impl crate::traits::Annotator for StalledAnnotator {
        async fn annotate(&self, _kind: ErrorKind, _message: &str) -> Option<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Some("too late".to_string())
        }
    }

    #[tokio::test]
    async fn test_stalled_annotator_times_out() {
        let mut settings = test_settings();
        settings.probes.timeout_ms = 50;
        settings.services = vec![ServiceId::Postgresql];
        let stack = Stack::healthy(&settings);
        stack.db.set(DbScript::Scalar(0));
        let ctx = stack.context(settings).with_annotator(Arc::new(StalledAnnotator));
        let orch = Orchestrator::new(ctx);

        let report = tokio::time::timeout(Duration::from_secs(2), orch.run())
            .await
            .expect("run should not wait on the annotator")
            .unwrap();
        assert_eq!(report.incidents.len(), 1);
        assert!(report.incidents[0].annotation.is_none());
        assert!(report.incidents[0].guide.is_some());
    }

    #[tokio::test]
    async fn test_empty_service_list_is_fatal() {
        let mut settings = test_settings();
        settings.services.clear();
        let stack = Stack::healthy(&settings);
        let orch = Orchestrator::new(stack.context(settings));

        assert!(matches!(orch.run().await, Err(EngineError::NoServices)));
    }

    #[tokio::test]
    async fn test_probe_service_skips_resolution() {
        let settings = test_settings();
        let stack = Stack::healthy(&settings);
        stack.http.fail(&settings.proxy.https_url, Fault::Tls);
        let orch = Orchestrator::new(stack.context(settings));

        let outcomes = orch.probe_service(ServiceId::Traefik).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].passed());
        assert_eq!(
            outcomes[1].failure.as_ref().map(|f| f.kind),
            Some(ErrorKind::SslError)
        );
        assert!(stack.runtime.restarted().is_empty());
    }

    #[tokio::test]
    async fn test_shared_resolver_keeps_counter_across_orchestrators() {
        let mut settings = test_settings();
        settings.services = vec![ServiceId::Nginx];
        settings.resolution.verify_after_resolve = false;
        let stack = Stack::healthy(&settings);
        stack.http.respond(&settings.internal_web.url, 500, &[]);
        let ctx = stack.context(settings);
        let resolver = Arc::new(AutoResolver::from_context(&ctx));

        for _ in 0..2 {
            Orchestrator::with_resolver(ctx.clone(), Arc::clone(&resolver))
                .run()
                .await
                .unwrap();
        }
        assert_eq!(
            resolver.attempts(ServiceId::Nginx, ErrorKind::ServiceUnavailable),
            2
        );
    }
}
