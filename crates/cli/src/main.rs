//! `netmonctl` – run the netmon health checks from the command line.
//!
//! Stdout carries only the report (human or JSON); logs go to stderr.
//! Exit status: 0 healthy, 1 failures recorded, 2 setup error.

mod config;
mod logging;

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::classify::severity_for;
use engine::types::*;
use engine::{AppContext, Orchestrator, Settings};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

// ===========================================================================
// CLI definition
// ===========================================================================

#[derive(Parser)]
#[command(
    name = "netmonctl",
    version,
    about = "Health checks and bounded self-healing for the netmon service stack"
)]
struct Cli {
    /// Replace the shipped netmon_config.yaml with this file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every configured service, auto-resolve what is eligible, report.
    Run {
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
        /// Write the report JSON to this path.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Detect and report only; never restart containers.
        #[arg(long)]
        no_resolve: bool,
    },

    /// Probe a single service without attempting resolution.
    Probe {
        /// traefik | bind9 | nginx | pihole | postgresql
        service: ServiceId,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the troubleshooting guide for a service and error kind.
    Guide {
        service: ServiceId,
        /// e.g. connection_error, ssl_error, resolution_error
        error_kind: ErrorKind,
    },
}

// ===========================================================================
// Main
// ===========================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Guide {
            service,
            error_kind,
        } => {
            println!("{}", engine::guides::guide(service, error_kind));
            Ok(0)
        }
        Commands::Run {
            json,
            out,
            no_resolve,
        } => {
            let mut settings = load_settings(cli.config.as_deref())?;
            if no_resolve {
                settings.resolution.enabled = false;
            }
            cmd_run(AppContext::default_platform(settings), json, out.as_deref()).await
        }
        Commands::Probe { service, json } => {
            let settings = load_settings(cli.config.as_deref())?;
            cmd_probe(AppContext::default_platform(settings), service, json).await
        }
    }
}

/// Load configuration and start logging; only commands that touch the
/// network need either.
fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let config = config::load_config(path)?;
    logging::init_logging(&config.logging);
    tracing::debug!(
        services = config.settings.services.len(),
        extended = config.settings.probes.extended_checks,
        "configuration loaded"
    );
    Ok(config.settings)
}

// ===========================================================================
// Subcommand implementations
// ===========================================================================

async fn cmd_run(ctx: AppContext, json: bool, out: Option<&Path>) -> anyhow::Result<i32> {
    let report = Orchestrator::new(ctx)
        .run()
        .await
        .context("health run could not start")?;

    if let Some(path) = out {
        if let Err(e) = write_report_file(path, &report) {
            eprintln!("warning: {:#}", e);
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(report.exit_code())
}

async fn cmd_probe(ctx: AppContext, service: ServiceId, json: bool) -> anyhow::Result<i32> {
    let outcomes = Orchestrator::new(ctx).probe_service(service).await;
    let healthy = outcomes.iter().all(ProbeOutcome::passed);

    if json {
        let rows: Vec<_> = outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "result": o.result,
                    "error_kind": o.failure.as_ref().map(|f| f.kind),
                    "severity": o.failure.as_ref().map(|f| severity_for(service, f.kind)),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for o in &outcomes {
            println!("{}", render_result(&o.result));
            if let Some(f) = &o.failure {
                println!("    {} ({})", f.kind, severity_for(service, f.kind));
            }
        }
    }
    Ok(if healthy { 0 } else { 1 })
}

// ===========================================================================
// Output helpers
// ===========================================================================

fn status_label(status: ProbeStatus) -> &'static str {
    match status {
        ProbeStatus::Pass => "PASS",
        ProbeStatus::Fail => "FAIL",
        ProbeStatus::NotEvaluated => "SKIP",
    }
}

fn render_result(r: &ProbeResult) -> String {
    format!(
        "[{}] {} {}: {}",
        status_label(r.status),
        r.service,
        r.test_name,
        r.message
    )
}

fn render_report(report: &Report) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "run_id: {}", report.run_id);
    for r in &report.results {
        let _ = writeln!(s, "{}", render_result(r));
    }

    if !report.errors.is_empty() {
        let _ = writeln!(s, "\nIncidents:");
    }
    for incident in &report.incidents {
        let _ = writeln!(
            s,
            "  {} {} ({}): {:?} after {} attempt(s)",
            incident.service,
            incident.error_kind,
            severity_for(incident.service, incident.error_kind),
            incident.disposition,
            incident.attempts
        );
        if let Some(verified) = incident.verified {
            let _ = writeln!(s, "    recovered after restart: {}", verified);
        }
        if let Some(annotation) = &incident.annotation {
            let _ = writeln!(s, "    note: {}", annotation);
        }
        if let Some(guide) = &incident.guide {
            for line in guide.lines() {
                let _ = writeln!(s, "    {}", line);
            }
        }
    }
    let pending = report.errors.len().saturating_sub(report.incidents.len());
    if pending > 0 {
        let _ = writeln!(
            s,
            "  {} failure(s) still being resolved when the run deadline expired",
            pending
        );
    }

    if !report.not_evaluated.is_empty() {
        let names: Vec<_> = report.not_evaluated.iter().map(|s| s.as_str()).collect();
        let _ = writeln!(s, "\nNot evaluated: {}", names.join(", "));
    }

    let _ = writeln!(
        s,
        "\n{} probe(s), {} error(s), {} service(s) not evaluated",
        report.results.len(),
        report.error_count,
        report.not_evaluated.len()
    );
    s
}

fn write_report_file(path: &Path, report: &Report) -> anyhow::Result<()> {
    let j = serde_json::to_string_pretty(report).context("failed to serialise report")?;
    std::fs::write(path, j)
        .with_context(|| format!("failed to write report to {}", path.display()))
}
