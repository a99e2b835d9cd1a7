//! Prometheus-compatible metrics exporter for teamtrust
//!
//! Endpoint: GET /metrics (on the web port, default 8080)

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::rep::engine::RepEngine;

/// Global counters, atomically updated from request handling
pub struct MetricsCounters {
    /// Total HTTP requests served
    pub http_requests_total: AtomicU64,
    /// Graph export requests
    pub graph_requests: AtomicU64,
    /// Per-user reputation requests
    pub reputation_requests: AtomicU64,
    /// Trust vector requests
    pub trust_requests: AtomicU64,
    /// Lobby ranking requests
    pub lobby_rank_requests: AtomicU64,
    /// Invite suggestion requests
    pub invite_requests: AtomicU64,
    /// 404 responses
    pub not_found_total: AtomicU64,
    /// 403 responses
    pub forbidden_total: AtomicU64,
    /// Trust vector computations performed
    pub trust_computations: AtomicU64,
    /// Iterations used by the most recent computation
    pub trust_iterations_last: AtomicU64,
    /// Computations that hit max_iter without reaching tolerance
    pub convergence_warnings: AtomicU64,
    /// Successful snapshot reloads
    pub snapshot_reloads: AtomicU64,
    /// Failed snapshot reloads
    pub snapshot_reload_failures: AtomicU64,
    /// Server start time
    pub start_time: Instant,
}

impl MetricsCounters {
    pub fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            graph_requests: AtomicU64::new(0),
            reputation_requests: AtomicU64::new(0),
            trust_requests: AtomicU64::new(0),
            lobby_rank_requests: AtomicU64::new(0),
            invite_requests: AtomicU64::new(0),
            not_found_total: AtomicU64::new(0),
            forbidden_total: AtomicU64::new(0),
            trust_computations: AtomicU64::new(0),
            trust_iterations_last: AtomicU64::new(0),
            convergence_warnings: AtomicU64::new(0),
            snapshot_reloads: AtomicU64::new(0),
            snapshot_reload_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

/// Generate Prometheus-format metrics text
pub fn render_metrics(engine: &Arc<RepEngine>) -> String {
    let mut out = String::with_capacity(4096);
    let c = &engine.metrics;

    let uptime = c.start_time.elapsed().as_secs_f64();
    write_help_type(&mut out, "teamtrust_up", "Whether the reputation service is up.", "gauge");
    writeln!(out, "teamtrust_up 1").ok();

    write_help_type(&mut out, "teamtrust_uptime_seconds_total", "Uptime since service boot in seconds.", "counter");
    writeln!(out, "teamtrust_uptime_seconds_total {:.3}", uptime).ok();

    write_help_type(&mut out, "teamtrust_http_requests_total", "Total number of HTTP requests served.", "counter");
    writeln!(out, "teamtrust_http_requests_total {}", c.http_requests_total.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "teamtrust_requests_total", "Total requests by endpoint kind.", "counter");
    for (kind, counter) in [
        ("graph", &c.graph_requests),
        ("reputation", &c.reputation_requests),
        ("trust", &c.trust_requests),
        ("lobbies", &c.lobby_rank_requests),
        ("invites", &c.invite_requests),
    ] {
        writeln!(out, "teamtrust_requests_total{{kind=\"{}\"}} {}", kind, counter.load(Ordering::Relaxed)).ok();
    }

    write_help_type(&mut out, "teamtrust_responses_total", "Error responses by status.", "counter");
    writeln!(out, "teamtrust_responses_total{{status=\"404\"}} {}", c.not_found_total.load(Ordering::Relaxed)).ok();
    writeln!(out, "teamtrust_responses_total{{status=\"403\"}} {}", c.forbidden_total.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "teamtrust_trust_computations_total", "Total trust vector computations.", "counter");
    writeln!(out, "teamtrust_trust_computations_total {}", c.trust_computations.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "teamtrust_trust_iterations_last", "Iterations used by the most recent trust computation.", "gauge");
    writeln!(out, "teamtrust_trust_iterations_last {}", c.trust_iterations_last.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "teamtrust_convergence_warnings_total", "Trust computations that hit the iteration ceiling.", "counter");
    writeln!(out, "teamtrust_convergence_warnings_total {}", c.convergence_warnings.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "teamtrust_snapshot_reloads_total", "Successful store snapshot reloads.", "counter");
    writeln!(out, "teamtrust_snapshot_reloads_total {}", c.snapshot_reloads.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "teamtrust_snapshot_reload_failures_total", "Failed store snapshot reloads.", "counter");
    writeln!(out, "teamtrust_snapshot_reload_failures_total {}", c.snapshot_reload_failures.load(Ordering::Relaxed)).ok();

    // Store gauges from the current snapshot
    let store_stats = engine.store.get_stats();
    write_help_type(&mut out, "teamtrust_store_generation", "Generation counter of the live snapshot.", "gauge");
    writeln!(out, "teamtrust_store_generation {}", store_stats["generation"].as_u64().unwrap_or(0)).ok();

    write_help_type(&mut out, "teamtrust_store_rows", "Row counts in the live snapshot by table.", "gauge");
    for table in ["users", "lobbies", "teams", "team_members", "ratings", "join_requests", "invitations"] {
        writeln!(out, "teamtrust_store_rows{{table=\"{}\"}} {}", table, store_stats[table].as_u64().unwrap_or(0)).ok();
    }

    write_help_type(&mut out, "teamtrust_build_info", "teamtrust build information.", "gauge");
    writeln!(out, "teamtrust_build_info{{version=\"{}\"}} 1", env!("CARGO_PKG_VERSION")).ok();

    out
}

fn write_help_type(out: &mut String, name: &str, help: &str, metric_type: &str) {
    writeln!(out, "# HELP {} {}", name, help).ok();
    writeln!(out, "# TYPE {} {}", name, metric_type).ok();
}
