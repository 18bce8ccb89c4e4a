//! Prometheus metrics HTTP server.
//!
//! Exposes keyer statistics in Prometheus text format via HTTP endpoint.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::stats::KeyerStats;

/// Start the Prometheus metrics HTTP server.
///
/// Serves metrics at `/metrics` until the task is dropped.
/// Returns an error if the server fails to bind to the port.
pub async fn start_metrics_server(
    port: u16,
    stats: Arc<KeyerStats>,
) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = TcpListener::bind(addr).await?;
    info!("Prometheus metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, router(stats))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}

fn router(stats: Arc<KeyerStats>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(stats)
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(stats): State<Arc<KeyerStats>>) -> impl IntoResponse {
    let output = format_prometheus_metrics(&stats);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

/// Append one metric with its help and type lines.
fn push_metric(
    output: &mut String,
    name: &str,
    kind: &str,
    help: &str,
    value: impl std::fmt::Display,
) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
    let _ = writeln!(output, "{} {}", name, value);
}

/// Format statistics as Prometheus text format.
fn format_prometheus_metrics(stats: &KeyerStats) -> String {
    let summary = stats.summary();
    let mut output = String::with_capacity(2048);

    push_metric(
        &mut output,
        "cwkeyer_uptime_seconds",
        "gauge",
        "Time since the keyer started",
        format_args!("{:.3}", summary.elapsed_secs),
    );
    push_metric(
        &mut output,
        "cwkeyer_datagrams_total",
        "counter",
        "Datagrams received",
        summary.datagrams,
    );
    push_metric(
        &mut output,
        "cwkeyer_bytes_received_total",
        "counter",
        "Payload bytes received",
        summary.bytes_received,
    );
    push_metric(
        &mut output,
        "cwkeyer_empty_datagrams_total",
        "counter",
        "Zero-length datagrams ignored",
        summary.empty_datagrams,
    );
    push_metric(
        &mut output,
        "cwkeyer_control_messages_total",
        "counter",
        "Control (ESC) messages received",
        summary.control_messages,
    );
    push_metric(
        &mut output,
        "cwkeyer_unknown_directives_total",
        "counter",
        "Control messages with an unsupported directive",
        summary.unknown_directives,
    );
    push_metric(
        &mut output,
        "cwkeyer_aborts_total",
        "counter",
        "Abort directives handled",
        summary.aborts,
    );
    push_metric(
        &mut output,
        "cwkeyer_characters_keyed_total",
        "counter",
        "Characters sent to the keyer",
        summary.characters_keyed,
    );
    push_metric(
        &mut output,
        "cwkeyer_unencodable_total",
        "counter",
        "Characters without a Morse code",
        summary.unencodable,
    );
    push_metric(
        &mut output,
        "cwkeyer_units_written_total",
        "counter",
        "Units written to the keyer device",
        summary.units_written,
    );
    push_metric(
        &mut output,
        "cwkeyer_resets_total",
        "counter",
        "Messages cut short by a reset character",
        summary.resets,
    );
    push_metric(
        &mut output,
        "cwkeyer_rig_commands_total",
        "counter",
        "Rig-control commands run",
        summary.rig_commands,
    );
    push_metric(
        &mut output,
        "cwkeyer_rig_failures_total",
        "counter",
        "Rig-control commands that failed",
        summary.rig_failures,
    );

    if let Some(ref keying) = summary.keying_percentiles {
        output.push_str("# HELP cwkeyer_keying_millis Time to key one message in milliseconds\n");
        output.push_str("# TYPE cwkeyer_keying_millis summary\n");
        let _ = writeln!(output, "cwkeyer_keying_millis{{quantile=\"0.5\"}} {}", keying.p50);
        let _ = writeln!(output, "cwkeyer_keying_millis{{quantile=\"0.9\"}} {}", keying.p90);
        let _ = writeln!(output, "cwkeyer_keying_millis{{quantile=\"0.99\"}} {}", keying.p99);
    }

    output
}
