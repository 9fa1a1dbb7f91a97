//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use crate::state::AppState;

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_job_metrics(state, &mut output).await;
    collect_stream_metrics(state, &mut output);

    output
}

/// Collect job metrics by status.
async fn collect_job_metrics(state: &Arc<AppState>, output: &mut String) {
    let counts = state.registry.counts().await;

    writeln!(
        output,
        "# HELP foodmap_jobs_total Number of submitted jobs by status"
    )
    .ok();
    writeln!(output, "# TYPE foodmap_jobs_total gauge").ok();
    for (status, count) in [
        ("pending", counts.pending),
        ("running", counts.running),
        ("completed", counts.completed),
        ("failed", counts.failed),
    ] {
        writeln!(output, "foodmap_jobs_total{{status=\"{status}\"}} {count}").ok();
    }
}

fn collect_stream_metrics(state: &Arc<AppState>, output: &mut String) {
    let active = state.multiplexer.active_streams();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP foodmap_streams_active Number of open event streams"
    )
    .ok();
    writeln!(output, "# TYPE foodmap_streams_active gauge").ok();
    writeln!(output, "foodmap_streams_active {active}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let state = AppState::new(Config::default()).unwrap();
        let output = collect_metrics(&state).await;

        assert!(output.contains("# TYPE foodmap_jobs_total gauge"));
        assert!(output.contains("foodmap_jobs_total{status=\"pending\"} 0"));
        assert!(output.contains("foodmap_jobs_total{status=\"failed\"} 0"));
        assert!(output.contains("foodmap_streams_active 0"));
    }

    #[tokio::test]
    async fn test_active_streams_counted() {
        let state = AppState::new(Config::default()).unwrap();
        let (_sink, _stream) = state.multiplexer.open();
        let output = collect_metrics(&state).await;
        assert!(output.contains("foodmap_streams_active 1"));
    }
}
