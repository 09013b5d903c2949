//! Terminal tables for run summaries and stored results

use crate::benchmark::TrialResult;
use crate::metrics::{evaluate, EvaluationMetrics};
use crate::scheduler::{CaseState, CaseSummary};
use prettytable::{row, Table};

/// Metrics for one (library, operation, size).
pub struct MetricsRow {
    pub library: String,
    pub operation: String,
    pub size: usize,
    pub metrics: EvaluationMetrics,
    pub truncated: bool,
    /// Trials whose outputs failed the sanity check.
    pub flagged: usize,
    pub peak_memory_bytes: u64,
}

fn flagged(trials: &[TrialResult]) -> usize {
    trials
        .iter()
        .filter(|t| t.error.map_or(false, |e| e.is_error()))
        .count()
}

/// One row per finished size with at least one trial. Trials of a size still
/// being measured are left out until the size completes.
pub fn metrics_rows(states: &[CaseState]) -> Vec<MetricsRow> {
    let mut rows = Vec::new();
    for state in states {
        for size in &state.finished {
            let Ok(metrics) = evaluate(&size.trials) else { continue };
            rows.push(MetricsRow {
                library: state.library.clone(),
                operation: state.operation.to_string(),
                size: size.size,
                metrics,
                truncated: size.truncated,
                flagged: flagged(&size.trials),
                peak_memory_bytes: size.trials.iter().map(|t| t.memory_bytes).max().unwrap_or(0),
            });
        }
    }
    rows
}

pub fn print_metrics(rows: &[MetricsRow]) {
    let mut table = Table::new();
    table.add_row(row![
        "Library",
        "Operation",
        "Size",
        "Mean (ops/s)",
        "Stdev",
        "Min",
        "Median",
        "Max",
        "Samples",
        "Peak Mem (MB)",
        "Errors"
    ]);

    for r in rows {
        let size = if r.truncated {
            format!("{}*", r.size)
        } else {
            r.size.to_string()
        };
        table.add_row(row![
            &r.library,
            &r.operation,
            size,
            format!("{:.3}", r.metrics.mean),
            format!("{:.3}", r.metrics.stdev),
            format!("{:.3}", r.metrics.min),
            format!("{:.3}", r.metrics.median),
            format!("{:.3}", r.metrics.max),
            r.metrics.samples,
            format!("{:.1}", r.peak_memory_bytes as f64 / (1024.0 * 1024.0)),
            r.flagged,
        ]);
    }

    println!();
    table.printstd();
    println!("* fewer blocks than configured");
}

pub fn print_dispositions(summaries: &[CaseSummary]) {
    let mut table = Table::new();
    table.add_row(row!["Library", "Operation", "Disposition", "Blocks Run", "Sizes Done", "Reused"]);
    for s in summaries {
        table.add_row(row![
            &s.library,
            s.operation.name(),
            s.disposition.to_string(),
            s.blocks_run,
            s.sizes_done,
            if s.reused { "yes" } else { "no" },
        ]);
    }
    println!();
    table.printstd();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::ErrorClass;
    use crate::operation::Operation;
    use crate::scheduler::SizeResults;

    fn trial(ops_per_sec: f64, error: Option<ErrorClass>) -> TrialResult {
        TrialResult {
            ops_per_sec,
            repetitions: 1,
            elapsed_nanos: 1,
            memory_bytes: 2048,
            error,
        }
    }

    #[test]
    fn rows_cover_finished_sizes_with_samples() {
        let mut state = CaseState::new("native", Operation::Add);
        state.finished.push(SizeResults {
            size: 10,
            trials: vec![trial(5.0, Some(ErrorClass::NoError)), trial(7.0, Some(ErrorClass::LargeError))],
            truncated: false,
        });
        state.finished.push(SizeResults {
            size: 20,
            trials: Vec::new(),
            truncated: true,
        });
        state.size_index = 2;
        state.current.push(trial(1.0, None));

        let rows = metrics_rows(&[state]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size, 10);
        assert_eq!(rows[0].flagged, 1);
        assert_eq!(rows[0].peak_memory_bytes, 2048);
        assert!(!rows[0].truncated);
    }
}
