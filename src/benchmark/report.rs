//! Tabular summary of a completed sweep.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::trial::TrialResult;

const RULE_WIDTH: usize = 82;

/// Results of every trial in execution order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<TrialResult>,
}

impl BenchmarkReport {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        results: Vec<TrialResult>,
    ) -> Self {
        Self {
            started_at,
            finished_at,
            results,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Trials in which fewer messages arrived than were requested
    pub fn short_trials(&self) -> impl Iterator<Item = &TrialResult> {
        self.results.iter().filter(|r| r.short)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "========== Benchmark Results ==========")?;
        writeln!(
            f,
            "{:<10} {:<10} {:<10} {:<15} {:<10} {}",
            "Workers", "Messages", "Delay", "Duration", "Processed", "Msgs/s"
        )?;
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;

        for result in &self.results {
            let delay = format!("{}ms", result.config.simulated_delay.as_millis());
            let duration = format!("{:.3?}", result.elapsed);
            write!(
                f,
                "{:<10} {:<10} {:<10} {:<15} {:<10} {:.1}",
                result.config.worker_count,
                result.config.message_count,
                delay,
                duration,
                result.processed,
                result.throughput()
            )?;
            if result.short {
                write!(f, " (short)")?;
            }
            writeln!(f)?;
        }

        write!(f, "{}", "=".repeat(RULE_WIDTH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::TrialConfig;
    use std::time::Duration;

    fn result(workers: usize, processed: usize, short: bool) -> TrialResult {
        TrialResult {
            config: TrialConfig::new(1000, workers, Duration::from_millis(100)),
            elapsed: Duration::from_millis(20_500),
            processed,
            failed: 0,
            short,
            resources: None,
        }
    }

    #[test]
    fn test_table_rows_follow_execution_order() {
        let now = Utc::now();
        let report = BenchmarkReport::new(
            now,
            now,
            vec![result(5, 1000, false), result(10, 990, true)],
        );
        let rendered = report.to_string();
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[0], "========== Benchmark Results ==========");
        assert!(lines[1].starts_with("Workers    Messages   Delay      Duration"));
        assert!(lines[1].ends_with("Msgs/s"));
        assert!(lines[3].starts_with("5          1000       100ms      20.500s"));
        assert!(lines[3].ends_with(" 48.8"));
        assert!(lines[4].contains(" 48.3 (short)"));
        assert!(lines[4].starts_with("10 "));
        assert!(lines[4].ends_with("(short)"));
        assert_eq!(report.short_trials().count(), 1);
    }

    #[test]
    fn test_json_includes_millisecond_fields() {
        let now = Utc::now();
        let report = BenchmarkReport::new(now, now, vec![result(5, 1000, false)]);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["results"][0]["elapsed_ms"], 20_500);
        assert_eq!(json["results"][0]["config"]["delay_ms"], 100);
        assert_eq!(json["results"][0]["config"]["worker_count"], 5);
    }
}
