// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Console output always; per-crate JSON log files with retention when the
//! `file-logging` feature is enabled.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::cli::CrateDebugFlags;

/// Initialize console logging only
///
/// `base_level` applies to every crate without a debug flag.
pub fn init_console_logging(debug_flags: &CrateDebugFlags, base_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(debug_flags.to_filter_string(base_level))
        .map_err(|e| anyhow!("Invalid log filter: {}", e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("Failed to install logger: {}", e))
}

#[cfg(feature = "file-logging")]
pub use file::{init_logging, LoggingGuard};

#[cfg(feature = "file-logging")]
mod file {
    use std::path::{Path, PathBuf};

    use anyhow::{anyhow, Context, Result};
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use tracing_appender::rolling;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer, Registry};

    use crate::cli::CrateDebugFlags;

    const RUN_PREFIX: &str = "run_";
    const RUN_FORMAT: &str = "%Y%m%d_%H%M%S";

    /// Keeps the non-blocking writers alive; logs flush on drop
    pub struct LoggingGuard {
        _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
        log_dir: PathBuf,
    }

    impl LoggingGuard {
        /// Directory of the current run
        pub fn log_dir(&self) -> &Path {
            &self.log_dir
        }
    }

    /// Initialize logging with file output and console output
    ///
    /// Creates a timestamped folder structure:
    /// ```text
    /// <log_dir>/
    ///   └── run_20250101_120000/
    ///       ├── snr-reduction.log
    ///       ├── snr-circuit.log
    ///       └── snr.log (combined)
    /// ```
    pub fn init_logging(
        debug_flags: &CrateDebugFlags,
        base_level: &str,
        log_dir: &Path,
        retention_days: u64,
        retention_runs: usize,
    ) -> Result<LoggingGuard> {
        let timestamp = Utc::now().format(RUN_FORMAT);
        let run_folder = log_dir.join(format!("{}{}", RUN_PREFIX, timestamp));
        std::fs::create_dir_all(&run_folder)
            .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;

        cleanup_old_logs(log_dir, &run_folder, retention_days, retention_runs)?;

        let env_filter = EnvFilter::try_new(debug_flags.to_filter_string(base_level))
            .map_err(|e| anyhow!("Invalid log filter: {}", e))?;

        let mut layers = Vec::new();
        let mut file_guards = Vec::new();

        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter.clone())
            .boxed();
        layers.push(console_layer);

        for crate_name in crate::KNOWN_CRATES {
            let file_appender = rolling::never(&run_folder, format!("{}.log", crate_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            file_guards.push(guard);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(EnvFilter::new(format!("{}=debug", crate_name)))
                .boxed();
            layers.push(file_layer);
        }

        let combined_appender = rolling::never(&run_folder, "snr.log");
        let (combined_non_blocking, combined_guard) =
            tracing_appender::non_blocking(combined_appender);
        file_guards.push(combined_guard);

        let combined_layer = tracing_subscriber::fmt::layer()
            .with_writer(combined_non_blocking)
            .with_target(true)
            .json()
            .with_filter(env_filter)
            .boxed();
        layers.push(combined_layer);

        Registry::default()
            .with(layers)
            .try_init()
            .map_err(|e| anyhow!("Failed to install logger: {}", e))?;

        Ok(LoggingGuard {
            _file_guards: file_guards,
            log_dir: run_folder,
        })
    }

    fn parse_run_timestamp(dir_name: &str) -> Option<DateTime<Utc>> {
        let stamp = dir_name.strip_prefix(RUN_PREFIX)?;
        let naive = NaiveDateTime::parse_from_str(stamp, RUN_FORMAT).ok()?;
        Some(Utc.from_utc_datetime(&naive))
    }

    /// Remove run folders older than `retention_days`, then keep only the
    /// newest `retention_runs`. The current run is never removed.
    pub(crate) fn cleanup_old_logs(
        base_log_dir: &Path,
        current_run: &Path,
        retention_days: u64,
        retention_runs: usize,
    ) -> Result<()> {
        if !base_log_dir.exists() {
            return Ok(());
        }

        let cutoff_date = Utc::now() - chrono::Duration::days(retention_days as i64);

        let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
        for entry in std::fs::read_dir(base_log_dir)? {
            let path = entry?.path();
            if !path.is_dir() || path == current_run {
                continue;
            }
            let stamp = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_run_timestamp);
            if let Some(dt) = stamp {
                runs.push((path, dt));
            }
        }

        // Newest first
        runs.sort_by(|a, b| b.1.cmp(&a.1));

        // Current run occupies one retention slot
        let keep = retention_runs.saturating_sub(1);
        for (position, (path, dt)) in runs.iter().enumerate() {
            if *dt < cutoff_date || position >= keep {
                if let Err(e) = std::fs::remove_dir_all(path) {
                    eprintln!(
                        "Warning: Failed to remove old log directory {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }

        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_retention_keeps_newest_runs() {
            let dir = tempfile::tempdir().unwrap();
            let current = dir.path().join("run_20990101_000000");
            std::fs::create_dir_all(&current).unwrap();
            let recent = Utc::now();
            for minutes in 1..=4 {
                let stamp = (recent - chrono::Duration::minutes(minutes)).format(RUN_FORMAT);
                std::fs::create_dir_all(dir.path().join(format!("run_{}", stamp))).unwrap();
            }
            std::fs::create_dir_all(dir.path().join("run_20000101_000000")).unwrap();

            cleanup_old_logs(dir.path(), &current, 30, 3).unwrap();

            let remaining: Vec<_> = std::fs::read_dir(dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name())
                .collect();
            // current + 2 newest
            assert_eq!(remaining.len(), 3);
            assert!(current.exists());
            assert!(!dir.path().join("run_20000101_000000").exists());
        }
    }
}
