// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Run reports and exit statuses.

use std::fmt;

use serde::Serialize;

use crate::node_reducer::NodeStage;

/// Overall outcome of a run, as seen by the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PopulationFailed,
    ValidationFailed,
    SingleNodeFailed,
    /// I/O, configuration and other errors outside the reduction itself
    Error,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Error => 1,
            RunStatus::PopulationFailed => 2,
            RunStatus::ValidationFailed => 3,
            RunStatus::SingleNodeFailed => 4,
        }
    }
}

/// A node that could not be reduced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeFailure {
    pub node_id: u64,
    pub stage: NodeStage,
    pub reason: String,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} at {}: {}", self.node_id, self.stage, self.reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub reduced: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of reducing one population
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulationReport {
    pub population: String,
    /// Reduced node ids, ascending
    pub reduced: Vec<u64>,
    pub skipped: Vec<(u64, String)>,
    pub failed: Vec<NodeFailure>,
}

impl PopulationReport {
    pub fn new(population: impl Into<String>) -> Self {
        Self {
            population: population.into(),
            ..Default::default()
        }
    }

    pub fn counts(&self) -> ReportCounts {
        ReportCounts {
            reduced: self.reduced.len(),
            skipped: self.skipped.len(),
            failed: self.failed.len(),
        }
    }
}

impl fmt::Display for PopulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts();
        write!(
            f,
            "{}: {} reduced, {} skipped, {} failed",
            self.population, counts.reduced, counts.skipped, counts.failed
        )?;
        for failure in &self.failed {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

/// Outcome of reducing every population of a circuit
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkReport {
    pub populations: Vec<PopulationReport>,
    /// Directory the reduced circuit was written to
    pub output_dir: Option<std::path::PathBuf>,
}

impl NetworkReport {
    pub fn counts(&self) -> ReportCounts {
        self.populations.iter().fold(
            ReportCounts {
                reduced: 0,
                skipped: 0,
                failed: 0,
            },
            |acc, p| {
                let c = p.counts();
                ReportCounts {
                    reduced: acc.reduced + c.reduced,
                    skipped: acc.skipped + c.skipped,
                    failed: acc.failed + c.failed,
                }
            },
        )
    }
}

impl fmt::Display for NetworkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, population) in self.populations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", population)?;
        }
        Ok(())
    }
}

/// Terminal state of a single-node run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    Reduced {
        morphology: String,
        sections: usize,
        segments: usize,
        edges_rewritten: usize,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub population: String,
    pub node_id: u64,
    pub status: NodeStatus,
    /// Where the result was written
    pub output: Option<std::path::PathBuf>,
}

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            NodeStatus::Reduced {
                morphology,
                sections,
                segments,
                edges_rewritten,
            } => write!(
                f,
                "{}:{} reduced to {} ({} sections, {} segments), {} edges rewritten",
                self.population, self.node_id, morphology, sections, segments, edges_rewritten
            ),
            NodeStatus::Skipped { reason } => {
                write!(f, "{}:{} skipped: {}", self.population, self.node_id, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        assert_eq!(RunStatus::Error.exit_code(), 1);
        assert_eq!(RunStatus::PopulationFailed.exit_code(), 2);
        assert_eq!(RunStatus::ValidationFailed.exit_code(), 3);
        assert_eq!(RunStatus::SingleNodeFailed.exit_code(), 4);
    }

    #[test]
    fn test_population_counts() {
        let mut report = PopulationReport::new("cortex");
        report.reduced = vec![0, 2];
        report.skipped.push((1, "virtual".to_string()));
        report.failed.push(NodeFailure {
            node_id: 3,
            stage: NodeStage::Reduce,
            reason: "no dendrites".to_string(),
        });
        assert_eq!(
            report.counts(),
            ReportCounts {
                reduced: 2,
                skipped: 1,
                failed: 1
            }
        );
        let text = report.to_string();
        assert!(text.starts_with("cortex: 2 reduced, 1 skipped, 1 failed"));
        assert!(text.contains("node 3 at reduce: no dendrites"));

        let network = NetworkReport {
            populations: vec![report.clone(), report],
            output_dir: None,
        };
        assert_eq!(network.counts().reduced, 4);
    }
}
