// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Node Reducer: the per-node pipeline.

```text
Load -> Instantiate -> Collect -> Reduce -> Remap -> Serialize
```

Every stage works on private copies; the circuit is only read. The outcome
carries everything the orchestrator needs to commit the node later. The
simulator session is acquired in Instantiate and released as soon as the
reduction has produced its result.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use snr_circuit::descriptor::morphology_file_name;
use snr_circuit::{
    placement, AttributeValue, Circuit, CircuitResult, ComponentArtifact, ComponentKind,
    EdgePopulation, ModelTemplate, NodeModel, NodePopulation, PlacementSchema, MODEL_TEMPLATE,
    MORPHOLOGY,
};
use snr_morphology::{Biophysics, SegmentIndex, Simulator};
use tracing::{debug, warn};

use crate::adapter::{ReductionAdapter, ReductionOptions, SynapsePlacement};
use crate::error::NodeError;
use crate::remap::{AfferentEdge, EdgeRemapper, EdgeRewrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStage {
    Load,
    Instantiate,
    Collect,
    Reduce,
    Remap,
    Serialize,
}

impl NodeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStage::Load => "load",
            NodeStage::Instantiate => "instantiate",
            NodeStage::Collect => "collect",
            NodeStage::Reduce => "reduce",
            NodeStage::Remap => "remap",
            NodeStage::Serialize => "serialize",
        }
    }
}

impl fmt::Display for NodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully reduced node, not yet committed
#[derive(Debug, Clone)]
pub struct ReducedNode {
    pub node_id: u64,
    /// Node attributes replaced on commit
    pub attributes: Vec<(&'static str, AttributeValue)>,
    pub edge_rewrites: Vec<EdgeRewrite>,
    pub artifacts: Vec<ComponentArtifact>,
    pub morphology: String,
    pub sections: usize,
    pub segments: usize,
    pub placements: Vec<SynapsePlacement>,
}

#[derive(Debug)]
pub enum NodeOutcome {
    Reduced(Box<ReducedNode>),
    Skipped {
        node_id: u64,
        reason: String,
    },
    Failed {
        node_id: u64,
        stage: NodeStage,
        error: NodeError,
    },
}

impl NodeOutcome {
    pub fn node_id(&self) -> u64 {
        match self {
            NodeOutcome::Reduced(reduced) => reduced.node_id,
            NodeOutcome::Skipped { node_id, .. } | NodeOutcome::Failed { node_id, .. } => *node_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, NodeOutcome::Failed { .. })
    }
}

struct StageError {
    stage: NodeStage,
    error: NodeError,
}

fn at<E: Into<NodeError>>(stage: NodeStage, error: E) -> StageError {
    StageError {
        stage,
        error: error.into(),
    }
}

/// Inputs resolved by the Load stage
struct Loaded {
    morphology: String,
    model_template: ModelTemplate,
    morphology_path: PathBuf,
    biophysics: Biophysics,
}

/// Runs the pipeline for nodes of one population
pub struct NodeReducer<'a> {
    circuit: &'a Circuit,
    population: &'a NodePopulation,
    adapter: &'a ReductionAdapter,
    simulator: &'a dyn Simulator,
    options: &'a ReductionOptions,
    timeout: Option<Duration>,
}

impl<'a> NodeReducer<'a> {
    pub fn new(
        circuit: &'a Circuit,
        population: &str,
        adapter: &'a ReductionAdapter,
        simulator: &'a dyn Simulator,
        options: &'a ReductionOptions,
    ) -> CircuitResult<Self> {
        Ok(Self {
            circuit,
            population: circuit.node_population(population)?,
            adapter,
            simulator,
            options,
            timeout: None,
        })
    }

    /// Per-node wall-clock budget, checked after every stage
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn population(&self) -> &str {
        self.population.name()
    }

    pub fn simulator(&self) -> &dyn Simulator {
        self.simulator
    }

    pub fn reduce(&self, node_id: u64) -> NodeOutcome {
        let started = Instant::now();
        match self.run(node_id, started) {
            Ok(reduced) => {
                debug!(
                    target: "snr-reduction",
                    "[NODE] {}:{} reduced to {} ({} sections, {} segments, {} edges) in {:?}",
                    self.population.name(),
                    node_id,
                    reduced.morphology,
                    reduced.sections,
                    reduced.segments,
                    reduced.edge_rewrites.len(),
                    started.elapsed()
                );
                NodeOutcome::Reduced(Box::new(reduced))
            }
            Err(StageError {
                error: NodeError::Unsupported { model_type },
                ..
            }) => {
                debug!(
                    target: "snr-reduction",
                    "[NODE] {}:{} skipped ({})",
                    self.population.name(),
                    node_id,
                    model_type
                );
                NodeOutcome::Skipped {
                    node_id,
                    reason: format!("model type '{}' is not biophysical", model_type),
                }
            }
            Err(StageError { stage, error }) => {
                warn!(
                    target: "snr-reduction",
                    "[NODE] {}:{} failed at {}: {}",
                    self.population.name(),
                    node_id,
                    stage,
                    error
                );
                NodeOutcome::Failed {
                    node_id,
                    stage,
                    error,
                }
            }
        }
    }

    fn run(&self, node_id: u64, started: Instant) -> Result<ReducedNode, StageError> {
        let loaded = self.load(node_id).map_err(|e| at(NodeStage::Load, e))?;
        self.check_budget(started, NodeStage::Load)?;

        let mut session = self.simulator.acquire().map_err(|e| at(NodeStage::Instantiate, e))?;
        let cell = session
            .instantiate(&loaded.morphology_path, &loaded.biophysics)
            .map_err(|e| at(NodeStage::Instantiate, e))?;
        let index =
            SegmentIndex::build(&cell, self.options.ordering).map_err(|e| at(NodeStage::Instantiate, e))?;
        self.check_budget(started, NodeStage::Instantiate)?;

        let afferent = self.collect(node_id, &index).map_err(|e| at(NodeStage::Collect, e))?;
        let placements: Vec<SynapsePlacement> = afferent.iter().map(|e| e.placement).collect();
        self.check_budget(started, NodeStage::Collect)?;

        let reduced = self
            .adapter
            .reduce(&cell, &index, &placements, self.options)
            .map_err(|e| at(NodeStage::Reduce, e))?;
        session.release();
        drop(session);
        self.check_budget(started, NodeStage::Reduce)?;

        let edge_rewrites = EdgeRemapper::new(&reduced.table, &reduced.index)
            .remap(&afferent)
            .map_err(|e| at(NodeStage::Remap, e))?;
        self.check_budget(started, NodeStage::Remap)?;

        let stem = loaded
            .morphology
            .strip_suffix(".swc")
            .unwrap_or(&loaded.morphology);
        let morphology = format!("{}_{}", stem, node_id);
        let model_template = loaded
            .model_template
            .renamed(format!("{}_{}", loaded.model_template.name, node_id));
        let swc = reduced
            .cell
            .to_morphology()
            .to_swc()
            .map_err(|e| at(NodeStage::Serialize, e))?;
        let biophysics = reduced
            .cell
            .to_biophysics(Some(morphology.clone()))
            .to_json_pretty()
            .map_err(|e| at(NodeStage::Serialize, e))?;
        self.check_budget(started, NodeStage::Serialize)?;

        Ok(ReducedNode {
            node_id,
            attributes: vec![
                (MORPHOLOGY, AttributeValue::Text(morphology.clone())),
                (MODEL_TEMPLATE, AttributeValue::Text(model_template.to_string())),
            ],
            edge_rewrites,
            artifacts: vec![
                ComponentArtifact {
                    kind: ComponentKind::Morphology,
                    file_name: morphology_file_name(&morphology),
                    contents: swc,
                },
                ComponentArtifact {
                    kind: ComponentKind::Biophysics,
                    file_name: model_template.file_name(),
                    contents: biophysics,
                },
            ],
            morphology,
            sections: reduced.index.section_count(),
            segments: reduced.index.segment_count(),
            placements: reduced.placements,
        })
    }

    fn check_budget(&self, started: Instant, stage: NodeStage) -> Result<(), StageError> {
        let Some(budget) = self.timeout else {
            return Ok(());
        };
        let elapsed = started.elapsed();
        if elapsed > budget {
            return Err(StageError {
                stage,
                error: NodeError::Timeout { budget, elapsed },
            });
        }
        Ok(())
    }

    fn load(&self, node_id: u64) -> Result<Loaded, NodeError> {
        let (morphology, model_template) = match self.population.model(node_id)? {
            NodeModel::Biophysical {
                morphology,
                model_template,
            } => (morphology, model_template),
            other => {
                return Err(NodeError::Unsupported {
                    model_type: other.model_type().to_string(),
                })
            }
        };

        let descriptor = self.circuit.descriptor();
        let morphology_path = descriptor
            .morphology_path(&morphology)
            .ok_or_else(|| NodeError::MissingComponent("morphologies_dir".to_string()))?;
        if !morphology_path.is_file() {
            return Err(NodeError::MissingComponent(
                morphology_path.display().to_string(),
            ));
        }
        let biophysics_path = descriptor
            .biophysics_path(&model_template)
            .ok_or_else(|| {
                NodeError::MissingComponent("biophysical_neuron_models_dir".to_string())
            })?;
        if !biophysics_path.is_file() {
            return Err(NodeError::MissingComponent(
                biophysics_path.display().to_string(),
            ));
        }
        let biophysics = Biophysics::load(&biophysics_path)?;

        Ok(Loaded {
            morphology,
            model_template,
            morphology_path,
            biophysics,
        })
    }

    /// Afferent edges of `node_id` in every edge population, resolved
    /// against the original cell
    fn collect(&self, node_id: u64, index: &SegmentIndex) -> Result<Vec<AfferentEdge>, NodeError> {
        let mut afferent = Vec::new();
        for edges in self.circuit.afferent_populations(self.population.name()) {
            let schema = edges.placement_schema();
            let rows = edges.rows_targeting(node_id);
            if let PlacementSchema::Partial { missing } = &schema {
                if let Some(&row) = rows.first() {
                    return Err(NodeError::Placement {
                        population: edges.name().to_string(),
                        row,
                        reason: format!("placement attributes missing: {}", missing.join(", ")),
                    });
                }
            }
            if !schema.requires_remap() {
                continue;
            }
            for row in rows {
                let placement = resolve_placement(edges, row, &schema, index)?;
                afferent.push(AfferentEdge {
                    population: edges.name().to_string(),
                    row,
                    schema: schema.clone(),
                    placement,
                });
            }
        }
        Ok(afferent)
    }
}

fn resolve_placement(
    edges: &EdgePopulation,
    row: usize,
    schema: &PlacementSchema,
    index: &SegmentIndex,
) -> Result<SynapsePlacement, NodeError> {
    let invalid = |reason: String| NodeError::Placement {
        population: edges.name().to_string(),
        row,
        reason,
    };
    let number = |name: &str| -> Result<AttributeValue, NodeError> {
        edges
            .attribute(row, name)?
            .ok_or_else(|| invalid(format!("no {}", name)))
    };

    let raw_section = number(placement::AFFERENT_SECTION_ID)?;
    let section_id = raw_section
        .as_i64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid(format!("section id {}", raw_section)))?;
    let section = index.section(section_id).ok_or_else(|| {
        invalid(format!(
            "section {} out of range ({} sections)",
            section_id,
            index.section_count()
        ))
    })?;

    match schema {
        PlacementSchema::Full { .. } => {
            let raw_segment = number(placement::AFFERENT_SEGMENT_ID)?;
            let segment = raw_segment
                .as_i64()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|&s| s < section.nseg)
                .ok_or_else(|| {
                    invalid(format!(
                        "segment {} out of range for section {} ({} segments)",
                        raw_segment, section_id, section.nseg
                    ))
                })?;
            let offset = number(placement::AFFERENT_SEGMENT_OFFSET)?
                .as_f64()
                .filter(|o| o.is_finite() && (0.0..=1.0).contains(o))
                .ok_or_else(|| invalid("segment offset outside [0, 1]".to_string()))?;
            Ok(SynapsePlacement::new(section_id, segment, offset))
        }
        _ => {
            let pos = number(placement::AFFERENT_SECTION_POS)?
                .as_f64()
                .filter(|p| p.is_finite() && (0.0..=1.0).contains(p))
                .ok_or_else(|| invalid("section position outside [0, 1]".to_string()))?;
            Ok(SynapsePlacement::from_section_pos(section_id, pos, section.nseg))
        }
    }
}
