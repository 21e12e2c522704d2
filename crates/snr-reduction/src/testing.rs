// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Test support: synthetic SONATA circuits, a simulator double and a reduction
algorithm that breaks its contract on request.

```text
<tmp>/circuit/
    circuit_config.json
    network/{nodes.json,node_types.csv,edges.json,edge_types.csv}
    components/morphologies/{pyramidal,stellate,axon_only}.swc
    components/biophys/{pyramidal,stellate,axon_only}.json
```

Populations:
- `cortex`: biophysical nodes cycling through the fixture's morphologies
  (`morphology`/`model_template` are type-level attributes), optionally with
  point-neuron members
- `thalamus`: virtual nodes
- `thalamus_to_cortex` and `cortex_to_cortex`: edges into `cortex` whose
  placements are valid segments of each target's original cell

`axon_only` has no dendrites and always fails to reduce.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use snr_circuit::{placement, Column, EdgePopulation, NodePopulation};
use snr_morphology::{
    Biophysics, CableSimulator, Cell, Morphology, SectionOrdering, SectionType, SegmentIndex,
    Simulator, SimulatorResult, SimulatorSession,
};

use crate::adapter::{
    CorrespondenceTable, ReductionAlgorithm, ReductionOptions, ReductionOutput, SynapsePlacement,
};
use crate::cable::EquivalentCableReduction;
use crate::error::ReductionResult;

pub type FixtureResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub const PYRAMIDAL_SWC: &str = "\
# soma, axon, forked basal tree, apical trunk
1 1 -5 0 0 5 -1
2 1 0 0 0 5 1
3 1 5 0 0 5 2
4 2 0 -5 0 0.5 1
5 2 0 -105 0 0.5 4
6 3 5 0 0 1 3
7 3 55 0 0 1 6
8 3 105 30 0 0.6 7
9 3 85 -20 0 0.6 7
10 4 0 5 0 1.5 2
11 4 0 205 0 1.5 10
12 4 0 305 0 1.2 11
";

pub const STELLATE_SWC: &str = "\
# soma and three basal stems, no axon
1 1 0 0 0 8 -1
2 3 4 0 0 1 1
3 3 80 0 0 0.8 2
4 3 -4 0 0 1 1
5 3 -70 10 0 0.8 4
6 3 0 4 0 1 1
7 3 0 60 0 0.8 6
8 3 30 90 0 0.6 7
9 3 -30 95 0 0.6 7
";

pub const AXON_ONLY_SWC: &str = "\
1 1 0 0 0 5 -1
2 2 0 -5 0 0.5 1
3 2 0 -100 0 0.5 2
";

pub const BIOPHYSICS_JSON: &str = r#"{
  "section_lists": {
    "somatic": {"cm": 1.0, "Ra": 100.0, "mechanisms": ["pas", "hh"], "params": {"g_pas": 3e-5, "gnabar_hh": 0.12}},
    "axonal": {"cm": 1.0, "Ra": 100.0, "mechanisms": ["pas"], "params": {"g_pas": 3e-5}},
    "basal": {"cm": 2.0, "Ra": 100.0, "mechanisms": ["pas"], "params": {"g_pas": 6e-5}},
    "apical": {"cm": 2.0, "Ra": 100.0, "mechanisms": ["pas"], "params": {"g_pas": 6e-5}}
  },
  "nseg_rule": {"rule": "max_length", "max_length": 20.0}
}"#;

const MORPHOLOGIES: [(&str, &str); 3] = [
    ("pyramidal", PYRAMIDAL_SWC),
    ("stellate", STELLATE_SWC),
    ("axon_only", AXON_ONLY_SWC),
];

const BIOPHYSICAL_TYPE: i64 = 100;
const VIRTUAL_TYPE: i64 = 200;
const POINT_TYPE: i64 = 300;
const EXCITATORY_EDGE_TYPE: i64 = 1000;
const RECURRENT_EDGE_TYPE: i64 = 1001;

/// Which afferent placement columns the edge populations carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementMode {
    /// section id, segment id, segment offset
    Full,
    /// section id and section position
    Legacy,
    /// `Full` plus efferent placement columns
    FullWithEfferent,
    /// No placement columns at all
    Absent,
    /// Two groups: even rows in group "0" with `Full` columns, odd rows in
    /// group "1" without any placement columns
    SplitGroups,
}

/// Builder for a synthetic circuit
#[derive(Debug, Clone)]
pub struct CircuitFixture {
    cortex_nodes: usize,
    thalamus_nodes: usize,
    edges_per_node: usize,
    morphologies: Vec<String>,
    point_nodes: Vec<u64>,
    placement_mode: PlacementMode,
    section_order: Option<String>,
    removed_morphologies: Vec<String>,
}

impl Default for CircuitFixture {
    fn default() -> Self {
        Self {
            cortex_nodes: 4,
            thalamus_nodes: 3,
            edges_per_node: 5,
            morphologies: vec!["pyramidal".to_string(), "stellate".to_string()],
            point_nodes: Vec::new(),
            placement_mode: PlacementMode::Full,
            section_order: None,
            removed_morphologies: Vec::new(),
        }
    }
}

impl CircuitFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cortex_nodes(mut self, count: usize) -> Self {
        self.cortex_nodes = count;
        self
    }

    pub fn edges_per_node(mut self, count: usize) -> Self {
        self.edges_per_node = count;
        self
    }

    /// Cortex node `i` uses `names[i % names.len()]`
    pub fn morphologies(mut self, names: &[&str]) -> Self {
        self.morphologies = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Cortex nodes modelled as point neurons
    pub fn point_nodes(mut self, ids: &[u64]) -> Self {
        self.point_nodes = ids.to_vec();
        self
    }

    pub fn placement_mode(mut self, mode: PlacementMode) -> Self {
        self.placement_mode = mode;
        self
    }

    pub fn section_order(mut self, order: &str) -> Self {
        self.section_order = Some(order.to_string());
        self
    }

    /// Delete a morphology file after the circuit is written
    pub fn remove_morphology(mut self, name: &str) -> Self {
        self.removed_morphologies.push(name.to_string());
        self
    }

    pub fn build(self) -> FixtureResult<FixtureCircuit> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("circuit");
        let network = root.join("network");
        let morphologies = root.join("components/morphologies");
        let biophys = root.join("components/biophys");
        for d in [&network, &morphologies, &biophys] {
            std::fs::create_dir_all(d)?;
        }

        let mut node_types = String::from("node_type_id model_type morphology model_template\n");
        for (i, (name, swc)) in MORPHOLOGIES.iter().enumerate() {
            std::fs::write(morphologies.join(format!("{}.swc", name)), swc)?;
            std::fs::write(biophys.join(format!("{}.json", name)), BIOPHYSICS_JSON)?;
            node_types.push_str(&format!(
                "{} biophysical {} json:{}\n",
                BIOPHYSICAL_TYPE + i as i64,
                name,
                name
            ));
        }
        node_types.push_str(&format!("{} virtual NONE NONE\n", VIRTUAL_TYPE));
        node_types.push_str(&format!("{} point_neuron NONE NONE\n", POINT_TYPE));
        std::fs::write(network.join("node_types.csv"), node_types)?;
        std::fs::write(
            network.join("edge_types.csv"),
            format!(
                "edge_type_id model_template dynamics_params\n{} exp2syn AMPA_ExcToExc.json\n{} exp2syn GABA_InhToExc.json\n",
                EXCITATORY_EDGE_TYPE, RECURRENT_EDGE_TYPE
            ),
        )?;

        // original segment layout of every cortex node; None when not biophysical
        let mut indices = Vec::with_capacity(self.cortex_nodes);
        let mut cortex_types = Vec::with_capacity(self.cortex_nodes);
        for node in 0..self.cortex_nodes {
            if self.point_nodes.contains(&(node as u64)) {
                cortex_types.push(POINT_TYPE);
                indices.push(None);
                continue;
            }
            let name = &self.morphologies[node % self.morphologies.len()];
            let position = MORPHOLOGIES
                .iter()
                .position(|(m, _)| *m == name.as_str())
                .ok_or_else(|| format!("unknown fixture morphology {}", name))?;
            cortex_types.push(BIOPHYSICAL_TYPE + position as i64);
            indices.push(Some(original_index(MORPHOLOGIES[position].1)?));
        }

        let cortex = NodePopulation::new("cortex", cortex_types)
            .with_column(
                "x",
                Column::Float((0..self.cortex_nodes).map(|i| 10.0 * i as f64).collect()),
            )
            .with_column(
                "ei",
                Column::Text((0..self.cortex_nodes).map(|_| "e".to_string()).collect()),
            );
        let thalamus = NodePopulation::new("thalamus", vec![VIRTUAL_TYPE; self.thalamus_nodes]);
        std::fs::write(
            network.join("nodes.json"),
            serde_json::to_string_pretty(&json!({
                "nodes": {
                    "cortex": serde_json::to_value(&cortex)?,
                    "thalamus": serde_json::to_value(&thalamus)?
                }
            }))?,
        )?;

        let (mut feedforward_sources, mut feedforward_targets) = (Vec::new(), Vec::new());
        let (mut recurrent_sources, mut recurrent_targets) = (Vec::new(), Vec::new());
        for target in 0..self.cortex_nodes as u64 {
            for k in 0..self.edges_per_node as u64 {
                feedforward_sources.push(k % self.thalamus_nodes.max(1) as u64);
                feedforward_targets.push(target);
            }
            if self.cortex_nodes > 1 {
                for _ in 0..2 {
                    recurrent_sources.push((target + 1) % self.cortex_nodes as u64);
                    recurrent_targets.push(target);
                }
            }
        }
        let feedforward = self.edges(
            EdgePopulation::new(
                "thalamus_to_cortex",
                "thalamus",
                "cortex",
                feedforward_sources,
                feedforward_targets,
                EXCITATORY_EDGE_TYPE,
            ),
            &indices,
        );
        let recurrent = self.edges(
            EdgePopulation::new(
                "cortex_to_cortex",
                "cortex",
                "cortex",
                recurrent_sources,
                recurrent_targets,
                RECURRENT_EDGE_TYPE,
            ),
            &indices,
        );
        std::fs::write(
            network.join("edges.json"),
            serde_json::to_string_pretty(&json!({
                "edges": {
                    "thalamus_to_cortex": serde_json::to_value(&feedforward)?,
                    "cortex_to_cortex": serde_json::to_value(&recurrent)?
                }
            }))?,
        )?;

        let mut config = json!({
            "manifest": {
                "$BASE_DIR": ".",
                "$NETWORK_DIR": "$BASE_DIR/network",
                "$COMPONENTS_DIR": "$BASE_DIR/components"
            },
            "components": {
                "morphologies_dir": "$COMPONENTS_DIR/morphologies",
                "biophysical_neuron_models_dir": "$COMPONENTS_DIR/biophys"
            },
            "networks": {
                "nodes": [{
                    "nodes_file": "$NETWORK_DIR/nodes.json",
                    "node_types_file": "$NETWORK_DIR/node_types.csv"
                }],
                "edges": [{
                    "edges_file": "$NETWORK_DIR/edges.json",
                    "edge_types_file": "$NETWORK_DIR/edge_types.csv"
                }]
            }
        });
        if let Some(order) = &self.section_order {
            config["reduction"] = json!({ "section_order": order });
        }
        let config_path = root.join("circuit_config.json");
        std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

        for name in &self.removed_morphologies {
            std::fs::remove_file(morphologies.join(format!("{}.swc", name)))?;
        }

        Ok(FixtureCircuit {
            dir,
            config_path,
        })
    }

    /// Placement columns for `edges`; row `k` targets segment `(7k) mod n` of
    /// its target at offset `(37k mod 100) / 100`
    fn edges(&self, edges: EdgePopulation, indices: &[Option<SegmentIndex>]) -> EdgePopulation {
        let rows = edges.len();
        let mut sections = Vec::with_capacity(rows);
        let mut segments = Vec::with_capacity(rows);
        let mut offsets = Vec::with_capacity(rows);
        let mut positions = Vec::with_capacity(rows);
        for (k, &target) in edges.target_node_ids().iter().enumerate() {
            let offset = ((k * 37) % 100) as f64 / 100.0;
            let located = indices
                .get(target as usize)
                .and_then(Option::as_ref)
                .and_then(|index| {
                    let address = index.segments().nth((k * 7) % index.segment_count())?;
                    let nseg = index.section(address.section)?.nseg;
                    Some((address, nseg))
                });
            let (section, segment, nseg) = match located {
                Some((address, nseg)) => (address.section, address.segment, nseg),
                None => (0, 0, 1),
            };
            sections.push(i64::from(section));
            segments.push(i64::from(segment));
            offsets.push(offset);
            positions.push((f64::from(segment) + offset) / f64::from(nseg));
        }

        let weights = Column::Float((0..rows).map(|k| 1.0 + 0.1 * k as f64).collect());
        let delays = Column::Float(vec![1.5; rows]);
        let edges = edges
            .with_column("syn_weight", weights)
            .with_column("delay", delays);

        let full = |edges: EdgePopulation| {
            edges
                .with_column(placement::AFFERENT_SECTION_ID, Column::Int(sections.clone()))
                .with_column(placement::AFFERENT_SEGMENT_ID, Column::Int(segments.clone()))
                .with_column(placement::AFFERENT_SEGMENT_OFFSET, Column::Float(offsets.clone()))
        };
        match self.placement_mode {
            PlacementMode::Absent => edges,
            PlacementMode::SplitGroups => {
                let even = |values: &[i64]| values.iter().step_by(2).copied().collect::<Vec<_>>();
                let odd_rows = rows / 2;
                edges
                    .with_membership(
                        (0..rows).map(|k| (k % 2) as i64).collect(),
                        (0..rows).map(|k| (k / 2) as i64).collect(),
                    )
                    .with_column("syn_weight", Column::Float(vec![1.0; rows - odd_rows]))
                    .with_column("delay", Column::Float(vec![1.5; rows - odd_rows]))
                    .with_column(placement::AFFERENT_SECTION_ID, Column::Int(even(&sections)))
                    .with_column(placement::AFFERENT_SEGMENT_ID, Column::Int(even(&segments)))
                    .with_column(
                        placement::AFFERENT_SEGMENT_OFFSET,
                        Column::Float(offsets.iter().step_by(2).copied().collect()),
                    )
                    .with_group_column("1", "syn_weight", Column::Float(vec![1.0; odd_rows]))
                    .with_group_column("1", "delay", Column::Float(vec![1.5; odd_rows]))
            }
            PlacementMode::Full => full(edges),
            PlacementMode::Legacy => edges
                .with_column(placement::AFFERENT_SECTION_ID, Column::Int(sections.clone()))
                .with_column(placement::AFFERENT_SECTION_POS, Column::Float(positions.clone())),
            PlacementMode::FullWithEfferent => full(edges)
                .with_column(placement::EFFERENT_SECTION_ID, Column::Int(vec![0; rows]))
                .with_column(placement::EFFERENT_SEGMENT_ID, Column::Int(vec![0; rows]))
                .with_column(
                    placement::EFFERENT_SEGMENT_OFFSET,
                    Column::Float((0..rows).map(|k| (k % 4) as f64 / 4.0).collect()),
                )
                .with_column(
                    placement::EFFERENT_SECTION_POS,
                    Column::Float((0..rows).map(|k| (k % 4) as f64 / 4.0).collect()),
                ),
        }
    }
}

fn original_index(swc: &str) -> FixtureResult<SegmentIndex> {
    let morphology = Morphology::parse_swc(swc)?;
    let biophysics = Biophysics::from_json(BIOPHYSICS_JSON)?;
    let cell = Cell::from_morphology("fixture", &morphology, &biophysics)?;
    Ok(SegmentIndex::build(&cell, SectionOrdering::NrnV1)?)
}

/// A circuit on disk; removed with its temporary directory on drop
#[derive(Debug)]
pub struct FixtureCircuit {
    dir: tempfile::TempDir,
    config_path: PathBuf,
}

impl FixtureCircuit {
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn circuit_dir(&self) -> PathBuf {
        self.dir.path().join("circuit")
    }

    /// A not-yet-existing directory beside the circuit
    pub fn output_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Cable simulator that counts how often it is used
///
/// [`CountingSimulator::non_reentrant`] reports itself as holding process-wide
/// state; [`CountingSimulator::peak_open`] then shows whether sessions ever
/// overlapped.
#[derive(Debug)]
pub struct CountingSimulator {
    inner: CableSimulator,
    reentrant: bool,
    acquired: AtomicUsize,
    instantiated: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    peak_open: Arc<AtomicUsize>,
}

impl Default for CountingSimulator {
    fn default() -> Self {
        Self {
            inner: CableSimulator::new(),
            reentrant: true,
            acquired: AtomicUsize::new(0),
            instantiated: Arc::new(AtomicUsize::new(0)),
            open: Arc::new(AtomicUsize::new(0)),
            peak_open: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CountingSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn non_reentrant() -> Self {
        Self {
            reentrant: false,
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn instantiated(&self) -> usize {
        self.instantiated.load(Ordering::SeqCst)
    }

    /// Most sessions ever open at once
    pub fn peak_open(&self) -> usize {
        self.peak_open.load(Ordering::SeqCst)
    }
}

impl Simulator for CountingSimulator {
    fn name(&self) -> &str {
        "counting"
    }

    fn acquire(&self) -> SimulatorResult<Box<dyn SimulatorSession>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.acquire()?;
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(CountingSession {
            inner,
            instantiated: Arc::clone(&self.instantiated),
            open: Arc::clone(&self.open),
        }))
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant && self.inner.is_reentrant()
    }
}

struct CountingSession {
    inner: Box<dyn SimulatorSession>,
    instantiated: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
}

impl SimulatorSession for CountingSession {
    fn instantiate(&mut self, morphology: &Path, biophysics: &Biophysics) -> SimulatorResult<Cell> {
        self.instantiated.fetch_add(1, Ordering::SeqCst);
        self.inner.instantiate(morphology, biophysics)
    }

    fn hosted(&self) -> Option<&str> {
        self.inner.hosted()
    }

    fn release(&mut self) {
        self.inner.release();
    }
}

impl Drop for CountingSession {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// How [`MisbehavingReduction`] corrupts an otherwise valid reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misbehavior {
    /// Return one placement fewer than given
    DropPlacement,
    /// Return the first placement twice
    DuplicatePlacement,
    /// Shift every axonal point by 1 µm
    AlterAxon,
    /// Leave the first placement's segment out of the table
    OmitTableEntry,
    /// Return the first placement with offset 1.5
    OffsetAboveOne,
}

impl Misbehavior {
    pub const ALL: [Misbehavior; 5] = [
        Misbehavior::DropPlacement,
        Misbehavior::DuplicatePlacement,
        Misbehavior::AlterAxon,
        Misbehavior::OmitTableEntry,
        Misbehavior::OffsetAboveOne,
    ];
}

/// Equivalent-cable reduction that misbehaves on cells of one morphology
/// and reduces every other cell correctly
#[derive(Debug, Clone)]
pub struct MisbehavingReduction {
    inner: EquivalentCableReduction,
    misbehavior: Misbehavior,
    morphology: String,
}

impl MisbehavingReduction {
    pub fn new(misbehavior: Misbehavior, morphology: &str) -> Self {
        Self {
            inner: EquivalentCableReduction::new(),
            misbehavior,
            morphology: morphology.to_string(),
        }
    }
}

impl ReductionAlgorithm for MisbehavingReduction {
    fn name(&self) -> &str {
        "misbehaving"
    }

    fn reduce(
        &self,
        cell: &Cell,
        index: &SegmentIndex,
        placements: &[SynapsePlacement],
        options: &ReductionOptions,
    ) -> ReductionResult<ReductionOutput> {
        let mut output = self.inner.reduce(cell, index, placements, options)?;
        if cell.name() != self.morphology {
            return Ok(output);
        }
        match self.misbehavior {
            Misbehavior::DropPlacement => {
                output.placements.pop();
            }
            Misbehavior::DuplicatePlacement => {
                if let Some(&first) = output.placements.first() {
                    output.placements.push(first);
                }
            }
            Misbehavior::AlterAxon => {
                let mut sections = output.cell.sections().to_vec();
                for section in sections
                    .iter_mut()
                    .filter(|s| s.section_type == SectionType::Axon)
                {
                    for point in &mut section.points {
                        point.x += 1.0;
                    }
                }
                output.cell = Cell::new(output.cell.name(), sections)?;
            }
            Misbehavior::OmitTableEntry => {
                let omitted = placements
                    .first()
                    .map(SynapsePlacement::address)
                    .or_else(|| index.segments().next());
                let mut table =
                    CorrespondenceTable::new(output.table.ordering(), output.table.merge_policy());
                for (address, image) in output.table.entries() {
                    if Some(address) != omitted {
                        table.insert(address, image);
                    }
                }
                output.table = table;
            }
            Misbehavior::OffsetAboveOne => {
                if let Some(first) = output.placements.first_mut() {
                    first.offset = 1.5;
                }
            }
        }
        Ok(output)
    }
}
