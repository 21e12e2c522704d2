// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Node and edge populations.

Populations mirror the SONATA instance layout: per-row type ids plus group
membership, and one attribute group per group id holding a column for each
group-level attribute. An attribute defined by the group overrides the value
its type assigns.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::column::{AttributeValue, Column};
use crate::error::{CircuitError, CircuitResult};
use crate::types::TypeTable;

pub const MODEL_TYPE: &str = "model_type";
pub const MORPHOLOGY: &str = "morphology";
pub const MODEL_TEMPLATE: &str = "model_template";

/// Edge placement attribute names
pub mod placement {
    pub const AFFERENT_SECTION_ID: &str = "afferent_section_id";
    pub const AFFERENT_SEGMENT_ID: &str = "afferent_segment_id";
    pub const AFFERENT_SEGMENT_OFFSET: &str = "afferent_segment_offset";
    /// Pre-0.0.8 section-relative position
    pub const AFFERENT_SECTION_POS: &str = "afferent_section_pos";

    pub const EFFERENT_SECTION_ID: &str = "efferent_section_id";
    pub const EFFERENT_SEGMENT_ID: &str = "efferent_segment_id";
    pub const EFFERENT_SEGMENT_OFFSET: &str = "efferent_segment_offset";
    pub const EFFERENT_SECTION_POS: &str = "efferent_section_pos";

    pub const AFFERENT: [&str; 4] = [
        AFFERENT_SECTION_ID,
        AFFERENT_SEGMENT_ID,
        AFFERENT_SEGMENT_OFFSET,
        AFFERENT_SECTION_POS,
    ];
}

const DEFAULT_GROUP: &str = "0";

/// Attributes held by one population group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeGroup {
    #[serde(default)]
    pub columns: BTreeMap<String, Column>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dynamics_params: BTreeMap<String, Column>,
}

impl AttributeGroup {
    fn size(&self) -> Option<usize> {
        self.columns
            .values()
            .chain(self.dynamics_params.values())
            .map(Column::len)
            .next()
    }
}

/// `<format>:<name>`, resolved as `<name>.<format>` in the biophysics directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTemplate {
    pub format: String,
    pub name: String,
}

impl ModelTemplate {
    pub fn parse(text: &str) -> CircuitResult<Self> {
        match text.split_once(':') {
            Some((format, name)) if !format.is_empty() && !name.is_empty() => Ok(Self {
                format: format.to_string(),
                name: name.to_string(),
            }),
            _ => Err(CircuitError::InvalidModelTemplate(text.to_string())),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.format)
    }

    /// Same format, renamed
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            format: self.format.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ModelTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.format, self.name)
    }
}

/// What a node is simulated as. Only biophysical nodes carry the morphology
/// and parameter references a reduction needs.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeModel {
    Biophysical {
        morphology: String,
        model_template: ModelTemplate,
    },
    Virtual,
    PointNeuron,
    SingleCompartment,
    Other(String),
}

impl NodeModel {
    pub fn is_biophysical(&self) -> bool {
        matches!(self, NodeModel::Biophysical { .. })
    }

    pub fn model_type(&self) -> &str {
        match self {
            NodeModel::Biophysical { .. } => "biophysical",
            NodeModel::Virtual => "virtual",
            NodeModel::PointNeuron => "point_neuron",
            NodeModel::SingleCompartment => "single_compartment",
            NodeModel::Other(other) => other,
        }
    }
}

/// Group id and index of `row`. Empty membership vectors put every row in
/// group "0" at its own index.
fn locate(group_ids: &[i64], group_indices: &[i64], row: usize) -> (String, usize) {
    let group = group_ids
        .get(row)
        .map(|g| g.to_string())
        .unwrap_or_else(|| DEFAULT_GROUP.to_string());
    let index = group_indices
        .get(row)
        .map(|&i| i.max(0) as usize)
        .unwrap_or(row);
    (group, index)
}

fn check_membership(
    population: &str,
    rows: usize,
    group_ids: &[i64],
    group_indices: &[i64],
    groups: &BTreeMap<String, AttributeGroup>,
) -> Result<(), String> {
    if group_ids.len() != group_indices.len() {
        return Err(format!(
            "'{}': {} group ids but {} group indices",
            population,
            group_ids.len(),
            group_indices.len()
        ));
    }
    if !group_ids.is_empty() && group_ids.len() != rows {
        return Err(format!(
            "'{}': {} rows but {} group ids",
            population,
            rows,
            group_ids.len()
        ));
    }
    for (name, group) in groups {
        let sizes: Vec<usize> = group
            .columns
            .values()
            .chain(group.dynamics_params.values())
            .map(Column::len)
            .collect();
        if sizes.windows(2).any(|w| w[0] != w[1]) {
            return Err(format!("'{}' group {}: columns differ in length", population, name));
        }
    }
    for row in 0..rows {
        let (group, index) = locate(group_ids, group_indices, row);
        match groups.get(&group) {
            Some(g) => {
                if let Some(size) = g.size() {
                    if index >= size {
                        return Err(format!(
                            "'{}' row {}: index {} beyond group {} ({} rows)",
                            population, row, index, group, size
                        ));
                    }
                }
            }
            None if groups.is_empty() => {}
            None => {
                return Err(format!("'{}' row {}: unknown group {}", population, row, group));
            }
        }
    }
    Ok(())
}

/// Shared attribute resolution for node and edge populations
trait Rows {
    fn population_name(&self) -> &str;
    fn row_count(&self) -> usize;
    fn type_id_of(&self, row: usize) -> i64;
    fn membership(&self) -> (&[i64], &[i64]);
    fn groups(&self) -> &BTreeMap<String, AttributeGroup>;
    fn groups_mut(&mut self) -> &mut BTreeMap<String, AttributeGroup>;
    fn type_table(&self) -> &TypeTable;

    fn check_row(&self, row: usize) -> CircuitResult<()> {
        if row < self.row_count() {
            Ok(())
        } else {
            Err(CircuitError::RowOutOfRange {
                population: self.population_name().to_string(),
                row,
            })
        }
    }

    fn location(&self, row: usize) -> CircuitResult<(String, usize)> {
        self.check_row(row)?;
        let (ids, indices) = self.membership();
        Ok(locate(ids, indices, row))
    }

    fn resolve(&self, row: usize, name: &str) -> CircuitResult<Option<AttributeValue>> {
        let (group, index) = self.location(row)?;
        if let Some(value) = self
            .groups()
            .get(&group)
            .and_then(|g| g.columns.get(name))
            .and_then(|c| c.get(index))
        {
            return Ok(Some(value));
        }
        Ok(self
            .type_table()
            .attribute(self.type_id_of(row), name)
            .cloned())
    }

    fn resolve_all(&self, row: usize) -> CircuitResult<BTreeMap<String, AttributeValue>> {
        let (group, index) = self.location(row)?;
        let mut out = BTreeMap::new();
        let type_id = self.type_id_of(row);
        for column in self.type_table().columns() {
            if let Some(value) = self.type_table().attribute(type_id, column) {
                out.insert(column.clone(), value.clone());
            }
        }
        if let Some(g) = self.groups().get(&group) {
            for (name, column) in &g.columns {
                if let Some(value) = column.get(index) {
                    out.insert(name.clone(), value);
                }
            }
            for (name, column) in &g.dynamics_params {
                if let Some(value) = column.get(index) {
                    out.insert(format!("dynamics_params/{}", name), value);
                }
            }
        }
        Ok(out)
    }

    /// Whether every row can resolve `name` through its group or its type table
    fn defines(&self, name: &str) -> bool {
        if self.type_table().has_column(name) {
            return true;
        }
        let groups = self.groups();
        !groups.is_empty() && groups.values().all(|g| g.columns.contains_key(name))
    }

    /// Whether any row's group or the type table carries `name`
    fn mentions(&self, name: &str) -> bool {
        self.type_table().has_column(name)
            || self.groups().values().any(|g| g.columns.contains_key(name))
    }

    fn store(&mut self, row: usize, name: &str, value: AttributeValue) -> CircuitResult<()> {
        let (group, index) = self.location(row)?;
        let population = self.population_name().to_string();
        let has_column = self
            .groups()
            .get(&group)
            .map(|g| g.columns.contains_key(name))
            .unwrap_or(false);
        if !has_column {
            self.promote(&group, name)?;
        }
        let column = self
            .groups_mut()
            .get_mut(&group)
            .and_then(|g| g.columns.get_mut(name))
            .ok_or_else(|| CircuitError::MissingGroup {
                population: population.clone(),
                group: group.clone(),
            })?;
        column
            .set(index, value)
            .map_err(|reason| CircuitError::IncompatibleColumn {
                population,
                attribute: name.to_string(),
                reason,
            })
    }

    /// Turn a type-level attribute into a group column holding every member's
    /// current value, so no other row changes.
    fn promote(&mut self, group: &str, name: &str) -> CircuitResult<()> {
        let population = self.population_name().to_string();
        let members: Vec<(usize, usize)> = (0..self.row_count())
            .filter_map(|row| {
                let (ids, indices) = self.membership();
                let (g, index) = locate(ids, indices, row);
                (g == group).then_some((row, index))
            })
            .collect();
        let size = self
            .groups()
            .get(group)
            .and_then(AttributeGroup::size)
            .unwrap_or_else(|| members.iter().map(|(_, i)| i + 1).max().unwrap_or(0));

        let mut values: Vec<Option<AttributeValue>> = vec![None; size];
        for (row, index) in members {
            if index < size {
                values[index] = self
                    .type_table()
                    .attribute(self.type_id_of(row), name)
                    .cloned();
            }
        }
        let values: Option<Vec<AttributeValue>> = values.into_iter().collect();
        let values = values.ok_or_else(|| CircuitError::IncompatibleColumn {
            population: population.clone(),
            attribute: name.to_string(),
            reason: format!("not defined for every member of group {}", group),
        })?;
        let column = Column::from_values(values).map_err(|reason| {
            CircuitError::IncompatibleColumn {
                population: population.clone(),
                attribute: name.to_string(),
                reason,
            }
        })?;
        self.groups_mut()
            .entry(group.to_string())
            .or_default()
            .columns
            .insert(name.to_string(), column);
        tracing::debug!(
            target: "snr-circuit",
            "Promoted type attribute '{}' to a column of {} group {}",
            name,
            population,
            group
        );
        Ok(())
    }
}

/// A node population; node ids are row numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePopulation {
    #[serde(skip)]
    name: String,
    pub(crate) node_type_id: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) node_group_id: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) node_group_index: Vec<i64>,
    #[serde(default)]
    pub(crate) groups: BTreeMap<String, AttributeGroup>,
    #[serde(skip)]
    types: TypeTable,
}

impl Rows for NodePopulation {
    fn population_name(&self) -> &str {
        &self.name
    }
    fn row_count(&self) -> usize {
        self.node_type_id.len()
    }
    fn type_id_of(&self, row: usize) -> i64 {
        self.node_type_id[row]
    }
    fn membership(&self) -> (&[i64], &[i64]) {
        (&self.node_group_id, &self.node_group_index)
    }
    fn groups(&self) -> &BTreeMap<String, AttributeGroup> {
        &self.groups
    }
    fn groups_mut(&mut self) -> &mut BTreeMap<String, AttributeGroup> {
        &mut self.groups
    }
    fn type_table(&self) -> &TypeTable {
        &self.types
    }
}

impl NodePopulation {
    /// A single-group population with the given type per node
    pub fn new(name: impl Into<String>, node_type_id: Vec<i64>) -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(DEFAULT_GROUP.to_string(), AttributeGroup::default());
        Self {
            name: name.into(),
            node_type_id,
            node_group_id: Vec::new(),
            node_group_index: Vec::new(),
            groups,
            types: TypeTable::empty("node_type_id"),
        }
    }

    /// Add a column to group "0"
    pub fn with_column(mut self, name: &str, column: Column) -> Self {
        self.groups
            .entry(DEFAULT_GROUP.to_string())
            .or_default()
            .columns
            .insert(name.to_string(), column);
        self
    }

    pub fn with_types(mut self, types: TypeTable) -> Self {
        self.types = types;
        self
    }

    pub(crate) fn from_parts(
        name: &str,
        node_type_id: Vec<i64>,
        node_group_id: Vec<i64>,
        node_group_index: Vec<i64>,
        groups: BTreeMap<String, AttributeGroup>,
    ) -> Self {
        Self {
            name: name.to_string(),
            node_type_id,
            node_group_id,
            node_group_index,
            groups,
            types: TypeTable::empty("node_type_id"),
        }
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.node_type_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_type_id.is_empty()
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn node_ids(&self) -> impl Iterator<Item = u64> {
        0..self.len() as u64
    }

    pub fn check_membership(&self) -> Result<(), String> {
        check_membership(
            &self.name,
            self.len(),
            &self.node_group_id,
            &self.node_group_index,
            &self.groups,
        )
    }

    fn row(&self, node_id: u64) -> CircuitResult<usize> {
        let row = node_id as usize;
        if row < self.len() {
            Ok(row)
        } else {
            Err(CircuitError::NodeOutOfRange {
                population: self.name.clone(),
                node_id,
                size: self.len(),
            })
        }
    }

    pub fn node_type_id(&self, node_id: u64) -> CircuitResult<i64> {
        Ok(self.node_type_id[self.row(node_id)?])
    }

    pub fn attribute(&self, node_id: u64, name: &str) -> CircuitResult<Option<AttributeValue>> {
        self.resolve(self.row(node_id)?, name)
    }

    /// Every attribute of the node, type defaults overlaid by group values
    pub fn attributes(&self, node_id: u64) -> CircuitResult<BTreeMap<String, AttributeValue>> {
        self.resolve_all(self.row(node_id)?)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.defines(name)
    }

    pub fn set_attribute(
        &mut self,
        node_id: u64,
        name: &str,
        value: AttributeValue,
    ) -> CircuitResult<()> {
        let row = self.row(node_id)?;
        self.store(row, name, value)
    }

    fn required_text(&self, node_id: u64, name: &str) -> CircuitResult<String> {
        self.attribute(node_id, name)?
            .map(|v| v.to_string())
            .ok_or_else(|| CircuitError::MissingAttribute {
                population: self.name.clone(),
                row: node_id as usize,
                attribute: name.to_string(),
            })
    }

    /// Model of the node, decided once from its `model_type`
    pub fn model(&self, node_id: u64) -> CircuitResult<NodeModel> {
        let model_type = self.required_text(node_id, MODEL_TYPE)?;
        Ok(match model_type.as_str() {
            "biophysical" => NodeModel::Biophysical {
                morphology: self.required_text(node_id, MORPHOLOGY)?,
                model_template: ModelTemplate::parse(
                    &self.required_text(node_id, MODEL_TEMPLATE)?,
                )?,
            },
            "virtual" => NodeModel::Virtual,
            "point_neuron" | "point_process" => NodeModel::PointNeuron,
            "single_compartment" => NodeModel::SingleCompartment,
            other => NodeModel::Other(other.to_string()),
        })
    }
}

/// How an edge population records afferent placements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementSchema {
    /// section id, segment id and segment offset
    Full { has_section_pos: bool },
    /// section id and section-relative position only
    Legacy,
    /// No afferent placement attributes; nothing to remap
    Absent,
    /// Some but not all of a schema's attributes
    Partial { missing: Vec<&'static str> },
}

impl PlacementSchema {
    pub fn requires_remap(&self) -> bool {
        matches!(self, PlacementSchema::Full { .. } | PlacementSchema::Legacy)
    }
}

/// An edge population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgePopulation {
    #[serde(skip)]
    name: String,
    pub(crate) source_population: String,
    pub(crate) target_population: String,
    pub(crate) source_node_id: Vec<u64>,
    pub(crate) target_node_id: Vec<u64>,
    pub(crate) edge_type_id: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) edge_group_id: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) edge_group_index: Vec<i64>,
    #[serde(default)]
    pub(crate) groups: BTreeMap<String, AttributeGroup>,
    #[serde(skip)]
    types: TypeTable,
}

impl Rows for EdgePopulation {
    fn population_name(&self) -> &str {
        &self.name
    }
    fn row_count(&self) -> usize {
        self.target_node_id.len()
    }
    fn type_id_of(&self, row: usize) -> i64 {
        self.edge_type_id[row]
    }
    fn membership(&self) -> (&[i64], &[i64]) {
        (&self.edge_group_id, &self.edge_group_index)
    }
    fn groups(&self) -> &BTreeMap<String, AttributeGroup> {
        &self.groups
    }
    fn groups_mut(&mut self) -> &mut BTreeMap<String, AttributeGroup> {
        &mut self.groups
    }
    fn type_table(&self) -> &TypeTable {
        &self.types
    }
}

impl EdgePopulation {
    /// A single-group population; all rows get `edge_type_id`
    pub fn new(
        name: impl Into<String>,
        source_population: impl Into<String>,
        target_population: impl Into<String>,
        source_node_id: Vec<u64>,
        target_node_id: Vec<u64>,
        edge_type_id: i64,
    ) -> Self {
        let rows = target_node_id.len();
        let mut groups = BTreeMap::new();
        groups.insert(DEFAULT_GROUP.to_string(), AttributeGroup::default());
        Self {
            name: name.into(),
            source_population: source_population.into(),
            target_population: target_population.into(),
            source_node_id,
            target_node_id,
            edge_type_id: vec![edge_type_id; rows],
            edge_group_id: Vec::new(),
            edge_group_index: Vec::new(),
            groups,
            types: TypeTable::empty("edge_type_id"),
        }
    }

    pub fn with_column(mut self, name: &str, column: Column) -> Self {
        self.with_group_column(DEFAULT_GROUP, name, column)
    }

    /// Add a column to `group`, creating the group if needed
    pub fn with_group_column(mut self, group: &str, name: &str, column: Column) -> Self {
        self.groups
            .entry(group.to_string())
            .or_default()
            .columns
            .insert(name.to_string(), column);
        self
    }

    /// Per-row group id and index within that group
    pub fn with_membership(mut self, edge_group_id: Vec<i64>, edge_group_index: Vec<i64>) -> Self {
        self.edge_group_id = edge_group_id;
        self.edge_group_index = edge_group_index;
        self
    }

    pub fn with_types(mut self, types: TypeTable) -> Self {
        self.types = types;
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: &str,
        source_population: String,
        target_population: String,
        source_node_id: Vec<u64>,
        target_node_id: Vec<u64>,
        edge_type_id: Vec<i64>,
        edge_group_id: Vec<i64>,
        edge_group_index: Vec<i64>,
        groups: BTreeMap<String, AttributeGroup>,
    ) -> Self {
        Self {
            name: name.to_string(),
            source_population,
            target_population,
            source_node_id,
            target_node_id,
            edge_type_id,
            edge_group_id,
            edge_group_index,
            groups,
            types: TypeTable::empty("edge_type_id"),
        }
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.target_node_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_node_id.is_empty()
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn source_population(&self) -> &str {
        &self.source_population
    }

    pub fn target_population(&self) -> &str {
        &self.target_population
    }

    pub fn source_node_ids(&self) -> &[u64] {
        &self.source_node_id
    }

    pub fn target_node_ids(&self) -> &[u64] {
        &self.target_node_id
    }

    pub fn check_membership(&self) -> Result<(), String> {
        if self.source_node_id.len() != self.len() || self.edge_type_id.len() != self.len() {
            return Err(format!(
                "'{}': {} sources, {} targets, {} type ids",
                self.name,
                self.source_node_id.len(),
                self.len(),
                self.edge_type_id.len()
            ));
        }
        check_membership(
            &self.name,
            self.len(),
            &self.edge_group_id,
            &self.edge_group_index,
            &self.groups,
        )
    }

    /// Rows whose target is `node_id`, in row order
    pub fn rows_targeting(&self, node_id: u64) -> Vec<usize> {
        self.target_node_id
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == node_id)
            .map(|(row, _)| row)
            .collect()
    }

    pub fn attribute(&self, row: usize, name: &str) -> CircuitResult<Option<AttributeValue>> {
        self.resolve(row, name)
    }

    pub fn attributes(&self, row: usize) -> CircuitResult<BTreeMap<String, AttributeValue>> {
        self.resolve_all(row)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.defines(name)
    }

    pub fn set_attribute(&mut self, row: usize, name: &str, value: AttributeValue) -> CircuitResult<()> {
        self.check_row(row)?;
        self.store(row, name, value)
    }

    /// Afferent placement schema. Columns are judged across every group: a
    /// column some groups carry and others lack makes the population
    /// `Partial`, since those rows could not be rewritten.
    pub fn placement_schema(&self) -> PlacementSchema {
        use placement::*;
        let defined = |name: &str| self.defines(name);
        let mentioned = |name: &str| self.mentions(name);
        if !AFFERENT.iter().any(|&n| mentioned(n)) {
            return PlacementSchema::Absent;
        }
        const FULL: [&str; 3] = [AFFERENT_SECTION_ID, AFFERENT_SEGMENT_ID, AFFERENT_SEGMENT_OFFSET];
        if FULL.iter().all(|&n| defined(n)) {
            if mentioned(AFFERENT_SECTION_POS) && !defined(AFFERENT_SECTION_POS) {
                return PlacementSchema::Partial {
                    missing: vec![AFFERENT_SECTION_POS],
                };
            }
            return PlacementSchema::Full {
                has_section_pos: defined(AFFERENT_SECTION_POS),
            };
        }
        let segment_columns = mentioned(AFFERENT_SEGMENT_ID) || mentioned(AFFERENT_SEGMENT_OFFSET);
        if !segment_columns && defined(AFFERENT_SECTION_ID) && defined(AFFERENT_SECTION_POS) {
            return PlacementSchema::Legacy;
        }
        let required: &[&'static str] = if segment_columns {
            &FULL
        } else {
            &[AFFERENT_SECTION_ID, AFFERENT_SECTION_POS]
        };
        PlacementSchema::Partial {
            missing: required.iter().copied().filter(|&n| !defined(n)).collect(),
        }
    }
}
