// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! An in-memory circuit: the descriptor plus every population it names.

use std::collections::BTreeMap;

use crate::descriptor::CircuitDescriptor;
use crate::error::{CircuitError, CircuitResult};
use crate::population::{EdgePopulation, NodePopulation};

#[derive(Debug, Clone)]
pub struct Circuit {
    descriptor: CircuitDescriptor,
    node_populations: BTreeMap<String, NodePopulation>,
    edge_populations: BTreeMap<String, EdgePopulation>,
    /// population name -> index into `descriptor.nodes()`
    node_files: BTreeMap<String, usize>,
    edge_files: BTreeMap<String, usize>,
}

impl Circuit {
    /// Assemble from populations tagged with the descriptor entry they came from
    pub fn new(
        descriptor: CircuitDescriptor,
        nodes: Vec<(usize, NodePopulation)>,
        edges: Vec<(usize, EdgePopulation)>,
    ) -> CircuitResult<Self> {
        let mut circuit = Self {
            descriptor,
            node_populations: BTreeMap::new(),
            edge_populations: BTreeMap::new(),
            node_files: BTreeMap::new(),
            edge_files: BTreeMap::new(),
        };
        for (file, population) in nodes {
            let name = population.name().to_string();
            if circuit.node_populations.insert(name.clone(), population).is_some() {
                return Err(CircuitError::Descriptor(format!(
                    "node population '{}' defined twice",
                    name
                )));
            }
            circuit.node_files.insert(name, file);
        }
        for (file, population) in edges {
            let name = population.name().to_string();
            if circuit.edge_populations.insert(name.clone(), population).is_some() {
                return Err(CircuitError::Descriptor(format!(
                    "edge population '{}' defined twice",
                    name
                )));
            }
            circuit.edge_files.insert(name, file);
        }
        Ok(circuit)
    }

    pub fn descriptor(&self) -> &CircuitDescriptor {
        &self.descriptor
    }

    pub fn node_population_names(&self) -> impl Iterator<Item = &str> {
        self.node_populations.keys().map(String::as_str)
    }

    pub fn node_populations(&self) -> impl Iterator<Item = &NodePopulation> {
        self.node_populations.values()
    }

    pub fn edge_populations(&self) -> impl Iterator<Item = &EdgePopulation> {
        self.edge_populations.values()
    }

    pub fn node_population(&self, name: &str) -> CircuitResult<&NodePopulation> {
        self.node_populations
            .get(name)
            .ok_or_else(|| CircuitError::UnknownNodePopulation(name.to_string()))
    }

    pub fn node_population_mut(&mut self, name: &str) -> CircuitResult<&mut NodePopulation> {
        self.node_populations
            .get_mut(name)
            .ok_or_else(|| CircuitError::UnknownNodePopulation(name.to_string()))
    }

    pub fn edge_population(&self, name: &str) -> CircuitResult<&EdgePopulation> {
        self.edge_populations
            .get(name)
            .ok_or_else(|| CircuitError::UnknownEdgePopulation(name.to_string()))
    }

    pub fn edge_population_mut(&mut self, name: &str) -> CircuitResult<&mut EdgePopulation> {
        self.edge_populations
            .get_mut(name)
            .ok_or_else(|| CircuitError::UnknownEdgePopulation(name.to_string()))
    }

    /// Edge populations whose targets live in `node_population`
    pub fn afferent_populations<'a>(
        &'a self,
        node_population: &'a str,
    ) -> impl Iterator<Item = &'a EdgePopulation> + 'a {
        self.edge_populations
            .values()
            .filter(move |e| e.target_population() == node_population)
    }

    /// Node populations stored in the descriptor's `index`-th nodes entry
    pub fn node_populations_in_file(&self, index: usize) -> Vec<&NodePopulation> {
        self.node_files
            .iter()
            .filter(|(_, &file)| file == index)
            .filter_map(|(name, _)| self.node_populations.get(name))
            .collect()
    }

    pub fn edge_populations_in_file(&self, index: usize) -> Vec<&EdgePopulation> {
        self.edge_files
            .iter()
            .filter(|(_, &file)| file == index)
            .filter_map(|(name, _)| self.edge_populations.get(name))
            .collect()
    }
}
