// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Storage collaborator.

[`FileCircuitStore`] reads a circuit through its descriptor and writes it
back, encoding population files with a [`PopulationFormat`]:

- [`SonataCircuitStore`]: HDF5 for `.h5` files, JSON otherwise
- [`JsonCircuitStore`]: JSON population documents only
- `Hdf5CircuitStore` (feature `hdf5`): SONATA HDF5 only

New circuits are staged in a sibling directory and renamed into place once
every file is written. In-place writes encode each file beside its target
and rename them all once every file has been encoded.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::circuit::Circuit;
use crate::column::AttributeValue;
use crate::descriptor::{normalize, CircuitDescriptor, EdgeFiles, NodeFiles, BIOPHYSICS_DIR, MORPHOLOGIES_DIR};
use crate::error::{CircuitError, StorageError, StorageResult};
use crate::format::{create_parent, to_json, write_json, JsonFormat, PopulationFormat, SonataFormat};
use crate::population::{EdgePopulation, NodeModel, NodePopulation};
use crate::types::TypeTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentKind {
    Morphology,
    Biophysics,
}

/// A component file produced by a reduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentArtifact {
    pub kind: ComponentKind,
    pub file_name: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteTarget {
    /// A fresh circuit directory
    NewCircuit(PathBuf),
    /// Rewrite the source circuit's tables and add the artifacts beside its
    /// existing components
    InPlace,
}

/// One rewritten edge, keyed by its row in the original population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEdge {
    pub row: usize,
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Everything a single reduced node changes, written as a standalone directory
#[derive(Debug, Clone, PartialEq)]
pub struct NodeBundle {
    pub population: String,
    pub node_id: u64,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub edges: BTreeMap<String, Vec<BundleEdge>>,
    pub artifacts: Vec<ComponentArtifact>,
}

pub trait CircuitStore: Send + Sync {
    fn read_descriptor(&self, config: &Path) -> StorageResult<CircuitDescriptor>;

    fn read_node_populations(&self, files: &NodeFiles) -> StorageResult<Vec<NodePopulation>>;

    fn read_edge_populations(&self, files: &EdgeFiles) -> StorageResult<Vec<EdgePopulation>>;

    /// Persist `circuit` plus `artifacts`; returns the circuit directory
    fn write_circuit(
        &self,
        circuit: &Circuit,
        artifacts: &[ComponentArtifact],
        target: &WriteTarget,
    ) -> StorageResult<PathBuf>;

    fn write_node_bundle(&self, dir: &Path, bundle: &NodeBundle) -> StorageResult<PathBuf>;

    fn read_circuit(&self, config: &Path) -> StorageResult<Circuit> {
        let descriptor = self.read_descriptor(config)?;
        let mut nodes = Vec::new();
        for (index, files) in descriptor.nodes().iter().enumerate() {
            for population in self.read_node_populations(files)? {
                nodes.push((index, population));
            }
        }
        let mut edges = Vec::new();
        for (index, files) in descriptor.edges().iter().enumerate() {
            for population in self.read_edge_populations(files)? {
                edges.push((index, population));
            }
        }
        Ok(Circuit::new(descriptor, nodes, edges)?)
    }
}

/// Circuit store over one population file format
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCircuitStore<F> {
    format: F,
}

/// The default store: HDF5 or JSON population files by extension
pub type SonataCircuitStore = FileCircuitStore<SonataFormat>;

pub type JsonCircuitStore = FileCircuitStore<JsonFormat>;

#[cfg(feature = "hdf5")]
pub type Hdf5CircuitStore = FileCircuitStore<crate::h5::Hdf5Format>;

impl<F: PopulationFormat + Default> FileCircuitStore<F> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: PopulationFormat> FileCircuitStore<F> {
    pub fn with_format(format: F) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &F {
        &self.format
    }
}

fn write_file(path: &Path, contents: &str) -> StorageResult<()> {
    create_parent(path)?;
    std::fs::write(path, contents).map_err(StorageError::io(path))
}

/// Sibling of `path` for writing before a rename; keeps the extension so
/// the format is picked the same way
fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", uuid::Uuid::now_v7(), name))
}

fn remove_temporaries(paths: &[(PathBuf, PathBuf)]) {
    for (temporary, _) in paths.iter().filter(|(t, _)| t.exists()) {
        if let Err(e) = std::fs::remove_file(temporary) {
            warn!(target: "snr-circuit", "Could not remove {}: {}", temporary.display(), e);
        }
    }
}

fn copy_file(from: &Path, to: &Path) -> StorageResult<()> {
    create_parent(to)?;
    std::fs::copy(from, to).map_err(StorageError::io(from))?;
    Ok(())
}

fn copy_tree(from: &Path, to: &Path, skip: &BTreeSet<PathBuf>) -> StorageResult<()> {
    std::fs::create_dir_all(to).map_err(StorageError::io(to))?;
    let entries = std::fs::read_dir(from).map_err(StorageError::io(from))?;
    for entry in entries {
        let entry = entry.map_err(StorageError::io(from))?;
        let path = entry.path();
        if skip.contains(&path) {
            continue;
        }
        let target = to.join(entry.file_name());
        let kind = entry.file_type().map_err(StorageError::io(&path))?;
        if kind.is_dir() {
            copy_tree(&path, &target, skip)?;
        } else {
            copy_file(&path, &target)?;
        }
    }
    Ok(())
}

/// Absolute form of `path` with symlinks resolved, without creating
/// anything: the deepest existing ancestor is canonicalized and the missing
/// components are appended to it
fn absolute(path: &Path) -> StorageResult<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(StorageError::io(path))?
            .join(path)
    };
    let path = normalize(&path);
    if path.file_name().is_none() {
        return Err(StorageError::OutputExists(path));
    }
    let mut existing = path.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing.canonicalize().map_err(StorageError::io(existing))?;
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}

/// Where a source path lands in the staged output
struct Layout<'a> {
    source: &'a Path,
    staging: &'a Path,
}

impl Layout<'_> {
    /// Staged location of `path`, plus the descriptor text to use when the
    /// path lies outside the source tree and has to move into the output
    fn place(&self, path: &Path) -> (PathBuf, Option<String>) {
        match path.strip_prefix(self.source) {
            Ok(relative) => (self.staging.join(relative), None),
            Err(_) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (self.staging.join(&name), Some(format!("./{}", name)))
            }
        }
    }
}

fn set_entry(raw: &mut Value, pointer: &str, text: String) {
    if let Some(slot) = raw.pointer_mut(pointer) {
        *slot = Value::String(text);
    }
}

/// Component files referenced by the circuit's biophysical nodes
fn referenced_components(circuit: &Circuit) -> (BTreeSet<PathBuf>, BTreeSet<PathBuf>) {
    let descriptor = circuit.descriptor();
    let mut morphologies = BTreeSet::new();
    let mut biophysics = BTreeSet::new();
    for population in circuit.node_populations() {
        for node_id in population.node_ids() {
            if let Ok(NodeModel::Biophysical {
                morphology,
                model_template,
            }) = population.model(node_id)
            {
                morphologies.extend(descriptor.morphology_path(&morphology));
                biophysics.extend(descriptor.biophysics_path(&model_template));
            }
        }
    }
    (morphologies, biophysics)
}

impl<F: PopulationFormat> FileCircuitStore<F> {
    fn write_nodes(&self, circuit: &Circuit, index: usize, path: &Path) -> StorageResult<()> {
        self.format
            .write_nodes(path, &circuit.node_populations_in_file(index))
    }

    fn write_edges(&self, circuit: &Circuit, index: usize, path: &Path) -> StorageResult<()> {
        self.format
            .write_edges(path, &circuit.edge_populations_in_file(index))
    }

    fn component_dir(&self, descriptor: &CircuitDescriptor, kind: ComponentKind) -> StorageResult<PathBuf> {
        let (dir, key) = match kind {
            ComponentKind::Morphology => (descriptor.morphologies_dir(), MORPHOLOGIES_DIR),
            ComponentKind::Biophysics => (descriptor.biophysics_dir(), BIOPHYSICS_DIR),
        };
        dir.map(Path::to_path_buf)
            .ok_or_else(|| CircuitError::Descriptor(format!("no components.{} configured", key)).into())
    }

    fn stage(
        &self,
        circuit: &Circuit,
        artifacts: &[ComponentArtifact],
        output: &Path,
        staging: &Path,
    ) -> StorageResult<()> {
        let descriptor = circuit.descriptor();
        let source = descriptor.base_dir();
        let layout = Layout { source, staging };

        let component_dirs: Vec<(ComponentKind, PathBuf)> = [ComponentKind::Morphology, ComponentKind::Biophysics]
            .into_iter()
            .filter_map(|kind| self.component_dir(descriptor, kind).ok().map(|d| (kind, d)))
            .collect();
        let skip: BTreeSet<PathBuf> = component_dirs.iter().map(|(_, d)| d.clone()).collect();
        copy_tree(source, staging, &skip)?;

        let mut raw = descriptor.rebased_raw(source, output);

        let (morphologies, biophysics) = referenced_components(circuit);
        let mut staged_dirs = BTreeMap::new();
        for (kind, dir) in &component_dirs {
            let (staged, moved) = layout.place(dir);
            let (key, referenced) = match kind {
                ComponentKind::Morphology => (MORPHOLOGIES_DIR, &morphologies),
                ComponentKind::Biophysics => (BIOPHYSICS_DIR, &biophysics),
            };
            if let Some(text) = moved {
                set_entry(&mut raw, &format!("/components/{}", key), text);
            }
            std::fs::create_dir_all(&staged).map_err(StorageError::io(&staged))?;
            let mut copied = 0usize;
            for file in referenced.iter().filter(|f| f.is_file()) {
                if let Some(name) = file.file_name() {
                    copy_file(file, &staged.join(name))?;
                    copied += 1;
                }
            }
            debug!(target: "snr-circuit", "Copied {} referenced files into {}", copied, staged.display());
            staged_dirs.insert(*kind, staged);
        }

        for artifact in artifacts {
            let dir = staged_dirs.get(&artifact.kind).ok_or_else(|| {
                CircuitError::Descriptor(format!("no component directory for {:?} artifacts", artifact.kind))
            })?;
            write_file(&dir.join(&artifact.file_name), &artifact.contents)?;
        }

        for (index, files) in descriptor.nodes().iter().enumerate() {
            let (staged, moved) = layout.place(&files.nodes_file);
            if let Some(text) = moved {
                set_entry(&mut raw, &format!("/networks/nodes/{}/nodes_file", index), text);
            }
            self.write_nodes(circuit, index, &staged)?;
            if let Some(types) = &files.node_types_file {
                let (staged, moved) = layout.place(types);
                if let Some(text) = moved {
                    copy_file(types, &staged)?;
                    set_entry(&mut raw, &format!("/networks/nodes/{}/node_types_file", index), text);
                }
            }
        }
        for (index, files) in descriptor.edges().iter().enumerate() {
            let (staged, moved) = layout.place(&files.edges_file);
            if let Some(text) = moved {
                set_entry(&mut raw, &format!("/networks/edges/{}/edges_file", index), text);
            }
            self.write_edges(circuit, index, &staged)?;
            if let Some(types) = &files.edge_types_file {
                let (staged, moved) = layout.place(types);
                if let Some(text) = moved {
                    copy_file(types, &staged)?;
                    set_entry(&mut raw, &format!("/networks/edges/{}/edge_types_file", index), text);
                }
            }
        }

        let config_name = descriptor
            .config_path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "circuit_config.json".to_string());
        write_json(&staging.join(config_name), &raw)
    }

    fn write_new(&self, circuit: &Circuit, artifacts: &[ComponentArtifact], output: &Path) -> StorageResult<PathBuf> {
        let source = circuit.descriptor().base_dir();
        let output = absolute(output)?;
        if output.exists() {
            return Err(StorageError::OutputExists(output));
        }
        if output.starts_with(source) {
            return Err(StorageError::OutputInsideSource {
                output,
                source_dir: source.to_path_buf(),
            });
        }
        create_parent(&output)?;

        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = output.with_file_name(format!(".{}.staging-{}", name, uuid::Uuid::now_v7()));

        match self.stage(circuit, artifacts, &output, &staging) {
            Ok(()) => {
                std::fs::rename(&staging, &output).map_err(StorageError::io(&output))?;
                info!(target: "snr-circuit", "Wrote circuit to {}", output.display());
                Ok(output)
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                    warn!(target: "snr-circuit", "Could not remove staging directory {}: {}", staging.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    fn write_in_place(&self, circuit: &Circuit, artifacts: &[ComponentArtifact]) -> StorageResult<PathBuf> {
        let descriptor = circuit.descriptor();
        let mut placed = Vec::new();
        for artifact in artifacts {
            let dir = self.component_dir(descriptor, artifact.kind)?;
            placed.push((dir.join(&artifact.file_name), &artifact.contents));
        }

        // nothing is renamed until every file is encoded
        let mut encoded = Vec::new();
        if let Err(e) = self.encode_beside(circuit, &placed, &mut encoded) {
            remove_temporaries(&encoded);
            return Err(e);
        }

        for (temporary, target) in &encoded {
            std::fs::rename(temporary, target).map_err(StorageError::io(target))?;
        }
        info!(target: "snr-circuit", "Updated circuit {} in place", descriptor.base_dir().display());
        Ok(descriptor.base_dir().to_path_buf())
    }

    /// Encode every population file and artifact into a temporary sibling
    /// of its target, recording `(temporary, target)` pairs
    fn encode_beside(
        &self,
        circuit: &Circuit,
        placed: &[(PathBuf, &String)],
        encoded: &mut Vec<(PathBuf, PathBuf)>,
    ) -> StorageResult<()> {
        let descriptor = circuit.descriptor();
        for (index, files) in descriptor.nodes().iter().enumerate() {
            let temporary = temporary_sibling(&files.nodes_file);
            encoded.push((temporary.clone(), files.nodes_file.clone()));
            self.write_nodes(circuit, index, &temporary)?;
        }
        for (index, files) in descriptor.edges().iter().enumerate() {
            let temporary = temporary_sibling(&files.edges_file);
            encoded.push((temporary.clone(), files.edges_file.clone()));
            self.write_edges(circuit, index, &temporary)?;
        }
        for (path, contents) in placed {
            let temporary = temporary_sibling(path);
            encoded.push((temporary.clone(), path.clone()));
            write_file(&temporary, contents)?;
        }
        Ok(())
    }

    fn read_types(path: Option<&PathBuf>, id_column: &str) -> StorageResult<TypeTable> {
        match path {
            Some(path) => TypeTable::load(path, id_column),
            None => Ok(TypeTable::empty(id_column)),
        }
    }
}

impl<F: PopulationFormat> CircuitStore for FileCircuitStore<F> {
    fn read_descriptor(&self, config: &Path) -> StorageResult<CircuitDescriptor> {
        CircuitDescriptor::load(config)
    }

    fn read_node_populations(&self, files: &NodeFiles) -> StorageResult<Vec<NodePopulation>> {
        let types = Self::read_types(files.node_types_file.as_ref(), "node_type_id")?;
        let populations = self.format.read_nodes(&files.nodes_file)?;
        debug!(
            target: "snr-circuit",
            "Read {} node populations from {} ({})",
            populations.len(),
            files.nodes_file.display(),
            self.format.name()
        );
        populations
            .into_iter()
            .map(|population| {
                let population = population.with_types(types.clone());
                population
                    .check_membership()
                    .map_err(|reason| StorageError::MalformedPopulation {
                        path: files.nodes_file.clone(),
                        reason,
                    })?;
                Ok(population)
            })
            .collect()
    }

    fn read_edge_populations(&self, files: &EdgeFiles) -> StorageResult<Vec<EdgePopulation>> {
        let types = Self::read_types(files.edge_types_file.as_ref(), "edge_type_id")?;
        let populations = self.format.read_edges(&files.edges_file)?;
        debug!(
            target: "snr-circuit",
            "Read {} edge populations from {} ({})",
            populations.len(),
            files.edges_file.display(),
            self.format.name()
        );
        populations
            .into_iter()
            .map(|population| {
                let population = population.with_types(types.clone());
                population
                    .check_membership()
                    .map_err(|reason| StorageError::MalformedPopulation {
                        path: files.edges_file.clone(),
                        reason,
                    })?;
                Ok(population)
            })
            .collect()
    }

    fn write_circuit(
        &self,
        circuit: &Circuit,
        artifacts: &[ComponentArtifact],
        target: &WriteTarget,
    ) -> StorageResult<PathBuf> {
        match target {
            WriteTarget::NewCircuit(output) => self.write_new(circuit, artifacts, output),
            WriteTarget::InPlace => self.write_in_place(circuit, artifacts),
        }
    }

    fn write_node_bundle(&self, dir: &Path, bundle: &NodeBundle) -> StorageResult<PathBuf> {
        let node_path = dir.join("node").join(format!("{}.json", bundle.node_id));
        write_file(&node_path, &to_json(&bundle.attributes, &node_path)?)?;
        for (population, rows) in &bundle.edges {
            let path = dir.join("edges").join(format!("{}.json", population));
            write_file(&path, &to_json(rows, &path)?)?;
        }
        for artifact in &bundle.artifacts {
            let sub = match artifact.kind {
                ComponentKind::Morphology => "morphology",
                ComponentKind::Biophysics => "biophys",
            };
            write_file(&dir.join(sub).join(&artifact.file_name), &artifact.contents)?;
        }
        info!(
            target: "snr-circuit",
            "Wrote node {}:{} bundle to {}",
            bundle.population,
            bundle.node_id,
            dir.display()
        );
        Ok(dir.to_path_buf())
    }
}
