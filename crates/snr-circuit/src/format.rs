// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Population file formats.

A [`PopulationFormat`] reads and writes the node and edge population files a
circuit descriptor names. Type tables, membership checks and directory
staging belong to the store; a format only encodes populations.

- [`JsonFormat`]: JSON documents laid out like the SONATA HDF5 groups
- `Hdf5Format` (feature `hdf5`): SONATA `/nodes/<pop>` and `/edges/<pop>`
- [`SonataFormat`]: picks one of the above from the file extension

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::population::{EdgePopulation, NodePopulation};

pub trait PopulationFormat: Send + Sync {
    fn name(&self) -> &str;

    /// Populations stored in `path`, named but without type tables
    fn read_nodes(&self, path: &Path) -> StorageResult<Vec<NodePopulation>>;

    fn read_edges(&self, path: &Path) -> StorageResult<Vec<EdgePopulation>>;

    /// Write `populations` to `path`, replacing whatever is there
    fn write_nodes(&self, path: &Path, populations: &[&NodePopulation]) -> StorageResult<()>;

    fn write_edges(&self, path: &Path, populations: &[&EdgePopulation]) -> StorageResult<()>;
}

pub(crate) fn create_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(StorageError::io(parent))?;
    }
    Ok(())
}

/// JSON population documents:
///
/// ```text
/// {"nodes": {"<pop>": {"node_type_id": [...], "node_group_id": [...],
///                      "node_group_index": [...],
///                      "groups": {"0": {"columns": {...}, "dynamics_params": {...}}}}}}
/// {"edges": {"<pop>": {"source_population": "...", "target_population": "...",
///                      "source_node_id": [...], "target_node_id": [...],
///                      "edge_type_id": [...], "groups": {...}}}}
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

#[derive(Deserialize)]
struct NodesDocument {
    nodes: BTreeMap<String, NodePopulation>,
}

#[derive(Serialize)]
struct NodesDocumentRef<'a> {
    nodes: BTreeMap<&'a str, &'a NodePopulation>,
}

#[derive(Deserialize)]
struct EdgesDocument {
    edges: BTreeMap<String, EdgePopulation>,
}

#[derive(Serialize)]
struct EdgesDocumentRef<'a> {
    edges: BTreeMap<&'a str, &'a EdgePopulation>,
}

pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> StorageResult<T> {
    let text = std::fs::read_to_string(path).map_err(StorageError::io(path))?;
    serde_json::from_str(&text).map_err(|e| StorageError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub(crate) fn to_json<T: Serialize>(value: &T, path: &Path) -> StorageResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| StorageError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let text = to_json(value, path)?;
    create_parent(path)?;
    std::fs::write(path, text).map_err(StorageError::io(path))
}

impl PopulationFormat for JsonFormat {
    fn name(&self) -> &str {
        "json"
    }

    fn read_nodes(&self, path: &Path) -> StorageResult<Vec<NodePopulation>> {
        let document: NodesDocument = read_json(path)?;
        Ok(document
            .nodes
            .into_iter()
            .map(|(name, mut population)| {
                population.set_name(&name);
                population
            })
            .collect())
    }

    fn read_edges(&self, path: &Path) -> StorageResult<Vec<EdgePopulation>> {
        let document: EdgesDocument = read_json(path)?;
        Ok(document
            .edges
            .into_iter()
            .map(|(name, mut population)| {
                population.set_name(&name);
                population
            })
            .collect())
    }

    fn write_nodes(&self, path: &Path, populations: &[&NodePopulation]) -> StorageResult<()> {
        let document = NodesDocumentRef {
            nodes: populations.iter().map(|p| (p.name(), *p)).collect(),
        };
        write_json(path, &document)
    }

    fn write_edges(&self, path: &Path, populations: &[&EdgePopulation]) -> StorageResult<()> {
        let document = EdgesDocumentRef {
            edges: populations.iter().map(|p| (p.name(), *p)).collect(),
        };
        write_json(path, &document)
    }
}

const HDF5_EXTENSIONS: [&str; 2] = ["h5", "hdf5"];

pub fn is_hdf5_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| HDF5_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// `.h5`/`.hdf5` files are HDF5, everything else JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct SonataFormat {
    json: JsonFormat,
    #[cfg(feature = "hdf5")]
    hdf5: crate::h5::Hdf5Format,
}

impl SonataFormat {
    fn pick(&self, path: &Path) -> StorageResult<&dyn PopulationFormat> {
        if !is_hdf5_path(path) {
            return Ok(&self.json);
        }
        #[cfg(feature = "hdf5")]
        {
            Ok(&self.hdf5)
        }
        #[cfg(not(feature = "hdf5"))]
        {
            Err(StorageError::Hdf5Unavailable(path.to_path_buf()))
        }
    }
}

impl PopulationFormat for SonataFormat {
    fn name(&self) -> &str {
        "sonata"
    }

    fn read_nodes(&self, path: &Path) -> StorageResult<Vec<NodePopulation>> {
        self.pick(path)?.read_nodes(path)
    }

    fn read_edges(&self, path: &Path) -> StorageResult<Vec<EdgePopulation>> {
        self.pick(path)?.read_edges(path)
    }

    fn write_nodes(&self, path: &Path, populations: &[&NodePopulation]) -> StorageResult<()> {
        self.pick(path)?.write_nodes(path, populations)
    }

    fn write_edges(&self, path: &Path, populations: &[&EdgePopulation]) -> StorageResult<()> {
        self.pick(path)?.write_edges(path, populations)
    }
}
