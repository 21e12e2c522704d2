// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
SONATA HDF5 population files.

```text
/nodes/<pop>/{node_type_id, node_id, node_group_id, node_group_index}
/nodes/<pop>/<group>/{<column>..., dynamics_params/<column>...}
/edges/<pop>/source_node_id   @node_population
/edges/<pop>/target_node_id   @node_population
/edges/<pop>/{edge_type_id, edge_group_id, edge_group_index}
/edges/<pop>/<group>/{<column>..., dynamics_params/<column>...}
```

Attribute groups are the population's subgroups with integer names. Other
subgroups (`indices/`) are read past and not written back.

Copyright 2025 Neuraville Inc.
Licensed under the Apache License, Version 2.0
*/

use std::collections::BTreeMap;
use std::path::Path;

use hdf5::types::{TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Dataset, File, Group, H5Type};
use tracing::debug;

use crate::column::Column;
use crate::error::{StorageError, StorageResult};
use crate::format::{create_parent, PopulationFormat};
use crate::population::{AttributeGroup, EdgePopulation, NodePopulation};

const NODES: &str = "nodes";
const EDGES: &str = "edges";
const NODE_POPULATION: &str = "node_population";
const DYNAMICS_PARAMS: &str = "dynamics_params";

#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5Format;

fn storage_error(path: &Path) -> impl FnOnce(hdf5::Error) -> StorageError + '_ {
    move |e| StorageError::Hdf5 {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Last component of an HDF5 object path
fn leaf(name: &str) -> String {
    name.rsplit('/').next().unwrap_or_default().to_string()
}

fn get_dataset<T: H5Type + Clone>(group: &Group, name: &str) -> hdf5::Result<Vec<T>> {
    let dataset = group
        .dataset(name)
        .map_err(|e| format!("group {} has no dataset {}: {}", group.name(), name, e))?;
    Ok(dataset.read_1d::<T>()?.to_vec())
}

fn get_text<T: H5Type + Clone + AsRef<str>>(dataset: &Dataset) -> hdf5::Result<Vec<String>> {
    Ok(dataset
        .read_1d::<T>()?
        .iter()
        .map(|s| s.as_ref().to_string())
        .collect())
}

fn read_column(dataset: &Dataset) -> hdf5::Result<Column> {
    if dataset.ndim() != 1 {
        return Err(format!("{} is not one-dimensional", dataset.name()).into());
    }
    Ok(match dataset.dtype()?.to_descriptor()? {
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
            Column::Int(dataset.read_1d::<i64>()?.to_vec())
        }
        TypeDescriptor::Float(_) => Column::Float(dataset.read_1d::<f64>()?.to_vec()),
        TypeDescriptor::VarLenAscii | TypeDescriptor::FixedAscii(_) => {
            Column::Text(get_text::<VarLenAscii>(dataset)?)
        }
        TypeDescriptor::VarLenUnicode | TypeDescriptor::FixedUnicode(_) => {
            Column::Text(get_text::<VarLenUnicode>(dataset)?)
        }
        other => {
            return Err(format!("{}: unsupported dtype {:?}", dataset.name(), other).into());
        }
    })
}

fn read_attribute_group(group: &Group) -> hdf5::Result<AttributeGroup> {
    let mut attributes = AttributeGroup::default();
    for dataset in group.datasets()? {
        attributes
            .columns
            .insert(leaf(&dataset.name()), read_column(&dataset)?);
    }
    if group.link_exists(DYNAMICS_PARAMS) {
        for dataset in group.group(DYNAMICS_PARAMS)?.datasets()? {
            attributes
                .dynamics_params
                .insert(leaf(&dataset.name()), read_column(&dataset)?);
        }
    }
    Ok(attributes)
}

fn read_attribute_groups(population: &Group) -> hdf5::Result<BTreeMap<String, AttributeGroup>> {
    let mut groups = BTreeMap::new();
    for group in population.groups()? {
        let name = leaf(&group.name());
        if name.parse::<i64>().is_err() {
            debug!(target: "snr-circuit", "Ignoring {}", group.name());
            continue;
        }
        groups.insert(name, read_attribute_group(&group)?);
    }
    Ok(groups)
}

fn read_optional<T: H5Type + Clone>(group: &Group, name: &str) -> hdf5::Result<Vec<T>> {
    if group.link_exists(name) {
        get_dataset(group, name)
    } else {
        Ok(Vec::new())
    }
}

fn node_population_of(dataset: &Dataset) -> hdf5::Result<String> {
    let name = dataset
        .attr(NODE_POPULATION)
        .map_err(|e| format!("{} has no {} attribute: {}", dataset.name(), NODE_POPULATION, e))?
        .read_scalar::<VarLenUnicode>()?;
    Ok(name.as_str().to_string())
}

fn read_node_population(name: &str, population: &Group) -> hdf5::Result<NodePopulation> {
    let type_ids = get_dataset::<i64>(population, "node_type_id")?;
    let node_ids = read_optional::<u64>(population, "node_id")?;
    if let Some((row, id)) = node_ids
        .iter()
        .enumerate()
        .find(|(row, &id)| id != *row as u64)
    {
        return Err(format!(
            "node population {}: node_id {} stored at row {}; node ids must equal row numbers",
            name, id, row
        )
        .into());
    }
    Ok(NodePopulation::from_parts(
        name,
        type_ids,
        read_optional(population, "node_group_id")?,
        read_optional(population, "node_group_index")?,
        read_attribute_groups(population)?,
    ))
}

fn read_edge_population(name: &str, population: &Group) -> hdf5::Result<EdgePopulation> {
    let sources = population.dataset("source_node_id")?;
    let targets = population.dataset("target_node_id")?;
    Ok(EdgePopulation::from_parts(
        name,
        node_population_of(&sources)?,
        node_population_of(&targets)?,
        sources.read_1d::<u64>()?.to_vec(),
        targets.read_1d::<u64>()?.to_vec(),
        get_dataset(population, "edge_type_id")?,
        read_optional(population, "edge_group_id")?,
        read_optional(population, "edge_group_index")?,
        read_attribute_groups(population)?,
    ))
}

fn write_dataset<T: H5Type>(group: &Group, name: &str, values: &[T]) -> hdf5::Result<Dataset> {
    group.new_dataset_builder().with_data(values).create(name)
}

fn write_column(group: &Group, name: &str, column: &Column) -> hdf5::Result<()> {
    match column {
        Column::Int(values) => write_dataset(group, name, values)?,
        Column::Float(values) => write_dataset(group, name, values)?,
        Column::Text(values) => {
            let encoded = values
                .iter()
                .map(|s| {
                    s.parse::<VarLenUnicode>()
                        .map_err(|e| format!("{}/{}: {}", group.name(), name, e))
                })
                .collect::<Result<Vec<_>, String>>()?;
            write_dataset(group, name, &encoded)?
        }
    };
    Ok(())
}

fn write_attribute_groups(
    population: &Group,
    groups: &BTreeMap<String, AttributeGroup>,
) -> hdf5::Result<()> {
    for (name, attributes) in groups {
        let group = population.create_group(name)?;
        for (column_name, column) in &attributes.columns {
            write_column(&group, column_name, column)?;
        }
        if !attributes.dynamics_params.is_empty() {
            let params = group.create_group(DYNAMICS_PARAMS)?;
            for (column_name, column) in &attributes.dynamics_params {
                write_column(&params, column_name, column)?;
            }
        }
    }
    Ok(())
}

/// SONATA requires explicit membership; an empty one means group "0" in
/// row order
fn membership(group_ids: &[i64], group_indices: &[i64], rows: usize) -> (Vec<i64>, Vec<i64>) {
    if group_ids.is_empty() {
        (vec![0; rows], (0..rows as i64).collect())
    } else {
        (group_ids.to_vec(), group_indices.to_vec())
    }
}

fn tag_population(dataset: &Dataset, population: &str) -> hdf5::Result<()> {
    let value = population
        .parse::<VarLenUnicode>()
        .map_err(|e| format!("population name {}: {}", population, e))?;
    dataset
        .new_attr::<VarLenUnicode>()
        .shape(())
        .create(NODE_POPULATION)?
        .write_scalar(&value)
}

fn write_node_populations(path: &Path, populations: &[&NodePopulation]) -> hdf5::Result<()> {
    let file = File::create(path)?;
    let root = file.create_group(NODES)?;
    for population in populations {
        let group = root.create_group(population.name())?;
        let rows = population.len();
        let (ids, indices) = membership(
            &population.node_group_id,
            &population.node_group_index,
            rows,
        );
        write_dataset(&group, "node_type_id", &population.node_type_id)?;
        write_dataset(&group, "node_id", &(0..rows as u64).collect::<Vec<_>>())?;
        write_dataset(&group, "node_group_id", &ids)?;
        write_dataset(&group, "node_group_index", &indices)?;
        write_attribute_groups(&group, &population.groups)?;
    }
    Ok(())
}

fn write_edge_populations(path: &Path, populations: &[&EdgePopulation]) -> hdf5::Result<()> {
    let file = File::create(path)?;
    let root = file.create_group(EDGES)?;
    for population in populations {
        let group = root.create_group(population.name())?;
        let (ids, indices) = membership(
            &population.edge_group_id,
            &population.edge_group_index,
            population.len(),
        );
        let sources = write_dataset(&group, "source_node_id", &population.source_node_id)?;
        tag_population(&sources, &population.source_population)?;
        let targets = write_dataset(&group, "target_node_id", &population.target_node_id)?;
        tag_population(&targets, &population.target_population)?;
        write_dataset(&group, "edge_type_id", &population.edge_type_id)?;
        write_dataset(&group, "edge_group_id", &ids)?;
        write_dataset(&group, "edge_group_index", &indices)?;
        write_attribute_groups(&group, &population.groups)?;
    }
    Ok(())
}

fn open_root(file: &File, root: &str) -> hdf5::Result<Group> {
    Ok(file
        .group(root)
        .map_err(|e| format!("no /{} group: {}", root, e))?)
}

fn read_node_file(path: &Path) -> hdf5::Result<Vec<NodePopulation>> {
    let file = File::open(path)?;
    open_root(&file, NODES)?
        .groups()?
        .iter()
        .map(|group| read_node_population(&leaf(&group.name()), group))
        .collect()
}

fn read_edge_file(path: &Path) -> hdf5::Result<Vec<EdgePopulation>> {
    let file = File::open(path)?;
    open_root(&file, EDGES)?
        .groups()?
        .iter()
        .map(|group| read_edge_population(&leaf(&group.name()), group))
        .collect()
}

impl PopulationFormat for Hdf5Format {
    fn name(&self) -> &str {
        "hdf5"
    }

    fn read_nodes(&self, path: &Path) -> StorageResult<Vec<NodePopulation>> {
        read_node_file(path).map_err(storage_error(path))
    }

    fn read_edges(&self, path: &Path) -> StorageResult<Vec<EdgePopulation>> {
        read_edge_file(path).map_err(storage_error(path))
    }

    fn write_nodes(&self, path: &Path, populations: &[&NodePopulation]) -> StorageResult<()> {
        create_parent(path)?;
        write_node_populations(path, populations).map_err(storage_error(path))
    }

    fn write_edges(&self, path: &Path, populations: &[&EdgePopulation]) -> StorageResult<()> {
        create_parent(path)?;
        write_edge_populations(path, populations).map_err(storage_error(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::AttributeValue;
    use crate::population::placement;

    #[test]
    fn test_reads_sonata_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.h5");
        {
            // narrower integer types than the in-memory columns, no node_id
            let file = File::create(&path).unwrap();
            let cortex = file.create_group("nodes").unwrap().create_group("cortex").unwrap();
            write_dataset(&cortex, "node_type_id", &[100u32, 101]).unwrap();
            write_dataset(&cortex, "node_group_id", &[0u16, 0]).unwrap();
            write_dataset(&cortex, "node_group_index", &[1i32, 0]).unwrap();
            let group = cortex.create_group("0").unwrap();
            write_dataset(&group, "x", &[1.5f32, 2.5]).unwrap();
            let names: Vec<VarLenUnicode> =
                ["a", "b"].iter().map(|s| s.parse().unwrap()).collect();
            write_dataset(&group, "morphology", &names).unwrap();
        }

        let read = Hdf5Format.read_nodes(&path).unwrap();
        assert_eq!(read.len(), 1);
        let cortex = &read[0];
        assert_eq!(cortex.name(), "cortex");
        assert_eq!(cortex.node_type_id(1).unwrap(), 101);
        // row 0 sits at index 1 of group "0"
        assert_eq!(cortex.attribute(0, "x").unwrap(), Some(AttributeValue::Float(2.5)));
        assert_eq!(
            cortex.attribute(0, "morphology").unwrap(),
            Some(AttributeValue::Text("b".to_string()))
        );
    }

    #[test]
    fn test_edges_written_as_sonata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network/edges.h5");
        let edges = EdgePopulation::new("lgn_to_v1", "lgn", "v1", vec![0, 1, 2], vec![4, 4, 5], 7)
            .with_column(placement::AFFERENT_SECTION_ID, Column::Int(vec![1, 2, 3]))
            .with_column(placement::AFFERENT_SEGMENT_OFFSET, Column::Float(vec![0.1, 0.2, 0.3]))
            .with_column("model_template", Column::Text(vec!["exp2syn".to_string(); 3]));
        Hdf5Format.write_edges(&path, &[&edges]).unwrap();

        let file = File::open(&path).unwrap();
        let group = file.group("edges/lgn_to_v1").unwrap();
        assert_eq!(get_dataset::<i64>(&group, "edge_group_id").unwrap(), vec![0, 0, 0]);
        assert_eq!(get_dataset::<i64>(&group, "edge_group_index").unwrap(), vec![0, 1, 2]);
        assert_eq!(
            node_population_of(&group.dataset("target_node_id").unwrap()).unwrap(),
            "v1"
        );

        let read = Hdf5Format.read_edges(&path).unwrap();
        assert_eq!(read.len(), 1);
        let read = &read[0];
        assert_eq!(read.source_population(), "lgn");
        assert_eq!(read.target_population(), "v1");
        assert_eq!(read.rows_targeting(4), vec![0, 1]);
        assert_eq!(
            read.attribute(2, placement::AFFERENT_SECTION_ID).unwrap(),
            Some(AttributeValue::Int(3))
        );
        assert_eq!(
            read.attribute(1, "model_template").unwrap(),
            Some(AttributeValue::Text("exp2syn".to_string()))
        );
    }

    #[test]
    fn test_non_row_node_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.h5");
        {
            let file = File::create(&path).unwrap();
            let pop = file.create_group("nodes").unwrap().create_group("v1").unwrap();
            write_dataset(&pop, "node_type_id", &[1i64, 1]).unwrap();
            write_dataset(&pop, "node_id", &[5u64, 6]).unwrap();
        }
        assert!(matches!(
            Hdf5Format.read_nodes(&path),
            Err(StorageError::Hdf5 { .. })
        ));
    }

    #[test]
    fn test_json_file_is_not_hdf5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.h5");
        std::fs::write(&path, "{\"nodes\": {}}").unwrap();
        assert!(matches!(
            Hdf5Format.read_nodes(&path),
            Err(StorageError::Hdf5 { .. })
        ));
    }
}
