// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node and edge type tables.
//!
//! Types are space-separated CSV files with one named column per attribute.
//! The first column (`node_type_id` / `edge_type_id`) keys the row; every
//! other column assigns a default to all nodes or edges of that type. Cells
//! holding `NONE` or `NULL` leave the attribute undefined for the type.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::column::AttributeValue;
use crate::error::{StorageError, StorageResult};

const ABSENT: [&str; 2] = ["NONE", "NULL"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeTable {
    id_column: String,
    columns: Vec<String>,
    rows: BTreeMap<i64, BTreeMap<String, AttributeValue>>,
}

impl TypeTable {
    pub fn empty(id_column: &str) -> Self {
        Self {
            id_column: id_column.to_string(),
            ..Default::default()
        }
    }

    pub fn load(path: &Path, id_column: &str) -> StorageResult<Self> {
        let file = std::fs::File::open(path).map_err(StorageError::io(path))?;
        Self::from_reader(file, id_column).map_err(|reason| StorageError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_reader<R: Read>(reader: R, id_column: &str) -> Result<Self, String> {
        let mut rd = csv::ReaderBuilder::new()
            .delimiter(b' ')
            .from_reader(reader);

        let header: Vec<String> = rd
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(str::to_string)
            .collect();
        let id_position = header
            .iter()
            .position(|h| h == id_column)
            .ok_or_else(|| format!("missing '{}' column", id_column))?;

        let mut rows = BTreeMap::new();
        for (line, record) in rd.records().enumerate() {
            let record = record.map_err(|e| e.to_string())?;
            let id_cell = record.get(id_position).unwrap_or("");
            let id = id_cell
                .parse::<i64>()
                .map_err(|_| format!("row {}: type id '{}' is not an integer", line + 1, id_cell))?;

            let mut attributes = BTreeMap::new();
            for (position, cell) in record.iter().enumerate() {
                if position == id_position || cell.is_empty() || ABSENT.contains(&cell) {
                    continue;
                }
                if let Some(name) = header.get(position) {
                    attributes.insert(name.clone(), AttributeValue::parse_cell(cell));
                }
            }
            if rows.insert(id, attributes).is_some() {
                return Err(format!("duplicate type id {}", id));
            }
        }

        let columns = header
            .into_iter()
            .enumerate()
            .filter(|(position, _)| *position != id_position)
            .map(|(_, name)| name)
            .collect();

        Ok(Self {
            id_column: id_column.to_string(),
            columns,
            rows,
        })
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Attribute names declared by the table header
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn contains(&self, type_id: i64) -> bool {
        self.rows.contains_key(&type_id)
    }

    pub fn attribute(&self, type_id: i64, name: &str) -> Option<&AttributeValue> {
        self.rows.get(&type_id)?.get(name)
    }

    pub fn type_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.rows.keys().copied()
    }
}
