// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Top-level circuit descriptor (`circuit_config.json`).
//!
//! Paths may reference manifest variables as `$NAME` or `${NAME}`; relative
//! paths resolve against the descriptor's directory. The raw JSON is kept so
//! unknown sections survive a rewrite untouched.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::error::{CircuitError, CircuitResult, StorageError, StorageResult};
use crate::population::ModelTemplate;

pub const MORPHOLOGIES_DIR: &str = "morphologies_dir";
pub const BIOPHYSICS_DIR: &str = "biophysical_neuron_models_dir";

const MAX_MANIFEST_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeFiles {
    pub nodes_file: PathBuf,
    pub node_types_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeFiles {
    pub edges_file: PathBuf,
    pub edge_types_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CircuitDescriptor {
    config_path: PathBuf,
    base_dir: PathBuf,
    raw: Value,
    manifest: BTreeMap<String, String>,
    morphologies_dir: Option<PathBuf>,
    biophysics_dir: Option<PathBuf>,
    nodes: Vec<NodeFiles>,
    edges: Vec<EdgeFiles>,
    section_order: Option<String>,
}

impl CircuitDescriptor {
    pub fn load(config_path: &Path) -> StorageResult<Self> {
        let config_path = config_path
            .canonicalize()
            .map_err(StorageError::io(config_path))?;
        let text = std::fs::read_to_string(&config_path).map_err(StorageError::io(&config_path))?;
        let raw: Value = serde_json::from_str(&text).map_err(|e| StorageError::Parse {
            path: config_path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_value(&config_path, raw)?)
    }

    /// Interpret `raw` as if it were read from `config_path`
    pub fn from_value(config_path: &Path, raw: Value) -> CircuitResult<Self> {
        let base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let manifest: BTreeMap<String, String> = match raw.get("manifest") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(k, v)| {
                    let value = v.as_str().ok_or_else(|| {
                        CircuitError::Descriptor(format!("manifest entry {} is not a string", k))
                    })?;
                    Ok((k.trim_start_matches('$').to_string(), value.to_string()))
                })
                .collect::<CircuitResult<_>>()?,
            Some(_) => {
                return Err(CircuitError::Descriptor(
                    "manifest must be an object".to_string(),
                ))
            }
        };

        let mut descriptor = Self {
            config_path: config_path.to_path_buf(),
            base_dir,
            raw: Value::Null,
            manifest,
            morphologies_dir: None,
            biophysics_dir: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            section_order: None,
        };

        let components = raw.get("components");
        descriptor.morphologies_dir = descriptor.optional_path(components, MORPHOLOGIES_DIR)?;
        descriptor.biophysics_dir = descriptor.optional_path(components, BIOPHYSICS_DIR)?;

        let networks = raw.get("networks");
        for entry in list(networks, "nodes")? {
            descriptor.nodes.push(NodeFiles {
                nodes_file: descriptor.required_path(entry, "nodes_file")?,
                node_types_file: descriptor.optional_path(Some(entry), "node_types_file")?,
            });
        }
        for entry in list(networks, "edges")? {
            descriptor.edges.push(EdgeFiles {
                edges_file: descriptor.required_path(entry, "edges_file")?,
                edge_types_file: descriptor.optional_path(Some(entry), "edge_types_file")?,
            });
        }

        descriptor.section_order = raw
            .get("reduction")
            .and_then(|r| r.get("section_order"))
            .and_then(Value::as_str)
            .map(str::to_string);
        descriptor.raw = raw;
        Ok(descriptor)
    }

    fn optional_path(&self, section: Option<&Value>, key: &str) -> CircuitResult<Option<PathBuf>> {
        match section.and_then(|s| s.get(key)) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => self.resolve_path(text).map(Some),
            Some(_) => Err(CircuitError::Descriptor(format!("'{}' must be a string", key))),
        }
    }

    fn required_path(&self, section: &Value, key: &str) -> CircuitResult<PathBuf> {
        self.optional_path(Some(section), key)?
            .ok_or_else(|| CircuitError::Descriptor(format!("missing '{}'", key)))
    }

    /// Substitute manifest variables, then anchor relative paths at the
    /// descriptor's directory
    pub fn resolve_path(&self, text: &str) -> CircuitResult<PathBuf> {
        let expanded = self.expand(text, 0)?;
        let path = PathBuf::from(expanded);
        let path = if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        };
        Ok(normalize(&path))
    }

    fn expand(&self, text: &str, depth: usize) -> CircuitResult<String> {
        if depth > MAX_MANIFEST_DEPTH {
            return Err(CircuitError::Descriptor(format!(
                "manifest variables nest too deeply in '{}'",
                text
            )));
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find('$') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
                let end = braced.find('}').ok_or_else(|| {
                    CircuitError::Descriptor(format!("unterminated variable in '{}'", text))
                })?;
                (&braced[..end], end + 2)
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            };
            let value = self.manifest.get(name).ok_or_else(|| {
                CircuitError::Descriptor(format!("unknown manifest variable '${}'", name))
            })?;
            out.push_str(&self.expand(value, depth + 1)?);
            rest = &after[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Directory holding the descriptor; the circuit's source tree
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn nodes(&self) -> &[NodeFiles] {
        &self.nodes
    }

    pub fn edges(&self) -> &[EdgeFiles] {
        &self.edges
    }

    pub fn morphologies_dir(&self) -> Option<&Path> {
        self.morphologies_dir.as_deref()
    }

    pub fn biophysics_dir(&self) -> Option<&Path> {
        self.biophysics_dir.as_deref()
    }

    /// Section enumeration the circuit's placements were written in, if stated
    pub fn section_order(&self) -> Option<&str> {
        self.section_order.as_deref()
    }

    pub fn morphology_path(&self, morphology: &str) -> Option<PathBuf> {
        let dir = self.morphologies_dir.as_ref()?;
        Some(dir.join(morphology_file_name(morphology)))
    }

    pub fn biophysics_path(&self, template: &ModelTemplate) -> Option<PathBuf> {
        Some(self.biophysics_dir.as_ref()?.join(template.file_name()))
    }

    /// Raw descriptor with every absolute path under `from` moved under `to`
    pub fn rebased_raw(&self, from: &Path, to: &Path) -> Value {
        let mut raw = self.raw.clone();
        for section in ["manifest", "components", "networks"] {
            if let Some(value) = raw.get_mut(section) {
                rebase_strings(value, from, to);
            }
        }
        raw
    }
}

/// `<name>.swc`, or `name` itself when it already carries the extension
pub fn morphology_file_name(morphology: &str) -> String {
    if morphology.to_ascii_lowercase().ends_with(".swc") {
        morphology.to_string()
    } else {
        format!("{}.swc", morphology)
    }
}

fn list<'a>(section: Option<&'a Value>, key: &str) -> CircuitResult<&'a [Value]> {
    match section.and_then(|s| s.get(key)) {
        None | Some(Value::Null) => Ok(&[][..]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(CircuitError::Descriptor(format!(
            "networks.{} must be a list",
            key
        ))),
    }
}

fn rebase_strings(value: &mut Value, from: &Path, to: &Path) {
    match value {
        Value::String(text) => {
            let path = Path::new(text.as_str());
            if path.is_absolute() {
                if let Ok(relative) = normalize(path).strip_prefix(from) {
                    *text = to.join(relative).to_string_lossy().into_owned();
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| rebase_strings(v, from, to)),
        Value::Object(entries) => entries
            .values_mut()
            .for_each(|v| rebase_strings(v, from, to)),
        _ => {}
    }
}

/// Lexically remove `.` and `..` components
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> CircuitDescriptor {
        let raw = json!({
            "manifest": {
                "$BASE_DIR": ".",
                "$NETWORK_DIR": "$BASE_DIR/network",
                "$COMPONENTS_DIR": "${BASE_DIR}/components"
            },
            "components": {
                "morphologies_dir": "$COMPONENTS_DIR/morphologies",
                "biophysical_neuron_models_dir": "$COMPONENTS_DIR/biophys"
            },
            "networks": {
                "nodes": [{"nodes_file": "$NETWORK_DIR/nodes.json", "node_types_file": "$NETWORK_DIR/node_types.csv"}],
                "edges": [{"edges_file": "/elsewhere/edges.json", "edge_types_file": null}]
            },
            "reduction": {"section_order": "nrn"},
            "run": {"tstop": 100.0}
        });
        CircuitDescriptor::from_value(Path::new("/data/circuit/circuit_config.json"), raw).unwrap()
    }

    #[test]
    fn test_manifest_resolution() {
        let d = descriptor();
        assert_eq!(d.base_dir(), Path::new("/data/circuit"));
        assert_eq!(
            d.morphologies_dir(),
            Some(Path::new("/data/circuit/components/morphologies"))
        );
        assert_eq!(d.nodes()[0].nodes_file, PathBuf::from("/data/circuit/network/nodes.json"));
        assert_eq!(d.edges()[0].edge_types_file, None);
        assert_eq!(d.section_order(), Some("nrn"));
        assert_eq!(
            d.morphology_path("cell_a"),
            Some(PathBuf::from("/data/circuit/components/morphologies/cell_a.swc"))
        );
        assert_eq!(
            d.biophysics_path(&ModelTemplate::parse("json:cell_a").unwrap()),
            Some(PathBuf::from("/data/circuit/components/biophys/cell_a.json"))
        );
    }

    #[test]
    fn test_unknown_variable() {
        let raw = json!({"components": {"morphologies_dir": "$NOPE/m"}});
        assert!(matches!(
            CircuitDescriptor::from_value(Path::new("/c/config.json"), raw),
            Err(CircuitError::Descriptor(_))
        ));
    }

    #[test]
    fn test_recursive_manifest_rejected() {
        let raw = json!({
            "manifest": {"$A": "$B", "$B": "$A"},
            "components": {"morphologies_dir": "$A"}
        });
        assert!(CircuitDescriptor::from_value(Path::new("/c/config.json"), raw).is_err());
    }

    #[test]
    fn test_rebase_only_touches_paths_inside_source() {
        let raw = json!({
            "manifest": {"$BASE_DIR": "/data/circuit", "$SHARED": "/shared/lib"},
            "run": {"output": "/data/circuit/out"}
        });
        let d = CircuitDescriptor::from_value(Path::new("/data/circuit/config.json"), raw).unwrap();
        let rebased = d.rebased_raw(Path::new("/data/circuit"), Path::new("/data/reduced"));
        assert_eq!(rebased["manifest"]["$BASE_DIR"], "/data/reduced");
        assert_eq!(rebased["manifest"]["$SHARED"], "/shared/lib");
        assert_eq!(rebased["run"]["output"], "/data/circuit/out");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(morphology_file_name("x.SWC"), "x.SWC");
        assert_eq!(morphology_file_name("x"), "x.swc");
    }
}
