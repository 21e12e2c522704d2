// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Instantiated cells: sections with geometry, membrane properties and a
//! fixed segment count.

use std::collections::BTreeMap;

use crate::biophysics::{Biophysics, SectionList, SectionListParams};
use crate::error::{MorphologyError, MorphologyResult};
use crate::swc::{Morphology, MorphologySection, Point, SectionType};

/// Membrane properties of one section
#[derive(Debug, Clone, PartialEq)]
pub struct SectionProperties {
    pub cm: f64,
    pub ra: f64,
    pub g_pas: f64,
    pub mechanisms: Vec<String>,
    pub params: BTreeMap<String, f64>,
}

impl From<&SectionListParams> for SectionProperties {
    fn from(params: &SectionListParams) -> Self {
        Self {
            cm: params.cm,
            ra: params.ra,
            g_pas: params.g_pas(),
            mechanisms: params.mechanisms.clone(),
            params: params.params.clone(),
        }
    }
}

impl SectionProperties {
    pub fn to_params(&self) -> SectionListParams {
        SectionListParams {
            cm: self.cm,
            ra: self.ra,
            mechanisms: self.mechanisms.clone(),
            params: self.params.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// NEURON-style name, e.g. `dend[2]`
    pub name: String,
    pub section_type: SectionType,
    pub parent: Option<usize>,
    pub points: Vec<Point>,
    pub nseg: u32,
    pub properties: SectionProperties,
}

impl Section {
    /// Path length in µm. A single-point section (point soma) is treated as a
    /// cylinder as long as it is wide.
    pub fn length(&self) -> f64 {
        match self.points.as_slice() {
            [] => 0.0,
            [only] => only.diameter,
            points => points.windows(2).map(|w| w[0].distance(&w[1])).sum(),
        }
    }

    /// Length-weighted mean diameter
    pub fn mean_diameter(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let length = self.length();
        if self.points.len() == 1 || length <= 0.0 {
            let sum: f64 = self.points.iter().map(|p| p.diameter).sum();
            return sum / self.points.len() as f64;
        }
        let weighted: f64 = self
            .points
            .windows(2)
            .map(|w| w[0].distance(&w[1]) * (w[0].diameter + w[1].diameter) / 2.0)
            .sum();
        weighted / length
    }

    /// Normalised position interval `[start, end)` of segment `k`
    pub fn segment_bounds(&self, segment: u32) -> (f64, f64) {
        let n = f64::from(self.nseg.max(1));
        (f64::from(segment) / n, f64::from(segment + 1) / n)
    }

    /// Unit vector from the first point towards the last, `None` when degenerate
    pub fn direction(&self) -> Option<[f64; 3]> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        let d = [last.x - first.x, last.y - first.y, last.z - first.z];
        let norm = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        if norm > 0.0 {
            Some([d[0] / norm, d[1] / norm, d[2] / norm])
        } else {
            None
        }
    }

    /// 3-D position at normalised arc position `x`
    pub fn point_at(&self, x: f64) -> Option<[f64; 3]> {
        let first = self.points.first()?;
        let total = self.length();
        if self.points.len() == 1 || total <= 0.0 {
            return Some([first.x, first.y, first.z]);
        }
        let target = x.clamp(0.0, 1.0) * total;
        let mut walked = 0.0;
        for pair in self.points.windows(2) {
            let step = pair[0].distance(&pair[1]);
            if walked + step >= target && step > 0.0 {
                let t = (target - walked) / step;
                return Some([
                    pair[0].x + t * (pair[1].x - pair[0].x),
                    pair[0].y + t * (pair[1].y - pair[0].y),
                    pair[0].z + t * (pair[1].z - pair[0].z),
                ]);
            }
            walked += step;
        }
        self.points.last().map(|p| [p.x, p.y, p.z])
    }
}

/// A cell as instantiated by a simulator
///
/// Sections are held in instantiation order: the soma first, every other
/// section after its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    name: String,
    sections: Vec<Section>,
}

impl Cell {
    pub fn new(name: impl Into<String>, sections: Vec<Section>) -> MorphologyResult<Self> {
        match sections.first() {
            Some(soma) if soma.section_type == SectionType::Soma && soma.parent.is_none() => {}
            _ => return Err(MorphologyError::NoSoma),
        }
        for (index, section) in sections.iter().enumerate().skip(1) {
            if section.section_type == SectionType::Soma {
                return Err(MorphologyError::InvalidStructure(format!(
                    "second soma section {}",
                    section.name
                )));
            }
            if let Some(parent) = section.parent {
                if parent >= index {
                    return Err(MorphologyError::InvalidStructure(format!(
                        "section {} precedes its parent",
                        section.name
                    )));
                }
            }
        }
        Ok(Self {
            name: name.into(),
            sections,
        })
    }

    /// Build from a morphology and a biophysics parameter set
    ///
    /// Section names are numbered per type in morphology order. Segment counts
    /// come from the explicit `nseg` map when present, otherwise from the
    /// discretisation rule.
    pub fn from_morphology(
        name: impl Into<String>,
        morphology: &Morphology,
        biophysics: &Biophysics,
    ) -> Result<Self, crate::error::SimulatorError> {
        let mut counters: BTreeMap<SectionType, usize> = BTreeMap::new();
        let mut sections = Vec::with_capacity(morphology.sections.len());

        for source in &morphology.sections {
            let counter = counters.entry(source.section_type).or_insert(0);
            let section_name = format!("{}[{}]", source.section_type.name_prefix(), counter);
            *counter += 1;

            let list = SectionList::from(source.section_type);
            let params = biophysics.section_list(list).ok_or_else(|| {
                crate::error::SimulatorError::MissingSectionList {
                    list: list.name().to_string(),
                    section: section_name.clone(),
                }
            })?;

            let mut section = Section {
                name: section_name,
                section_type: source.section_type,
                parent: source.parent,
                points: source.points.clone(),
                nseg: 0,
                properties: SectionProperties::from(params),
            };
            section.nseg = match biophysics.nseg.get(&section.name) {
                Some(&explicit) => explicit,
                None => biophysics.nseg_rule.nseg(
                    section.length(),
                    section.mean_diameter(),
                    params.ra,
                    params.cm,
                ),
            };
            sections.push(section);
        }

        Ok(Self::new(name, sections)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn soma(&self) -> &Section {
        &self.sections[0]
    }

    /// Child section indices in instantiation order
    pub fn children(&self, index: usize) -> Vec<usize> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.parent == Some(index))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn segment_count(&self) -> usize {
        self.sections.iter().map(|s| s.nseg as usize).sum()
    }

    /// Geometry for persistence
    pub fn to_morphology(&self) -> Morphology {
        Morphology {
            sections: self
                .sections
                .iter()
                .map(|s| MorphologySection {
                    section_type: s.section_type,
                    parent: s.parent,
                    points: s.points.clone(),
                })
                .collect(),
        }
    }

    /// Biophysics reproducing this cell's parameters and exact segment layout
    pub fn to_biophysics(&self, morphology_name: Option<String>) -> Biophysics {
        let mut section_lists = BTreeMap::new();
        for section in &self.sections {
            section_lists
                .entry(SectionList::from(section.section_type))
                .or_insert_with(|| section.properties.to_params());
        }
        Biophysics {
            morphology: morphology_name,
            section_lists,
            nseg: self
                .sections
                .iter()
                .map(|s| (s.name.clone(), s.nseg))
                .collect(),
            nseg_rule: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(points: Vec<Point>) -> Section {
        Section {
            name: "dend[0]".to_string(),
            section_type: SectionType::Basal,
            parent: Some(0),
            points,
            nseg: 4,
            properties: SectionProperties::from(&SectionListParams::default()),
        }
    }

    #[test]
    fn test_geometry() {
        let s = section(vec![
            Point::new(0.0, 0.0, 0.0, 2.0),
            Point::new(10.0, 0.0, 0.0, 2.0),
            Point::new(10.0, 30.0, 0.0, 1.0),
        ]);
        assert_eq!(s.length(), 40.0);
        // 10 µm at 2.0, 30 µm averaging 1.5
        assert!((s.mean_diameter() - 1.625).abs() < 1e-12);
        let mid = s.point_at(0.5).unwrap();
        assert!((mid[0] - 10.0).abs() < 1e-9 && (mid[1] - 10.0).abs() < 1e-9);
        assert_eq!(s.segment_bounds(1), (0.25, 0.5));
        let direction = s.direction().unwrap();
        assert!((direction[0] - 10.0 / 1000f64.sqrt()).abs() < 1e-12);
        assert!((direction[1] - 30.0 / 1000f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_point_soma_length_is_diameter() {
        let mut soma = section(vec![Point::new(0.0, 0.0, 0.0, 12.0)]);
        soma.section_type = SectionType::Soma;
        assert_eq!(soma.length(), 12.0);
        assert_eq!(soma.direction(), None);
    }

    #[test]
    fn test_cell_requires_soma_first() {
        let dendrite = section(vec![Point::new(0.0, 0.0, 0.0, 1.0)]);
        assert!(matches!(
            Cell::new("c", vec![dendrite]),
            Err(MorphologyError::NoSoma)
        ));
    }
}
