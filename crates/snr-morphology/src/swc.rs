// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
SWC morphology codec.

Samples are grouped into unbranched sections the way NEURON imports them:
- every soma sample (type 1) belongs to a single soma section
- a new section starts at a neurite root, after a branch point, or where the
  structure type changes
- a child section repeats its parent's last sample as its first point;
  soma-rooted neurites do not

Samples must be listed after their parent, which also guarantees that every
section appears after its parent section.
*/

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MorphologyError, MorphologyResult};

/// Morphological structure type (SWC codes 1-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Soma,
    Axon,
    Basal,
    Apical,
}

impl SectionType {
    pub fn from_swc(code: i32) -> Option<Self> {
        match code {
            1 => Some(SectionType::Soma),
            2 => Some(SectionType::Axon),
            3 => Some(SectionType::Basal),
            4 => Some(SectionType::Apical),
            _ => None,
        }
    }

    pub fn swc_code(self) -> i32 {
        match self {
            SectionType::Soma => 1,
            SectionType::Axon => 2,
            SectionType::Basal => 3,
            SectionType::Apical => 4,
        }
    }

    pub fn is_dendrite(self) -> bool {
        matches!(self, SectionType::Basal | SectionType::Apical)
    }

    /// NEURON section array name
    pub fn name_prefix(self) -> &'static str {
        match self {
            SectionType::Soma => "soma",
            SectionType::Axon => "axon",
            SectionType::Basal => "dend",
            SectionType::Apical => "apic",
        }
    }
}

/// A 3-D sample with its diameter (µm)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub diameter: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64, diameter: f64) -> Self {
        Self { x, y, z, diameter }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// One unbranched piece of a morphology
#[derive(Debug, Clone, PartialEq)]
pub struct MorphologySection {
    pub section_type: SectionType,
    /// Index of the parent section; `None` for the soma and for detached neurites
    pub parent: Option<usize>,
    pub points: Vec<Point>,
}

/// Parsed morphology; section 0 is always the soma
#[derive(Debug, Clone, PartialEq)]
pub struct Morphology {
    pub sections: Vec<MorphologySection>,
}

struct Sample {
    id: i64,
    section_type: SectionType,
    point: Point,
    parent: Option<usize>,
}

impl Morphology {
    /// Read a morphology from disk; only `.swc` files are understood
    pub fn load(path: &Path) -> MorphologyResult<Self> {
        let is_swc = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("swc"))
            .unwrap_or(false);
        if !is_swc {
            return Err(MorphologyError::UnsupportedFormat(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| MorphologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_swc(&text)
    }

    pub fn parse_swc(text: &str) -> MorphologyResult<Self> {
        let samples = parse_samples(text)?;
        build_sections(&samples)
    }

    pub fn soma(&self) -> &MorphologySection {
        &self.sections[0]
    }

    /// Serialize to SWC, renumbering samples from 1
    pub fn to_swc(&self) -> MorphologyResult<String> {
        let mut out = String::from("# id type x y z radius parent\n");
        let mut next_id: i64 = 1;
        // id of the last sample written for each section
        let mut last_ids: Vec<i64> = Vec::with_capacity(self.sections.len());

        for (index, section) in self.sections.iter().enumerate() {
            if section.points.is_empty() {
                return Err(MorphologyError::InvalidStructure(format!(
                    "section {} has no points",
                    index
                )));
            }

            let (points, mut parent_id): (&[Point], i64) = match section.parent {
                None => (&section.points[..], -1),
                // soma-rooted neurites attach to the first soma sample
                Some(0) => (&section.points[..], 1),
                Some(parent) if parent < index => {
                    let skip = usize::from(section.points.len() > 1);
                    (&section.points[skip..], last_ids[parent])
                }
                Some(parent) => {
                    return Err(MorphologyError::InvalidStructure(format!(
                        "section {} is listed before its parent {}",
                        index, parent
                    )))
                }
            };

            for point in points {
                // `{}` on f64 is round-trip exact
                let _ = writeln!(
                    out,
                    "{} {} {} {} {} {} {}",
                    next_id,
                    section.section_type.swc_code(),
                    point.x,
                    point.y,
                    point.z,
                    point.diameter / 2.0,
                    parent_id
                );
                parent_id = next_id;
                next_id += 1;
            }
            last_ids.push(parent_id);
        }
        Ok(out)
    }
}

fn parse_samples(text: &str) -> MorphologyResult<Vec<Sample>> {
    let mut samples: Vec<Sample> = Vec::new();
    let mut positions: HashMap<i64, usize> = HashMap::new();

    for (line_index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            return Err(MorphologyError::Parse {
                line: line_no,
                reason: format!("expected 7 columns, found {}", fields.len()),
            });
        }

        let int = |s: &str| -> MorphologyResult<i64> {
            s.parse::<i64>().map_err(|_| MorphologyError::Parse {
                line: line_no,
                reason: format!("'{}' is not an integer", s),
            })
        };
        let float = |s: &str| -> MorphologyResult<f64> {
            s.parse::<f64>().map_err(|_| MorphologyError::Parse {
                line: line_no,
                reason: format!("'{}' is not a number", s),
            })
        };

        let id = int(fields[0])?;
        let raw_code = int(fields[1])?;
        let code = i32::try_from(raw_code).map_err(|_| MorphologyError::Parse {
            line: line_no,
            reason: format!("type code {} out of range", raw_code),
        })?;
        let (x, y, z, radius) = (
            float(fields[2])?,
            float(fields[3])?,
            float(fields[4])?,
            float(fields[5])?,
        );
        let parent_id = int(fields[6])?;

        let section_type = SectionType::from_swc(code)
            .ok_or(MorphologyError::UnsupportedSectionType { id, code })?;

        let parent = if parent_id < 0 {
            None
        } else {
            match positions.get(&parent_id) {
                Some(&position) => Some(position),
                None if text_defines(text, parent_id) => {
                    return Err(MorphologyError::ParentAfterChild { id, parent: parent_id })
                }
                None => return Err(MorphologyError::UnknownParent { id, parent: parent_id }),
            }
        };

        if positions.insert(id, samples.len()).is_some() {
            return Err(MorphologyError::DuplicateSample(id));
        }
        samples.push(Sample {
            id,
            section_type,
            point: Point::new(x, y, z, radius * 2.0),
            parent,
        });
    }

    Ok(samples)
}

/// Whether any data line of `text` declares sample `id`
fn text_defines(text: &str, id: i64) -> bool {
    text.lines().any(|raw| {
        raw.split('#')
            .next()
            .and_then(|line| line.split_whitespace().next())
            .and_then(|first| first.parse::<i64>().ok())
            == Some(id)
    })
}

fn build_sections(samples: &[Sample]) -> MorphologyResult<Morphology> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); samples.len()];
    for (index, sample) in samples.iter().enumerate() {
        if let Some(parent) = sample.parent {
            children[parent].push(index);
        }
    }

    let is_soma = |index: usize| samples[index].section_type == SectionType::Soma;

    let soma_points: Vec<Point> = samples
        .iter()
        .filter(|s| s.section_type == SectionType::Soma)
        .map(|s| s.point)
        .collect();
    if soma_points.is_empty() {
        return Err(MorphologyError::NoSoma);
    }
    for sample in samples.iter().filter(|s| s.section_type == SectionType::Soma) {
        if let Some(parent) = sample.parent {
            if !is_soma(parent) {
                return Err(MorphologyError::InvalidStructure(format!(
                    "soma sample {} hangs off neurite sample {}",
                    sample.id, samples[parent].id
                )));
            }
        }
    }

    let starts_section = |index: usize| -> bool {
        let sample = &samples[index];
        match sample.parent {
            None => true,
            Some(parent) if is_soma(parent) => true,
            Some(parent) => {
                let siblings = children[parent].iter().filter(|&&c| !is_soma(c)).count();
                siblings > 1 || samples[parent].section_type != sample.section_type
            }
        }
    };

    let mut sections = vec![MorphologySection {
        section_type: SectionType::Soma,
        parent: None,
        points: soma_points,
    }];
    let mut section_of_sample: Vec<Option<usize>> = vec![None; samples.len()];
    for (index, sample) in samples.iter().enumerate() {
        if sample.section_type == SectionType::Soma {
            section_of_sample[index] = Some(0);
        }
    }

    for start in (0..samples.len()).filter(|&i| !is_soma(i) && starts_section(i)) {
        let section_index = sections.len();
        let sample = &samples[start];

        let (parent_section, mut points) = match sample.parent {
            None => (None, Vec::new()),
            Some(parent) if is_soma(parent) => (Some(0), Vec::new()),
            Some(parent) => {
                let parent_section = section_of_sample[parent].ok_or_else(|| {
                    MorphologyError::InvalidStructure(format!(
                        "sample {} is not assigned to a section",
                        samples[parent].id
                    ))
                })?;
                (Some(parent_section), vec![samples[parent].point])
            }
        };

        let mut current = start;
        loop {
            points.push(samples[current].point);
            section_of_sample[current] = Some(section_index);
            let next = &children[current];
            if next.len() == 1 && !starts_section(next[0]) {
                current = next[0];
            } else {
                break;
            }
        }

        sections.push(MorphologySection {
            section_type: sample.section_type,
            parent: parent_section,
            points,
        });
    }

    Ok(Morphology { sections })
}

#[cfg(test)]
mod tests {
    use super::*;

    const Y_CELL: &str = "\
# soma, a basal fork, an axon
1 1 0 0 0 5 -1
2 1 0 5 0 5 1
3 3 10 0 0 1 1
4 3 20 0 0 1 3
5 3 30 10 0 0.5 4
6 3 30 -10 0 0.5 4
7 2 -10 0 0 0.5 1
8 2 -20 0 0 0.5 7
";

    #[test]
    fn test_sections_split_at_branch_points() {
        let morphology = Morphology::parse_swc(Y_CELL).unwrap();
        let types: Vec<_> = morphology.sections.iter().map(|s| s.section_type).collect();
        assert_eq!(
            types,
            vec![
                SectionType::Soma,
                SectionType::Basal,
                SectionType::Basal,
                SectionType::Basal,
                SectionType::Axon
            ]
        );
        assert_eq!(morphology.soma().points.len(), 2);
        // stem: samples 3,4
        assert_eq!(morphology.sections[1].points.len(), 2);
        assert_eq!(morphology.sections[1].parent, Some(0));
        // branches repeat the fork point
        assert_eq!(morphology.sections[2].parent, Some(1));
        assert_eq!(morphology.sections[2].points[0], morphology.sections[1].points[1]);
        assert_eq!(morphology.sections[4].points.len(), 2);
    }

    #[test]
    fn test_round_trip_preserves_sections() {
        let morphology = Morphology::parse_swc(Y_CELL).unwrap();
        let written = morphology.to_swc().unwrap();
        let reparsed = Morphology::parse_swc(&written).unwrap();
        assert_eq!(morphology, reparsed);
    }

    #[test]
    fn test_type_change_starts_section() {
        let swc = "1 1 0 0 0 5 -1\n2 3 5 0 0 1 1\n3 4 10 0 0 1 2\n";
        let morphology = Morphology::parse_swc(swc).unwrap();
        assert_eq!(morphology.sections.len(), 3);
        assert_eq!(morphology.sections[2].section_type, SectionType::Apical);
        assert_eq!(morphology.sections[2].parent, Some(1));
    }

    #[test]
    fn test_structural_errors() {
        assert!(matches!(
            Morphology::parse_swc("1 3 0 0 0 1 -1\n"),
            Err(MorphologyError::NoSoma)
        ));
        assert!(matches!(
            Morphology::parse_swc("1 1 0 0 0 1 -1\n2 3 0 0 0 1 9\n"),
            Err(MorphologyError::UnknownParent { id: 2, parent: 9 })
        ));
        assert!(matches!(
            Morphology::parse_swc("1 1 0 0 0 1 -1\n2 3 0 0 0 1 3\n3 3 1 0 0 1 1\n"),
            Err(MorphologyError::ParentAfterChild { id: 2, parent: 3 })
        ));
        assert!(matches!(
            Morphology::parse_swc("1 1 0 0 0 1 -1\n2 7 0 0 0 1 1\n"),
            Err(MorphologyError::UnsupportedSectionType { id: 2, code: 7 })
        ));
        assert!(matches!(
            Morphology::parse_swc("1 1 0 0 0 1\n"),
            Err(MorphologyError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_oversized_type_code_rejected() {
        // 2^32 + 1 must not wrap around to the soma code
        assert!(matches!(
            Morphology::parse_swc("1 4294967297 0 0 0 1 -1\n"),
            Err(MorphologyError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_non_swc_extension_rejected() {
        let err = Morphology::load(Path::new("cell.asc")).unwrap_err();
        assert!(matches!(err, MorphologyError::UnsupportedFormat(_)));
    }
}
