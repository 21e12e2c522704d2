// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Biophysical parameter files and discretisation rules.
//!
//! A biophysics file assigns membrane properties per section list and decides
//! how many segments each section is split into. Units follow NEURON: µm for
//! geometry, Ω·cm for `Ra`, µF/cm² for `cm`, S/cm² for conductances.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BiophysicsError, BiophysicsResult};
use crate::swc::SectionType;

/// Passive leak conductance used when a section list does not set `g_pas`
pub const DEFAULT_G_PAS: f64 = 3e-5;
pub const DEFAULT_CM: f64 = 1.0;
pub const DEFAULT_RA: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionList {
    Somatic,
    Axonal,
    Basal,
    Apical,
}

impl SectionList {
    pub fn name(self) -> &'static str {
        match self {
            SectionList::Somatic => "somatic",
            SectionList::Axonal => "axonal",
            SectionList::Basal => "basal",
            SectionList::Apical => "apical",
        }
    }
}

impl From<SectionType> for SectionList {
    fn from(section_type: SectionType) -> Self {
        match section_type {
            SectionType::Soma => SectionList::Somatic,
            SectionType::Axon => SectionList::Axonal,
            SectionType::Basal => SectionList::Basal,
            SectionType::Apical => SectionList::Apical,
        }
    }
}

fn default_cm() -> f64 {
    DEFAULT_CM
}

fn default_ra() -> f64 {
    DEFAULT_RA
}

/// Uniform parameters of one section list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionListParams {
    #[serde(default = "default_cm")]
    pub cm: f64,
    #[serde(rename = "Ra", default = "default_ra")]
    pub ra: f64,
    #[serde(default)]
    pub mechanisms: Vec<String>,
    /// Mechanism parameters by full NEURON name, e.g. `gnabar_hh`
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

impl Default for SectionListParams {
    fn default() -> Self {
        Self {
            cm: DEFAULT_CM,
            ra: DEFAULT_RA,
            mechanisms: Vec::new(),
            params: BTreeMap::new(),
        }
    }
}

impl SectionListParams {
    pub fn g_pas(&self) -> f64 {
        self.params.get("g_pas").copied().unwrap_or(DEFAULT_G_PAS)
    }
}

/// How sections without an explicit `nseg` entry are discretised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum NsegRule {
    /// Segments no longer than `d_lambda` of the AC length constant at `frequency`
    DLambda { d_lambda: f64, frequency: f64 },
    /// Odd segment count keeping segments under `max_length` µm
    MaxLength { max_length: f64 },
    Fixed { nseg: u32 },
}

impl Default for NsegRule {
    fn default() -> Self {
        NsegRule::DLambda {
            d_lambda: 0.1,
            frequency: 100.0,
        }
    }
}

impl NsegRule {
    pub fn nseg(&self, length: f64, diameter: f64, ra: f64, cm: f64) -> u32 {
        match *self {
            NsegRule::DLambda { d_lambda, frequency } => {
                d_lambda_nseg(length, diameter, ra, cm, frequency, d_lambda)
            }
            NsegRule::MaxLength { max_length } => {
                1 + 2 * (length / (2.0 * max_length)).floor().max(0.0) as u32
            }
            NsegRule::Fixed { nseg } => nseg,
        }
    }

    fn validate(&self) -> BiophysicsResult<()> {
        let ok = match *self {
            NsegRule::DLambda { d_lambda, frequency } => {
                d_lambda > 0.0 && d_lambda.is_finite() && frequency >= 0.0 && frequency.is_finite()
            }
            NsegRule::MaxLength { max_length } => max_length > 0.0 && max_length.is_finite(),
            NsegRule::Fixed { nseg } => nseg > 0,
        };
        if ok {
            Ok(())
        } else {
            Err(BiophysicsError::InvalidValue(format!("nseg_rule {:?}", self)))
        }
    }
}

/// Cell-wide biophysical parameter set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Biophysics {
    /// Morphology this parameter set was written for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morphology: Option<String>,
    pub section_lists: BTreeMap<SectionList, SectionListParams>,
    /// Explicit segment counts by section name (`dend[3]`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nseg: BTreeMap<String, u32>,
    #[serde(default)]
    pub nseg_rule: NsegRule,
}

impl Biophysics {
    pub fn from_json(text: &str) -> BiophysicsResult<Self> {
        let biophysics: Biophysics = serde_json::from_str(text)?;
        biophysics.validate()?;
        Ok(biophysics)
    }

    pub fn load(path: &Path) -> BiophysicsResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| BiophysicsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn to_json_pretty(&self) -> BiophysicsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn section_list(&self, list: SectionList) -> Option<&SectionListParams> {
        self.section_lists.get(&list)
    }

    pub fn validate(&self) -> BiophysicsResult<()> {
        for (list, params) in &self.section_lists {
            if !(params.cm > 0.0 && params.cm.is_finite()) {
                return Err(BiophysicsError::InvalidValue(format!(
                    "{}.cm = {}",
                    list.name(),
                    params.cm
                )));
            }
            if !(params.ra > 0.0 && params.ra.is_finite()) {
                return Err(BiophysicsError::InvalidValue(format!(
                    "{}.Ra = {}",
                    list.name(),
                    params.ra
                )));
            }
        }
        self.nseg_rule.validate()
    }
}

/// NEURON's `lambda_f`: AC length constant (µm) at `frequency` Hz
///
/// Returns infinity at 0 Hz.
pub fn lambda_f(diameter: f64, ra: f64, cm: f64, frequency: f64) -> f64 {
    1e5 * (diameter / (4.0 * PI * frequency * ra * cm)).sqrt()
}

/// Segment count from the d_lambda rule (always odd, at least 1)
pub fn d_lambda_nseg(
    length: f64,
    diameter: f64,
    ra: f64,
    cm: f64,
    frequency: f64,
    d_lambda: f64,
) -> u32 {
    let lambda = lambda_f(diameter, ra, cm, frequency);
    let ratio = if lambda.is_finite() && lambda > 0.0 {
        length / (d_lambda * lambda)
    } else {
        0.0
    };
    (((ratio + 0.9) / 2.0).floor().max(0.0) as u32) * 2 + 1
}

/// Length constant (µm) of a passive cable with membrane admittance
/// `g_pas + jωcm`
///
/// At 0 Hz this is the DC space constant. Infinite or NaN when the
/// membrane admittance vanishes.
pub fn complex_length_constant(diameter: f64, ra: f64, cm: f64, g_pas: f64, frequency: f64) -> f64 {
    let omega = 2.0 * PI * frequency;
    // µF/cm² -> F/cm²
    let susceptance = omega * cm * 1e-6;
    let admittance = (g_pas * g_pas + susceptance * susceptance).sqrt();
    let diameter_cm = diameter * 1e-4;
    (diameter_cm / (4.0 * ra * admittance)).sqrt() * 1e4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_d_lambda_matches_neuron() {
        // lambda_f(100 Hz) for d=1 µm, Ra=100, cm=1 is ~281 µm
        let lambda = lambda_f(1.0, 100.0, 1.0, 100.0);
        assert!((lambda - 282.09).abs() < 0.1, "lambda = {}", lambda);
        assert_eq!(d_lambda_nseg(10.0, 1.0, 100.0, 1.0, 100.0, 0.1), 1);
        assert_eq!(d_lambda_nseg(100.0, 1.0, 100.0, 1.0, 100.0, 0.1), 5);
        // DC: infinite lambda, one segment
        assert_eq!(d_lambda_nseg(1000.0, 1.0, 100.0, 1.0, 0.0, 0.1), 1);
    }

    #[test]
    fn test_max_length_rule_is_odd() {
        let rule = NsegRule::MaxLength { max_length: 40.0 };
        assert_eq!(rule.nseg(30.0, 1.0, 100.0, 1.0), 1);
        assert_eq!(rule.nseg(100.0, 1.0, 100.0, 1.0), 3);
        assert_eq!(rule.nseg(400.0, 1.0, 100.0, 1.0), 11);
    }

    #[test]
    fn test_dc_space_constant() {
        // d=2 µm, Ra=100 Ω·cm, Rm=1/3e-5 Ω·cm² -> sqrt(Rm d / 4 Ra) ≈ 1291 µm
        let lambda = complex_length_constant(2.0, 100.0, 1.0, 3e-5, 0.0);
        assert!((lambda - 1290.99).abs() < 0.1, "lambda = {}", lambda);
        // a higher frequency shortens the cable
        assert!(complex_length_constant(2.0, 100.0, 1.0, 3e-5, 100.0) < lambda);
        assert!(!complex_length_constant(2.0, 100.0, 1.0, 0.0, 0.0).is_finite());
    }

    #[test]
    fn test_parse_and_defaults() {
        let json = r#"{
            "section_lists": {
                "somatic": {"cm": 1.0, "Ra": 150.0, "mechanisms": ["hh"], "params": {"gnabar_hh": 0.12}},
                "basal": {"params": {"g_pas": 1e-4}}
            },
            "nseg": {"soma[0]": 1}
        }"#;
        let biophysics = Biophysics::from_json(json).unwrap();
        let basal = biophysics.section_list(SectionList::Basal).unwrap();
        assert_eq!(basal.ra, DEFAULT_RA);
        assert_eq!(basal.g_pas(), 1e-4);
        assert_eq!(
            biophysics.section_list(SectionList::Somatic).unwrap().g_pas(),
            DEFAULT_G_PAS
        );
        assert_eq!(biophysics.nseg_rule, NsegRule::default());

        let text = biophysics.to_json_pretty().unwrap();
        assert_eq!(Biophysics::from_json(&text).unwrap(), biophysics);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let json = r#"{"section_lists": {"somatic": {"Ra": -1.0}}}"#;
        assert!(matches!(
            Biophysics::from_json(json),
            Err(BiophysicsError::InvalidValue(_))
        ));
        let json = r#"{"section_lists": {}, "nseg_rule": {"rule": "fixed", "nseg": 0}}"#;
        assert!(Biophysics::from_json(json).is_err());
    }
}
