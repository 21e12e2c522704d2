// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simulation collaborator.
//!
//! Cells are instantiated through an explicit session handle. A session hosts
//! at most one cell and releases it on teardown. Only a simulator that reports
//! [`Simulator::is_reentrant`] may have sessions open on several threads.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::biophysics::Biophysics;
use crate::cell::Cell;
use crate::error::{SimulatorError, SimulatorResult};
use crate::swc::Morphology;

/// A source of isolated simulator sessions
pub trait Simulator: Send + Sync {
    fn name(&self) -> &str;

    /// Open a fresh session
    fn acquire(&self) -> SimulatorResult<Box<dyn SimulatorSession>>;

    /// Sessions share no process-wide state and may live on different
    /// threads at the same time. When false, callers run one session at a
    /// time and release it before acquiring the next.
    fn is_reentrant(&self) -> bool {
        false
    }
}

/// One isolated simulator instance
pub trait SimulatorSession: Send {
    /// Instantiate the cell described by a morphology file and parameter set
    ///
    /// # Errors
    ///
    /// `SessionBusy` if the session already hosts a cell.
    fn instantiate(&mut self, morphology: &Path, biophysics: &Biophysics) -> SimulatorResult<Cell>;

    /// Name of the hosted cell, if any
    fn hosted(&self) -> Option<&str>;

    /// Tear down the hosted cell. Also happens on drop.
    fn release(&mut self);
}

/// Built-in passive cable simulator
///
/// Reads SWC morphologies and JSON biophysics and discretises sections with
/// the parameter set's segment rule.
#[derive(Debug, Default)]
pub struct CableSimulator {
    sessions_opened: AtomicU64,
}

impl CableSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }
}

impl Simulator for CableSimulator {
    fn name(&self) -> &str {
        "cable"
    }

    fn acquire(&self) -> SimulatorResult<Box<dyn SimulatorSession>> {
        let id = self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        trace!(target: "snr-morphology", "[SIM] Opened cable session {}", id);
        Ok(Box::new(CableSession { id, hosted: None }))
    }

    // every cell lives in its own session
    fn is_reentrant(&self) -> bool {
        true
    }
}

struct CableSession {
    id: u64,
    hosted: Option<String>,
}

impl SimulatorSession for CableSession {
    fn instantiate(&mut self, morphology: &Path, biophysics: &Biophysics) -> SimulatorResult<Cell> {
        if let Some(current) = &self.hosted {
            return Err(SimulatorError::SessionBusy(current.clone()));
        }
        let geometry = Morphology::load(morphology)?;
        let name = morphology
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cell".to_string());
        let cell = Cell::from_morphology(name.clone(), &geometry, biophysics)?;
        debug!(
            target: "snr-morphology",
            "[SIM] Session {} instantiated {} ({} sections, {} segments)",
            self.id,
            name,
            cell.section_count(),
            cell.segment_count()
        );
        self.hosted = Some(name);
        Ok(cell)
    }

    fn hosted(&self) -> Option<&str> {
        self.hosted.as_deref()
    }

    fn release(&mut self) {
        if let Some(name) = self.hosted.take() {
            trace!(target: "snr-morphology", "[SIM] Session {} released {}", self.id, name);
        }
    }
}

impl Drop for CableSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biophysics::{SectionList, SectionListParams};
    use std::collections::BTreeMap;

    const CELL: &str = "\
1 1 0 0 0 5 -1
2 3 5 0 0 1 1
3 3 50 0 0 1 2
4 2 -5 0 0 0.5 1
5 2 -80 0 0 0.5 4
";

    fn biophysics() -> Biophysics {
        let mut section_lists = BTreeMap::new();
        for list in [SectionList::Somatic, SectionList::Axonal, SectionList::Basal] {
            section_lists.insert(list, SectionListParams::default());
        }
        Biophysics {
            morphology: None,
            section_lists,
            nseg: BTreeMap::new(),
            nseg_rule: Default::default(),
        }
    }

    #[test]
    fn test_cable_simulator_is_reentrant() {
        assert!(CableSimulator::new().is_reentrant());
    }

    #[test]
    fn test_session_hosts_one_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyr.swc");
        std::fs::write(&path, CELL).unwrap();

        let simulator = CableSimulator::new();
        let mut session = simulator.acquire().unwrap();
        let cell = session.instantiate(&path, &biophysics()).unwrap();
        assert_eq!(cell.name(), "pyr");
        assert_eq!(cell.section_count(), 3);
        assert_eq!(session.hosted(), Some("pyr"));

        assert!(matches!(
            session.instantiate(&path, &biophysics()),
            Err(SimulatorError::SessionBusy(_))
        ));
        session.release();
        assert!(session.instantiate(&path, &biophysics()).is_ok());
        assert_eq!(simulator.sessions_opened(), 1);
    }

    #[test]
    fn test_missing_section_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyr.swc");
        std::fs::write(&path, CELL).unwrap();

        let mut biophysics = biophysics();
        biophysics.section_lists.remove(&SectionList::Axonal);
        let mut session = CableSimulator::new().acquire().unwrap();
        assert!(matches!(
            session.instantiate(&path, &biophysics),
            Err(SimulatorError::MissingSectionList { list, .. }) if list == "axonal"
        ));
        assert_eq!(session.hosted(), None);
    }
}
