use std::collections::BTreeMap;
use std::path::PathBuf;

use htcore::signal::stability::BunchStability;

use crate::data::dataset::{HtDataset, TurnRange};
use crate::data::plane::{Plane, Signal};
use crate::data::raw::{attr_i64, attr_str, RawFile};
use crate::error::HtError;

/// Fixed pair of per-plane values.
#[derive(Debug, Clone, Default)]
pub struct PerPlane<T> {
    pub horizontal: T,
    pub vertical: T,
}

impl<T> PerPlane<T> {
    pub fn get(&self, plane: Plane) -> &T {
        match plane {
            Plane::Horizontal => &self.horizontal,
            Plane::Vertical => &self.vertical,
        }
    }

    pub fn get_mut(&mut self, plane: Plane) -> &mut T {
        match plane {
            Plane::Horizontal => &mut self.horizontal,
            Plane::Vertical => &mut self.vertical,
        }
    }
}

/// The four `plane x signal` dataset slots of an acquisition, any of which
/// may be absent.
#[derive(Default)]
pub struct DatasetGroup {
    slots: [[Option<HtDataset>; 2]; 2],
}

impl DatasetGroup {
    fn idx(plane: Plane, signal: Signal) -> (usize, usize) {
        let p = match plane {
            Plane::Horizontal => 0,
            Plane::Vertical => 1,
        };
        let s = match signal {
            Signal::Delta => 0,
            Signal::Sigma => 1,
        };
        (p, s)
    }

    pub fn get(&self, plane: Plane, signal: Signal) -> Option<&HtDataset> {
        let (p, s) = Self::idx(plane, signal);
        self.slots[p][s].as_ref()
    }

    pub fn get_mut(&mut self, plane: Plane, signal: Signal) -> Option<&mut HtDataset> {
        let (p, s) = Self::idx(plane, signal);
        self.slots[p][s].as_mut()
    }

    pub fn set(&mut self, plane: Plane, signal: Signal, dataset: Option<HtDataset>) {
        let (p, s) = Self::idx(plane, signal);
        self.slots[p][s] = dataset;
    }

    pub fn clear(&mut self) {
        for row in &mut self.slots {
            for slot in row {
                *slot = None;
            }
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut HtDataset> {
        self.slots.iter_mut().flatten().filter_map(|s| s.as_mut())
    }
}

/// An open head-tail acquisition session.
///
/// Owns the datasets of one file, broadcasts shared timing parameters to all
/// of them and coordinates bunch location, overlap optimisation and
/// stability analysis. Once closed the datasets are dropped and every
/// operation fails with [`HtError::ClosedFile`].
pub struct HtFile {
    pub filename: PathBuf,
    pub filesize: u64,
    pub data: DatasetGroup,

    pub acq_stamp: i64,
    pub cycle_stamp: i64,
    pub cycle_name: String,
    pub device: String,
    pub version: i64,

    pub bunches: Vec<i64>,
    pub bunch_stability: PerPlane<BTreeMap<i64, BunchStability>>,
    pub instability_mode: PerPlane<BTreeMap<i64, f64>>,

    offset: f64,
    max_offset: f64,
    harmonic: i64,
    frev: f64,
    turn_adjust: Option<Vec<f64>>,
    populated_turns: TurnRange,
    align: bool,

    closed: bool,
}

impl HtFile {
    /// Build a session from one raw acquisition container.
    ///
    /// Datasets are resolved per plane/signal, trying each raw group name a
    /// signal may be stored under (`sigma` falls back to `sum`). Delta
    /// signals default to baseline removal.
    pub fn new(raw: RawFile) -> Self {
        let mut data = DatasetGroup::default();

        for plane in Plane::ALL {
            for signal in Signal::ALL {
                let found = signal
                    .raw_names()
                    .iter()
                    .find_map(|name| raw.dataset(&format!("{}/{}", plane, name)));
                if let Some(rd) = found {
                    let mut ds = HtDataset::from_raw(rd);
                    ds.remove_baseline = signal == Signal::Delta;
                    ds.plane = Some(plane);
                    ds.signal = Some(signal);
                    data.set(plane, signal, Some(ds));
                }
            }
        }

        HtFile {
            filename: raw.path.clone(),
            filesize: raw.size,
            data,
            acq_stamp: attr_i64(&raw.attrs, "acq_stamp", 0),
            cycle_stamp: attr_i64(&raw.attrs, "cycle_stamp", 0),
            cycle_name: attr_str(&raw.attrs, "cycle_name", "").to_string(),
            device: attr_str(&raw.attrs, "device", "").to_string(),
            version: attr_i64(&raw.attrs, "version", 0),
            bunches: Vec::new(),
            bunch_stability: PerPlane::default(),
            instability_mode: PerPlane::default(),
            offset: 0.0,
            max_offset: 0.0,
            harmonic: 0,
            frev: 0.0,
            turn_adjust: None,
            populated_turns: TurnRange::empty(),
            align: false,
            closed: false,
        }
    }

    /// Close the session. Datasets become inaccessible, further operations
    /// fail with [`HtError::ClosedFile`].
    pub fn close(&mut self) {
        if !self.closed {
            self.data.clear();
            self.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn ensure_open(&self) -> Result<(), HtError> {
        if self.closed {
            Err(HtError::ClosedFile)
        } else {
            Ok(())
        }
    }

    /// Borrow a dataset, failing on a closed session or an absent slot.
    pub fn dataset(&self, plane: Plane, signal: Signal) -> Result<&HtDataset, HtError> {
        self.ensure_open()?;
        self.data
            .get(plane, signal)
            .ok_or(HtError::MissingDataset { plane, signal })
    }

    pub fn dataset_mut(&mut self, plane: Plane, signal: Signal) -> Result<&mut HtDataset, HtError> {
        self.ensure_open()?;
        self.data
            .get_mut(plane, signal)
            .ok_or(HtError::MissingDataset { plane, signal })
    }

    pub fn has_dataset(&self, plane: Plane, signal: Signal) -> bool {
        !self.closed && self.data.get(plane, signal).is_some()
    }

    // The broadcast setters write a shared parameter through to every child
    // dataset and mirror it on the session.

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn set_offset(&mut self, val: f64) -> Result<(), HtError> {
        self.ensure_open()?;
        for ds in self.data.iter_mut() {
            ds.offset = val;
        }
        self.offset = val;
        Ok(())
    }

    pub fn max_offset(&self) -> f64 {
        self.max_offset
    }

    pub fn set_max_offset(&mut self, val: f64) -> Result<(), HtError> {
        self.ensure_open()?;
        for ds in self.data.iter_mut() {
            ds.max_offset = val;
        }
        self.max_offset = val;
        Ok(())
    }

    pub fn harmonic(&self) -> i64 {
        self.harmonic
    }

    pub fn set_harmonic(&mut self, val: i64) -> Result<(), HtError> {
        self.ensure_open()?;
        for ds in self.data.iter_mut() {
            ds.harmonic = val;
        }
        self.harmonic = val;
        Ok(())
    }

    pub fn frev(&self) -> f64 {
        self.frev
    }

    pub fn set_frev(&mut self, val: f64) -> Result<(), HtError> {
        self.ensure_open()?;
        for ds in self.data.iter_mut() {
            ds.set_frev(val);
        }
        self.frev = val;
        Ok(())
    }

    pub fn turn_adjust(&self) -> Option<&[f64]> {
        self.turn_adjust.as_deref()
    }

    pub fn set_turn_adjust(&mut self, val: Option<Vec<f64>>) -> Result<(), HtError> {
        self.ensure_open()?;
        for ds in self.data.iter_mut() {
            ds.turn_adjust = val.clone();
        }
        self.turn_adjust = val;
        Ok(())
    }

    pub fn populated_turns(&self) -> TurnRange {
        self.populated_turns
    }

    pub fn set_populated_turns(&mut self, val: TurnRange) -> Result<(), HtError> {
        self.ensure_open()?;
        for ds in self.data.iter_mut() {
            ds.populated_turns = val;
        }
        self.populated_turns = val;
        Ok(())
    }

    pub fn align(&self) -> bool {
        self.align
    }

    pub fn set_align(&mut self, val: bool) -> Result<(), HtError> {
        self.ensure_open()?;
        for ds in self.data.iter_mut() {
            ds.align = val;
        }
        self.align = val;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::SyntheticAcquisition;

    fn open_synthetic() -> HtFile {
        let gen = SyntheticAcquisition::default();
        let raw = gen.build_file(&[(2, 100.0)], &[]);
        let mut htf = HtFile::new(raw);
        htf.set_harmonic(gen.harmonic).unwrap();
        htf.set_frev(gen.revolution_period()).unwrap();
        htf
    }

    #[test]
    fn test_group_resolves_sum_alias() {
        let gen = SyntheticAcquisition::default();
        let mut raw = gen.build_file(&[(0, 50.0)], &[]);
        // rename the sigma groups the way older front-ends label them
        for ds in &mut raw.datasets {
            ds.name = ds.name.replace("/sigma", "/sum");
        }
        let htf = HtFile::new(raw);
        for plane in Plane::ALL {
            assert!(htf.has_dataset(plane, Signal::Sigma));
        }
    }

    #[test]
    fn test_delta_defaults_to_baseline_removal() {
        let htf = open_synthetic();
        assert!(htf.dataset(Plane::Horizontal, Signal::Delta).unwrap().remove_baseline);
        assert!(!htf.dataset(Plane::Horizontal, Signal::Sigma).unwrap().remove_baseline);
    }

    #[test]
    fn test_broadcast_reaches_every_dataset() {
        let mut htf = open_synthetic();
        htf.set_offset(3.0e-9).unwrap();
        htf.set_align(true).unwrap();
        for plane in Plane::ALL {
            for signal in Signal::ALL {
                let ds = htf.dataset(plane, signal).unwrap();
                assert_eq!(ds.offset, 3.0e-9);
                assert!(ds.align);
            }
        }
        assert_eq!(htf.offset(), 3.0e-9);
    }

    #[test]
    fn test_closed_file_rejects_everything() {
        let mut htf = open_synthetic();
        htf.close();
        assert!(htf.is_closed());

        assert!(matches!(
            htf.dataset(Plane::Horizontal, Signal::Sigma),
            Err(HtError::ClosedFile)
        ));
        assert!(matches!(
            htf.dataset_mut(Plane::Vertical, Signal::Delta),
            Err(HtError::ClosedFile)
        ));
        assert!(matches!(htf.set_offset(0.0), Err(HtError::ClosedFile)));
        assert!(matches!(htf.set_max_offset(0.0), Err(HtError::ClosedFile)));
        assert!(matches!(htf.set_harmonic(1), Err(HtError::ClosedFile)));
        assert!(matches!(htf.set_frev(1.0), Err(HtError::ClosedFile)));
        assert!(matches!(htf.set_turn_adjust(None), Err(HtError::ClosedFile)));
        assert!(matches!(
            htf.set_populated_turns(TurnRange::empty()),
            Err(HtError::ClosedFile)
        ));
        assert!(matches!(htf.set_align(false), Err(HtError::ClosedFile)));
        assert!(matches!(
            htf.locate_bunches(Plane::Horizontal, Signal::Sigma, 5.0, 5),
            Err(HtError::ClosedFile)
        ));
        assert!(matches!(
            htf.optimise_overlap(Plane::Horizontal, Signal::Sigma, &Default::default()),
            Err(HtError::ClosedFile)
        ));
        assert!(matches!(
            htf.calculate_bunch_stability(),
            Err(HtError::ClosedFile)
        ));
        assert!(matches!(htf.calculate_mode(2.35), Err(HtError::ClosedFile)));
    }

    #[test]
    fn test_missing_dataset() {
        let gen = SyntheticAcquisition::default();
        let mut raw = gen.build_file(&[(0, 50.0)], &[]);
        raw.datasets.retain(|d| !d.name.starts_with("vertical/"));
        let htf = HtFile::new(raw);
        assert!(matches!(
            htf.dataset(Plane::Vertical, Signal::Sigma),
            Err(HtError::MissingDataset { .. })
        ));
    }
}
