use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::data::file::HtFile;
use crate::data::plane::{Plane, Signal};
use crate::data::raw::RawFile;
use crate::error::HtError;

fn default_max_offset() -> f64 {
    25.0e-9
}

fn default_color() -> String {
    "#000".to_string()
}

fn default_invert_sigma() -> bool {
    true
}

/// Parameters of one monitored system, as read from the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub acc: String,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub archive: String,
    #[serde(default)]
    pub offset: f64,
    #[serde(default = "default_max_offset", rename = "maxoffset")]
    pub max_offset: f64,
    #[serde(default)]
    pub frev: f64,
    #[serde(default)]
    pub harmonic: i64,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub thresh: f64,
    #[serde(default)]
    pub limit: f64,
    #[serde(default)]
    pub cable_comp: bool,
    #[serde(default = "default_invert_sigma", rename = "inv_sigma")]
    pub invert_sigma: bool,
    #[serde(default)]
    pub users: Vec<String>,
}

/// Entry point for processing head-tail data files.
///
/// Holds the system configuration, validates system/user selection and
/// opens acquisition files with the selected system's shared parameters
/// broadcast onto every dataset.
pub struct HtAnalysis {
    systems: Vec<SystemConfig>,
    system_index: usize,
    user: String,
    pub archive: bool,
}

impl HtAnalysis {
    /// Create a session from an already-parsed system list. The first
    /// system is selected, the user defaults to `ALL`.
    pub fn new(systems: Vec<SystemConfig>) -> Result<Self, HtError> {
        if systems.is_empty() {
            return Err(HtError::InvalidSystem("<none configured>".to_string()));
        }
        Ok(HtAnalysis {
            systems,
            system_index: 0,
            user: "ALL".to_string(),
            archive: false,
        })
    }

    /// Load the JSON configuration file and create a session.
    pub fn from_config(path: &Path) -> Result<Self, HtError> {
        let file = File::open(path)?;
        let systems: Vec<SystemConfig> = serde_json::from_reader(file)?;
        Self::new(systems)
    }

    pub fn systems(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|s| s.name.as_str())
    }

    pub fn system(&self) -> &SystemConfig {
        &self.systems[self.system_index]
    }

    /// Select a system by name. The current user is kept when the new
    /// system lists it, otherwise it falls back to `ALL`.
    pub fn set_system(&mut self, name: &str) -> Result<(), HtError> {
        let index = self
            .systems
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| HtError::InvalidSystem(name.to_string()))?;
        self.system_index = index;
        if self.user != "ALL" && !self.system().users.iter().any(|u| u == &self.user) {
            self.user = "ALL".to_string();
        }
        Ok(())
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn set_user(&mut self, name: &str) -> Result<(), HtError> {
        if name == "ALL" || self.system().users.iter().any(|u| u == name) {
            self.user = name.to_string();
            Ok(())
        } else {
            Err(HtError::InvalidUser(name.to_string()))
        }
    }

    /// Data directory of the selected system, the archive one when the
    /// session was put into archive mode.
    pub fn data_dir(&self) -> &str {
        if self.archive {
            &self.system().archive
        } else {
            &self.system().dir
        }
    }

    /// All acquisition files for the selected system and user, sorted by
    /// the `YYYYMMDD_HHMMSS` timestamp embedded in the file name.
    ///
    /// Files live one directory level below the data directory, named
    /// `<device>[_<user>]_<timestamp>.htr`.
    pub fn files(&self) -> Vec<PathBuf> {
        let dir = Path::new(self.data_dir());
        if !dir.is_dir() {
            return Vec::new();
        }

        let user_part = if self.user == "ALL" {
            String::new()
        } else {
            format!("_{}", self.user)
        };
        let prefix = format!("{}{}_", self.system().device, user_part);

        let mut files = Vec::new();
        if let Ok(subdirs) = std::fs::read_dir(dir) {
            for subdir in subdirs.flatten() {
                let sub_path = subdir.path();
                if !sub_path.is_dir() {
                    continue;
                }
                if let Ok(entries) = std::fs::read_dir(&sub_path) {
                    for entry in entries.flatten() {
                        let name = entry.file_name().to_string_lossy().to_string();
                        if name.starts_with(&prefix) && name.ends_with(".htr") {
                            files.push(entry.path());
                        }
                    }
                }
            }
        }

        // the timestamp is the 15 characters before the extension, sorting
        // on that slice avoids parsing dates
        files.sort_by_key(|p| timestamp_key(p));
        files
    }

    /// Get a file path by (partial) name.
    pub fn file(&self, name: &str) -> Result<PathBuf, HtError> {
        self.files()
            .into_iter()
            .find(|p| p.to_string_lossy().contains(name))
            .ok_or_else(|| HtError::FileNotFound(name.to_string()))
    }

    /// Open an acquisition file.
    ///
    /// The selected system's shared parameters are broadcast to every
    /// dataset; when the system inverts its sigma signals the flag is set on
    /// the sigma datasets.
    pub fn open_file(&self, path: &Path) -> Result<HtFile, HtError> {
        let raw = RawFile::read(path)?;
        let mut htf = HtFile::new(raw);

        let system = self.system();
        htf.set_offset(system.offset)?;
        htf.set_max_offset(system.max_offset)?;
        htf.set_harmonic(system.harmonic)?;
        htf.set_frev(system.frev)?;

        if system.invert_sigma {
            for plane in Plane::ALL {
                if let Some(ds) = htf.data.get_mut(plane, Signal::Sigma) {
                    ds.invert = true;
                }
            }
        }

        Ok(htf)
    }
}

fn timestamp_key(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let n = stem.chars().count();
    stem.chars().skip(n.saturating_sub(15)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_systems() -> Vec<SystemConfig> {
        let json = r#"[
            {
                "name": "SPS",
                "device": "SPS.BQHT",
                "dir": "/nonexistent/sps",
                "offset": 1.0e-9,
                "maxoffset": 25.0e-9,
                "frev": 23.05e-6,
                "harmonic": 4620,
                "users": ["MD1", "LHC25NS"]
            },
            {
                "name": "LHC.B1",
                "device": "LHC.BQHT.B1",
                "dir": "/nonexistent/lhc",
                "frev": 88.9e-6,
                "harmonic": 35640,
                "inv_sigma": false
            }
        ]"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults_and_selection() {
        let mut ht = HtAnalysis::new(two_systems()).unwrap();
        assert_eq!(ht.system().name, "SPS");
        assert_eq!(ht.user(), "ALL");
        assert!(ht.system().invert_sigma);
        assert_eq!(ht.system().max_offset, 25.0e-9);

        ht.set_system("LHC.B1").unwrap();
        assert_eq!(ht.system().harmonic, 35640);
        assert!(!ht.system().invert_sigma);
    }

    #[test]
    fn test_invalid_system_rejected() {
        let mut ht = HtAnalysis::new(two_systems()).unwrap();
        assert!(matches!(
            ht.set_system("PSB"),
            Err(HtError::InvalidSystem(_))
        ));
        // the failed selection leaves the session unchanged
        assert_eq!(ht.system().name, "SPS");
    }

    #[test]
    fn test_user_validation() {
        let mut ht = HtAnalysis::new(two_systems()).unwrap();
        ht.set_user("MD1").unwrap();
        assert_eq!(ht.user(), "MD1");
        assert!(matches!(
            ht.set_user("NOBODY"),
            Err(HtError::InvalidUser(_))
        ));
        assert_eq!(ht.user(), "MD1");

        // switching to a system without that user falls back to ALL
        ht.set_system("LHC.B1").unwrap();
        assert_eq!(ht.user(), "ALL");
    }

    #[test]
    fn test_empty_configuration_rejected() {
        assert!(HtAnalysis::new(Vec::new()).is_err());
    }

    #[test]
    fn test_missing_file_lookup() {
        let ht = HtAnalysis::new(two_systems()).unwrap();
        assert!(ht.files().is_empty());
        assert!(matches!(
            ht.file("20250101_120000"),
            Err(HtError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_file_listing_sorted_by_timestamp() {
        let base = std::env::temp_dir().join("rustht-config-test");
        let day1 = base.join("2025-01-01");
        let day2 = base.join("2025-01-02");
        std::fs::create_dir_all(&day1).unwrap();
        std::fs::create_dir_all(&day2).unwrap();
        std::fs::write(day2.join("SPS.BQHT_20250102_080000.htr"), b"").unwrap();
        std::fs::write(day1.join("SPS.BQHT_20250101_235959.htr"), b"").unwrap();
        std::fs::write(day1.join("OTHER.DEV_20250101_000000.htr"), b"").unwrap();

        let mut systems = two_systems();
        systems[0].dir = base.to_string_lossy().to_string();
        let ht = HtAnalysis::new(systems).unwrap();

        let files = ht.files();
        assert_eq!(files.len(), 2);
        assert!(files[0].to_string_lossy().contains("20250101_235959"));
        assert!(files[1].to_string_lossy().contains("20250102_080000"));

        let found = ht.file("20250102").unwrap();
        assert!(found.to_string_lossy().contains("SPS.BQHT_20250102_080000"));

        std::fs::remove_dir_all(&base).unwrap();
    }
}
