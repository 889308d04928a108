use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::HtError;

/// Attribute value attached to a raw file or dataset.
///
/// The container format is schemaless, attributes arrive as whatever the
/// acquisition front-end wrote. Integers are tried before floats so that
/// counters stay exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
    FloatArray(Vec<f64>),
}

pub type AttrMap = BTreeMap<String, AttrValue>;

pub fn attr_f64(attrs: &AttrMap, key: &str, default: f64) -> f64 {
    match attrs.get(key) {
        Some(AttrValue::Float(v)) => *v,
        Some(AttrValue::Int(v)) => *v as f64,
        _ => default,
    }
}

pub fn attr_i64(attrs: &AttrMap, key: &str, default: i64) -> i64 {
    match attrs.get(key) {
        Some(AttrValue::Int(v)) => *v,
        Some(AttrValue::Float(v)) => *v as i64,
        _ => default,
    }
}

pub fn attr_str<'a>(attrs: &'a AttrMap, key: &str, default: &'a str) -> &'a str {
    match attrs.get(key) {
        Some(AttrValue::Text(v)) => v.as_str(),
        _ => default,
    }
}

pub fn attr_array<'a>(attrs: &'a AttrMap, key: &str) -> Option<&'a [f64]> {
    match attrs.get(key) {
        Some(AttrValue::FloatArray(v)) => Some(v.as_slice()),
        _ => None,
    }
}

/// One raw sample array with its attributes, named `<plane>/<signal>`.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub name: String,
    pub shape: Vec<usize>,
    pub samples: Vec<f64>,
    pub attrs: AttrMap,
}

impl RawDataset {
    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

/// In-memory image of one acquisition container: file-level attributes plus
/// the per-plane/per-signal sample arrays.
///
/// The on-disk container is an external collaborator; this reader handles
/// the exchange dump format only, a JSON header describing attributes and
/// dataset layout followed by little-endian i16 sample blocks.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub path: PathBuf,
    pub size: u64,
    pub attrs: AttrMap,
    pub datasets: Vec<RawDataset>,
}

const MAGIC: &[u8; 4] = b"HTRF";

#[derive(Serialize, Deserialize)]
struct RawHeader {
    attrs: AttrMap,
    datasets: Vec<RawDatasetHeader>,
}

#[derive(Serialize, Deserialize)]
struct RawDatasetHeader {
    name: String,
    shape: Vec<usize>,
    attrs: AttrMap,
}

impl RawFile {
    pub fn dataset(&self, name: &str) -> Option<&RawDataset> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// Read an exchange dump from disk.
    pub fn read(path: &Path) -> Result<RawFile, HtError> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HtError::Format(format!(
                "bad magic in {}",
                path.display()
            )));
        }

        let header_len = file.read_u32::<LittleEndian>()? as usize;
        let mut header_bytes = vec![0u8; header_len];
        file.read_exact(&mut header_bytes)?;
        let header: RawHeader = serde_json::from_slice(&header_bytes)?;

        let mut datasets = Vec::with_capacity(header.datasets.len());
        for dsh in header.datasets {
            let count: usize = dsh.shape.iter().product();
            let mut codes = vec![0i16; count];
            file.read_i16_into::<LittleEndian>(&mut codes)
                .map_err(|_| {
                    HtError::Format(format!("truncated samples for dataset {}", dsh.name))
                })?;
            datasets.push(RawDataset {
                name: dsh.name,
                shape: dsh.shape,
                samples: codes.into_iter().map(|c| c as f64).collect(),
                attrs: dsh.attrs,
            });
        }

        Ok(RawFile {
            path: path.to_path_buf(),
            size,
            attrs: header.attrs,
            datasets,
        })
    }

    /// Write an exchange dump. Sample codes are rounded and clamped to i16.
    pub fn write(&self, path: &Path) -> Result<(), HtError> {
        let header = RawHeader {
            attrs: self.attrs.clone(),
            datasets: self
                .datasets
                .iter()
                .map(|d| RawDatasetHeader {
                    name: d.name.clone(),
                    shape: d.shape.clone(),
                    attrs: d.attrs.clone(),
                })
                .collect(),
        };
        let header_bytes = serde_json::to_vec(&header)?;

        let mut file = File::create(path)?;
        file.write_all(MAGIC)?;
        file.write_u32::<LittleEndian>(header_bytes.len() as u32)?;
        file.write_all(&header_bytes)?;
        for dataset in &self.datasets {
            for &v in &dataset.samples {
                let code = v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                file.write_i16::<LittleEndian>(code)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> RawFile {
        let mut attrs = AttrMap::new();
        attrs.insert("device".to_string(), AttrValue::Text("HT.TEST".to_string()));
        attrs.insert("version".to_string(), AttrValue::Int(2));

        let mut ds_attrs = AttrMap::new();
        ds_attrs.insert("segment_count".to_string(), AttrValue::Int(1));
        ds_attrs.insert("sampling_period".to_string(), AttrValue::Float(1.0e-10));

        RawFile {
            path: PathBuf::new(),
            size: 0,
            attrs,
            datasets: vec![RawDataset {
                name: "horizontal/sigma".to_string(),
                shape: vec![6],
                samples: vec![0.0, 1.0, -2.0, 3.0, -4.0, 5.0],
                attrs: ds_attrs,
            }],
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = std::env::temp_dir().join("rustht-raw-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("round_trip.htr");

        let original = sample_file();
        original.write(&path).unwrap();
        let loaded = RawFile::read(&path).unwrap();

        assert_eq!(attr_str(&loaded.attrs, "device", ""), "HT.TEST");
        assert_eq!(attr_i64(&loaded.attrs, "version", 0), 2);
        let ds = loaded.dataset("horizontal/sigma").unwrap();
        assert_eq!(ds.shape, vec![6]);
        assert_eq!(ds.samples, vec![0.0, 1.0, -2.0, 3.0, -4.0, 5.0]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bad_magic() {
        let dir = std::env::temp_dir().join("rustht-raw-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad_magic.htr");
        std::fs::write(&path, b"NOPE....").unwrap();

        match RawFile::read(&path) {
            Err(HtError::Format(_)) => {}
            other => panic!("expected format error, got {:?}", other.map(|_| ())),
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_attr_helpers() {
        let mut attrs = AttrMap::new();
        attrs.insert("a".to_string(), AttrValue::Float(2.5));
        attrs.insert("b".to_string(), AttrValue::Int(7));
        attrs.insert(
            "c".to_string(),
            AttrValue::FloatArray(vec![1.0, 2.0, 3.0]),
        );
        assert_eq!(attr_f64(&attrs, "a", 0.0), 2.5);
        assert_eq!(attr_f64(&attrs, "b", 0.0), 7.0);
        assert_eq!(attr_f64(&attrs, "missing", 9.0), 9.0);
        assert_eq!(attr_i64(&attrs, "b", 0), 7);
        assert_eq!(attr_array(&attrs, "c").unwrap().len(), 3);
        assert!(attr_array(&attrs, "a").is_none());
    }
}
