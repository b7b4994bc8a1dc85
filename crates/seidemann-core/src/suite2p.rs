// crates/seidemann-core/src/suite2p.rs

use std::path::{Path, PathBuf};

use ndarray::Array2;
use ndarray_npy::{read_npy, ReadNpyError};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::container::{Segmentation, SessionBundle};
use crate::converter::{ConversionOptions, DataInterface};
use crate::error::{ConversionError, Result};

const TRACE_FILES: [&str; 3] = ["F.npy", "Fneu.npy", "spks.npy"];
const ISCELL_FILE: &str = "iscell.npy";

/// `plane*` directories under a Suite2p output folder, ordered by plane number.
pub fn discover_planes(folder: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let pattern = folder.join("plane*");
    let pattern = pattern.to_str().ok_or_else(|| {
        ConversionError::Config(format!("non UTF-8 Suite2p folder {}", folder.display()))
    })?;
    let entries = glob::glob(pattern)
        .map_err(|err| ConversionError::Config(format!("bad Suite2p folder pattern: {err}")))?;

    let mut planes = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| ConversionError::Io(err.into_error()))?;
        if !path.is_dir() {
            continue;
        }
        let number = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix("plane"))
            .and_then(|digits| digits.parse::<usize>().ok());
        if let Some(number) = number {
            planes.push((number, path));
        }
    }
    planes.sort();
    Ok(planes)
}

/// Float32 traces, widening from float64 when the file was saved that way.
fn read_traces(path: &Path) -> Result<Array2<f32>> {
    match read_npy::<_, Array2<f32>>(path) {
        Ok(array) => Ok(array),
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let wide: Array2<f64> = read_npy(path)?;
            Ok(wide.mapv(|value| value as f32))
        }
        Err(err) => Err(err.into()),
    }
}

fn read_classifier(path: &Path) -> Result<Array2<f64>> {
    match read_npy::<_, Array2<f64>>(path) {
        Ok(array) => Ok(array),
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let narrow: Array2<f32> = read_npy(path)?;
            Ok(narrow.mapv(f64::from))
        }
        Err(err) => Err(err.into()),
    }
}

pub fn read_plane(plane_dir: &Path, plane: usize, rate: f64) -> Result<Segmentation> {
    let [fluorescence, neuropil, deconvolved] = TRACE_FILES.map(|name| plane_dir.join(name));
    let fluorescence = read_traces(&fluorescence)?;
    let neuropil = read_traces(&neuropil)?;
    let deconvolved = read_traces(&deconvolved)?;

    let iscell = read_classifier(&plane_dir.join(ISCELL_FILE))?;
    if iscell.ncols() != 2 {
        return Err(ConversionError::Shape(format!(
            "{} has {} columns, expected 2",
            ISCELL_FILE,
            iscell.ncols()
        )));
    }
    let accepted: Vec<bool> = iscell.column(0).iter().map(|value| *value != 0.0).collect();
    let probability: Vec<f64> = iscell.column(1).to_vec();

    debug!(
        plane,
        rois = fluorescence.nrows(),
        frames = fluorescence.ncols(),
        "suite2p plane read"
    );
    Segmentation::new(
        plane,
        rate,
        fluorescence,
        neuropil,
        deconvolved,
        accepted,
        probability,
    )
}

pub struct Suite2pInterface {
    folder: PathBuf,
    segmentation: Segmentation,
}

impl Suite2pInterface {
    pub fn open(folder: &Path, plane: usize, sampling_frequency: f64) -> Result<Self> {
        let planes = discover_planes(folder)?;
        let (_, plane_dir) = planes
            .iter()
            .find(|(number, _)| *number == plane)
            .ok_or_else(|| {
                let found: Vec<String> = planes.iter().map(|(n, _)| format!("plane{n}")).collect();
                ConversionError::Config(format!(
                    "no plane{plane} under {} (found: {})",
                    folder.display(),
                    if found.is_empty() { "none".to_string() } else { found.join(", ") }
                ))
            })?;

        let segmentation = read_plane(plane_dir, plane, sampling_frequency)?;
        info!(
            folder = %folder.display(),
            plane,
            rois = segmentation.roi_count(),
            accepted = segmentation.accepted.iter().filter(|a| **a).count(),
            "suite2p segmentation loaded"
        );
        Ok(Self {
            folder: folder.to_path_buf(),
            segmentation,
        })
    }

    pub fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }
}

impl DataInterface for Suite2pInterface {
    fn name(&self) -> &'static str {
        "suite2p"
    }

    fn source_files(&self) -> Vec<PathBuf> {
        let plane_dir = self.folder.join(format!("plane{}", self.segmentation.plane));
        TRACE_FILES
            .iter()
            .chain(std::iter::once(&ISCELL_FILE))
            .map(|name| plane_dir.join(name))
            .collect()
    }

    fn metadata(&self) -> Result<Value> {
        Ok(json!({
            "Ophys": {
                "ImageSegmentation": {
                    "plane_segmentations": [{
                        "name": format!("PlaneSegmentation{}", self.segmentation.plane),
                        "description": "Output from segmenting the imaging plane with Suite2p.",
                    }]
                }
            }
        }))
    }

    fn add_to_bundle(&self, bundle: &mut SessionBundle, _options: &ConversionOptions) -> Result<()> {
        bundle.add_segmentation(self.segmentation.clone())
    }
}
