//! Typed configuration contract for the external spectrum-prediction /
//! rescoring tool. Field names follow that tool's own JSON spelling.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{checkpoint, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToleranceUnit {
    Da,
    Ppm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescoreInputs {
    pub search_results_type: String,
    pub search_results: String,
    pub spectra: String,
    pub spectra_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescoreModels {
    pub intensity: String,
    pub irt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeAlignmentOptions {
    pub ce_range: (u32, u32),
    pub use_ransac_model: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescoreConfig {
    #[serde(rename = "type")]
    pub job_type: String,
    pub tag: String,
    pub inputs: RescoreInputs,
    pub output: String,
    pub models: RescoreModels,
    pub prediction_server: String,
    pub ssl: bool,
    #[serde(rename = "numThreads")]
    pub num_threads: usize,
    #[serde(rename = "thermoExe")]
    pub thermo_exe: Option<String>,
    pub fdr_estimation_method: String,
    #[serde(rename = "allFeatures")]
    pub all_features: bool,
    #[serde(rename = "regressionMethod")]
    pub regression_method: String,
    pub ce_alignment_options: CeAlignmentOptions,
    #[serde(rename = "massTolerance")]
    pub mass_tolerance: f64,
    #[serde(rename = "unitMassTolerance")]
    pub unit_mass_tolerance: ToleranceUnit,
}

impl RescoreConfig {
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        checkpoint::write_atomic(path, &bytes).map_err(Error::Io)
    }

    /// Derive the second pass's configuration: same models, server and
    /// tolerances, but rescoring the propagated identifications into a fresh
    /// output directory. The spectra are already converted at this point, so
    /// the spectra type is pinned to mzML.
    pub fn second_pass(&self, search_results: &Path, output: &Path) -> RescoreConfig {
        let mut config = self.clone();
        config.inputs.search_results = search_results.display().to_string();
        config.inputs.spectra_type = "mzml".into();
        config.output = output.display().to_string();
        config
    }
}
