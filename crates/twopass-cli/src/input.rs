use std::path::PathBuf;

use anyhow::{ensure, Context};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use twopass_core::rescoring::ToleranceUnit;

/// Pipeline parameters deserialized from the JSON configuration file
#[derive(Deserialize)]
pub struct Input {
    general: GeneralOptions,
    inputs: InputOptions,
    transfer: Option<TransferOptions>,
    rescoring: RescoringOptions,
    protein_fdr: ProteinFdrOptions,
    tools: Option<ToolOptions>,
}

#[derive(Deserialize)]
struct GeneralOptions {
    output: String,
    threads: Option<usize>,
    tmt_ms_level: Option<u8>,
    tmt_tag: Option<String>,
    debug: Option<bool>,
}

#[derive(Deserialize)]
struct InputOptions {
    search_results: String,
    spectra: String,
    spectra_format: SpectraFormat,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpectraFormat {
    Raw,
    Mzml,
}

#[derive(Deserialize, Default)]
struct TransferOptions {
    stringency: Option<u32>,
    max_pep: Option<f64>,
}

#[derive(Deserialize)]
struct RescoringOptions {
    intensity_model: String,
    irt_model: String,
    prediction_server: String,
    ms_analyzer: MassAnalyzer,
    mass_tolerance: Option<f64>,
    tolerance_unit: Option<ToleranceUnit>,
    ssl: Option<bool>,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MassAnalyzer {
    Ot,
    It,
    Manual,
}

#[derive(Deserialize)]
struct ProteinFdrOptions {
    fasta: FastaPaths,
    enzyme: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FastaPaths {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize, Default)]
struct ToolOptions {
    python: Option<String>,
    percolator: Option<String>,
    raw_converter: Option<String>,
}

/// Resolved pipeline settings - defaults applied, enumerations validated
#[derive(Serialize)]
pub struct Settings {
    pub version: String,
    pub output_directory: PathBuf,
    pub threads: usize,
    pub tmt_ms_level: u8,
    pub tmt_tag: String,
    pub debug: bool,
    pub search_results: PathBuf,
    pub spectra: PathBuf,
    pub spectra_format: SpectraFormat,
    pub transfer: TransferSettings,
    pub rescoring: RescoringSettings,
    pub protein_fdr: ProteinFdrSettings,
    pub tools: ToolSettings,
}

#[derive(Serialize)]
pub struct TransferSettings {
    pub stringency: u32,
    pub max_pep: f64,
}

#[derive(Serialize)]
pub struct RescoringSettings {
    pub intensity_model: String,
    pub irt_model: String,
    pub prediction_server: String,
    pub ssl: bool,
    pub mass_tolerance: f64,
    pub tolerance_unit: ToleranceUnit,
}

#[derive(Serialize)]
pub struct ProteinFdrSettings {
    pub fasta: Vec<PathBuf>,
    pub enzyme: String,
}

#[derive(Serialize)]
pub struct ToolSettings {
    pub python: String,
    pub percolator: String,
    pub raw_converter: String,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches.get_one::<String>("config").expect("required argument");
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read configuration from `{path}`"))?;

        if let Some(output) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `general.output` parameter.");
            input.general.output = output.clone();
        }
        Ok(input)
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Settings> {
        let (mass_tolerance, tolerance_unit) = match self.rescoring.ms_analyzer {
            MassAnalyzer::Ot => (20.0, ToleranceUnit::Ppm),
            MassAnalyzer::It => (0.35, ToleranceUnit::Da),
            MassAnalyzer::Manual => {
                let tolerance = self.rescoring.mass_tolerance.context(
                    "`rescoring.mass_tolerance` must be set when `ms_analyzer` is \"manual\"",
                )?;
                let unit = self.rescoring.tolerance_unit.context(
                    "`rescoring.tolerance_unit` must be set when `ms_analyzer` is \"manual\": \
                     use \"da\" for ion trap data or \"ppm\" for orbitrap data",
                )?;
                (tolerance, unit)
            }
        };

        let tmt_ms_level = self.general.tmt_ms_level.unwrap_or(3);
        ensure!(
            matches!(tmt_ms_level, 2 | 3),
            "`general.tmt_ms_level` must be 2 or 3"
        );

        let output_directory = PathBuf::from(&self.general.output);
        std::fs::create_dir_all(&output_directory).with_context(|| {
            format!(
                "Failed to create output directory `{}`",
                output_directory.display()
            )
        })?;

        let fasta: Vec<PathBuf> = match self.protein_fdr.fasta {
            FastaPaths::One(path) => vec![PathBuf::from(path)],
            FastaPaths::Many(paths) => paths.into_iter().map(PathBuf::from).collect(),
        };
        ensure!(
            !fasta.is_empty(),
            "`protein_fdr.fasta` must name at least one file"
        );

        let transfer = self.transfer.unwrap_or_default();
        let tools = self.tools.unwrap_or_default();

        Ok(Settings {
            version: clap::crate_version!().into(),
            output_directory,
            threads: self.general.threads.unwrap_or_else(num_cpus::get),
            tmt_ms_level,
            tmt_tag: self.general.tmt_tag.unwrap_or_else(|| "tmt".into()),
            debug: self.general.debug.unwrap_or(false),
            search_results: PathBuf::from(self.inputs.search_results),
            spectra: PathBuf::from(self.inputs.spectra),
            spectra_format: self.inputs.spectra_format,
            transfer: TransferSettings {
                stringency: transfer.stringency.unwrap_or(10),
                max_pep: transfer.max_pep.unwrap_or(100.0),
            },
            rescoring: RescoringSettings {
                intensity_model: self.rescoring.intensity_model,
                irt_model: self.rescoring.irt_model,
                prediction_server: self.rescoring.prediction_server,
                ssl: self.rescoring.ssl.unwrap_or(false),
                mass_tolerance,
                tolerance_unit,
            },
            protein_fdr: ProteinFdrSettings {
                fasta,
                enzyme: self.protein_fdr.enzyme.unwrap_or_else(|| "trypsin".into()),
            },
            tools: ToolSettings {
                python: tools.python.unwrap_or_else(|| "python3".into()),
                percolator: tools.percolator.unwrap_or_else(|| "percolator".into()),
                raw_converter: tools
                    .raw_converter
                    .unwrap_or_else(|| "ThermoRawFileParser".into()),
            },
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config_json(output: &str, rescoring: &str) -> String {
        format!(
            r#"{{
                "general": {{ "output": "{output}", "threads": 4 }},
                "inputs": {{
                    "search_results": "/data/search",
                    "spectra": "/data/spectra",
                    "spectra_format": "mzml"
                }},
                "transfer": {{ "stringency": 15 }},
                "rescoring": {{
                    "intensity_model": "int",
                    "irt_model": "irt",
                    "prediction_server": "server:443",
                    {rescoring}
                }},
                "protein_fdr": {{ "fasta": "/data/db.fasta" }}
            }}"#
        )
    }

    fn build(rescoring: &str) -> anyhow::Result<Settings> {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        let json = config_json(output.to_str().unwrap(), rescoring);
        let input: Input = serde_json::from_str(&json).unwrap();
        input.build()
    }

    #[test]
    fn analyzer_presets_resolve_tolerances() {
        let settings = build(r#""ms_analyzer": "ot""#).unwrap();
        assert_eq!(settings.rescoring.mass_tolerance, 20.0);
        assert_eq!(settings.rescoring.tolerance_unit, ToleranceUnit::Ppm);
        assert_eq!(settings.transfer.stringency, 15);
        assert_eq!(settings.transfer.max_pep, 100.0);
        assert_eq!(settings.protein_fdr.enzyme, "trypsin");
        assert_eq!(settings.tools.percolator, "percolator");

        let settings = build(r#""ms_analyzer": "it""#).unwrap();
        assert_eq!(settings.rescoring.mass_tolerance, 0.35);
        assert_eq!(settings.rescoring.tolerance_unit, ToleranceUnit::Da);
    }

    #[test]
    fn manual_analyzer_requires_both_tolerance_fields() {
        let settings = build(
            r#""ms_analyzer": "manual", "mass_tolerance": 0.5, "tolerance_unit": "da""#,
        )
        .unwrap();
        assert_eq!(settings.rescoring.mass_tolerance, 0.5);
        assert_eq!(settings.rescoring.tolerance_unit, ToleranceUnit::Da);

        assert!(build(r#""ms_analyzer": "manual""#).is_err());
        assert!(build(r#""ms_analyzer": "manual", "mass_tolerance": 0.5"#).is_err());
    }

    #[test]
    fn unknown_enumerations_are_rejected_at_parse_time() {
        let json = config_json("/tmp/out", r#""ms_analyzer": "astral""#);
        assert!(serde_json::from_str::<Input>(&json).is_err());

        let json = config_json("/tmp/out", r#""ms_analyzer": "manual", "tolerance_unit": "thomson", "mass_tolerance": 1.0"#);
        assert!(serde_json::from_str::<Input>(&json).is_err());
    }

    #[test]
    fn fasta_accepts_one_path_or_many() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        let json = config_json(output.to_str().unwrap(), r#""ms_analyzer": "ot""#)
            .replace(r#""/data/db.fasta""#, r#"["/a.fasta", "/b.fasta"]"#);
        let input: Input = serde_json::from_str(&json).unwrap();
        let settings = input.build().unwrap();
        assert_eq!(settings.protein_fdr.fasta.len(), 2);
    }
}
