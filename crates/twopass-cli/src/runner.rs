use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{ensure, Context};
use fnv::FnvHashSet;
use log::info;
use twopass_core::rescoring::{
    CeAlignmentOptions, RescoreConfig, RescoreInputs, RescoreModels,
};
use twopass_core::table::Table;
use twopass_core::{checkpoint, evidence, merge, transfer};

use crate::external::ToolCommand;
use crate::input::{Settings, SpectraFormat};

const FIRST_PASS_DIR: &str = "rescore_1";
const SECOND_PASS_DIR: &str = "rescore_2";
const TRANSFER_INPUT_DIR: &str = "transfer_input";
const TRANSFER_OUTPUT_DIR: &str = "transfer_output";
const PERCOLATOR_DIR: &str = "twopass/percolator";
const PROTEIN_FDR_DIR: &str = "twopass/protein_groups";

/// Terminal output of a rescoring pass, relative to its output directory.
const RESCORE_PSMS: &str = "results/percolator/rescore.percolator.psms.txt";

pub struct Runner {
    settings: Settings,
    start: Instant,
}

/// Explicit stage boundary events, in place of process-global log state.
struct Stage {
    name: &'static str,
}

impl Stage {
    fn begin(name: &'static str) -> Stage {
        info!("[{name}] started");
        Stage { name }
    }

    fn skip(self, checkpoint: &Path) {
        info!(
            "[{}] found {}; skipping",
            self.name,
            checkpoint.display()
        );
    }

    fn finish(self) {
        info!("[{}] finished", self.name);
    }
}

impl Runner {
    pub fn new(settings: Settings) -> Runner {
        Runner {
            settings,
            start: Instant::now(),
        }
    }

    pub fn run(&self) -> anyhow::Result<()> {
        info!("twopass version {}", self.settings.version);
        if self.settings.debug {
            info!(
                "resolved settings: {}",
                serde_json::to_string_pretty(&self.settings)?
            );
        }

        let raw_files = self.raw_file_names()?;
        info!("{} raw files listed in the search results", raw_files.len());

        let mzml_dir = self.materialize_spectra(&raw_files)?;
        let config = self.first_rescoring(&mzml_dir)?;
        let raw_file_hyphens = raw_file_hyphens(&mzml_dir)?;
        self.prepare_transfer_input(raw_file_hyphens)?;
        self.run_transfer(&mzml_dir)?;
        let second_pass_input = self.prepare_second_pass_input()?;
        self.second_rescoring(&config, &second_pass_input)?;
        self.merge_feature_tables()?;
        self.run_discriminant()?;
        self.assemble_evidence(raw_file_hyphens)?;
        self.protein_group_fdr()?;

        info!("twopass finished in {:#?}", self.start.elapsed());
        Ok(())
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.settings.output_directory.join(relative)
    }

    fn summaries_dir(&self) -> PathBuf {
        self.path(TRANSFER_OUTPUT_DIR)
            .join("summaries")
            .join(format!("p{}", self.settings.transfer.stringency))
    }

    fn transfer_summary_path(&self) -> PathBuf {
        self.summaries_dir()
            .join(format!("p{}_msms.txt", self.settings.transfer.stringency))
    }

    fn raw_file_names(&self) -> anyhow::Result<Vec<String>> {
        let msms = self.settings.search_results.join("msms.txt");
        let table = Table::from_path_select(&msms, &["Raw file"])?;
        let mut seen = FnvHashSet::default();
        let mut names = Vec::new();
        for value in table.column_values("Raw file")? {
            if seen.insert(value.to_string()) {
                names.push(value.to_string());
            }
        }
        ensure!(!names.is_empty(), "no raw files listed in `{}`", msms.display());
        Ok(names)
    }

    /// Stage 1: map the configured spectra location to a directory of mzML
    /// files, converting raw files one by one unless already converted.
    fn materialize_spectra(&self, raw_files: &[String]) -> anyhow::Result<PathBuf> {
        let stage = Stage::begin("spectra materialization");
        match self.settings.spectra_format {
            SpectraFormat::Mzml => {
                info!("using spectra from {}", self.settings.spectra.display());
                stage.finish();
                Ok(self.settings.spectra.clone())
            }
            SpectraFormat::Raw => {
                let mzml_dir = self.path("mzml");
                fs::create_dir_all(&mzml_dir)?;
                for name in raw_files {
                    let converted = mzml_dir.join(format!("{name}.mzML"));
                    if checkpoint::reuse(&converted) {
                        info!("found {}; skipping conversion", converted.display());
                        continue;
                    }
                    ToolCommand::executable(
                        "raw file conversion",
                        &self.settings.tools.raw_converter,
                    )
                    .option("-i", self.settings.spectra.join(format!("{name}.raw")))
                    .option("-o", &mzml_dir)
                    .option("-f", "2")
                    .run()?;
                }
                stage.finish();
                Ok(mzml_dir)
            }
        }
    }

    /// Stage 2: build the rescoring tool's configuration and run the first
    /// pass over the original search results.
    fn first_rescoring(&self, mzml_dir: &Path) -> anyhow::Result<RescoreConfig> {
        let stage = Stage::begin("first rescoring pass");
        let config = self.rescore_config(mzml_dir);
        let config_path = self.path("rescore_config.json");
        config.write(&config_path)?;

        let psms = self.path(FIRST_PASS_DIR).join(RESCORE_PSMS);
        if checkpoint::reuse(&psms) {
            stage.skip(&psms);
            return Ok(config);
        }
        ToolCommand::python_module("rescoring tool", &self.settings.tools.python, "oktoberfest")
            .option("--config_path", &config_path)
            .run()?;
        stage.finish();
        Ok(config)
    }

    fn rescore_config(&self, mzml_dir: &Path) -> RescoreConfig {
        RescoreConfig {
            job_type: "Rescoring".into(),
            tag: self.settings.tmt_tag.clone(),
            inputs: RescoreInputs {
                search_results_type: "Maxquant".into(),
                search_results: self.settings.search_results.display().to_string(),
                spectra: mzml_dir.display().to_string(),
                spectra_type: "mzml".into(),
            },
            output: self.path(FIRST_PASS_DIR).display().to_string(),
            models: RescoreModels {
                intensity: self.settings.rescoring.intensity_model.clone(),
                irt: self.settings.rescoring.irt_model.clone(),
            },
            prediction_server: self.settings.rescoring.prediction_server.clone(),
            ssl: self.settings.rescoring.ssl,
            num_threads: self.settings.threads,
            thermo_exe: None,
            fdr_estimation_method: "percolator".into(),
            all_features: false,
            regression_method: "spline".into(),
            ce_alignment_options: CeAlignmentOptions {
                ce_range: (19, 50),
                use_ransac_model: false,
            },
            mass_tolerance: self.settings.rescoring.mass_tolerance,
            unit_mass_tolerance: self.settings.rescoring.tolerance_unit,
        }
    }

    /// Stage 3: translate the first pass's output into the transfer tool's
    /// input schema and stage the search-engine side files it reads.
    fn prepare_transfer_input(&self, raw_file_hyphens: usize) -> anyhow::Result<()> {
        let stage = Stage::begin("transfer input preparation");
        let input_dir = self.path(TRANSFER_INPUT_DIR);
        fs::create_dir_all(&input_dir)?;

        let percolator_dir = self.path(FIRST_PASS_DIR).join("results/percolator");
        transfer::write_transfer_input(
            &percolator_dir.join("rescore.percolator.psms.txt"),
            &percolator_dir.join("rescore.percolator.decoy.psms.txt"),
            &self.settings.search_results.join("msms.txt"),
            &input_dir.join("msms.txt"),
            raw_file_hyphens,
        )?;

        for name in ["msmsScans.txt", "allPeptides.txt", "evidence.txt"] {
            let staged = input_dir.join(name);
            if checkpoint::reuse(&staged) {
                info!("found {}; skipping copy", staged.display());
                continue;
            }
            let source = self.settings.search_results.join(name);
            fs::copy(&source, &staged).with_context(|| {
                format!(
                    "Failed to copy `{}` to `{}`",
                    source.display(),
                    staged.display()
                )
            })?;
        }
        stage.finish();
        Ok(())
    }

    /// Stage 4: propagate identifications across runs.
    fn run_transfer(&self, mzml_dir: &Path) -> anyhow::Result<()> {
        let stage = Stage::begin("transfer propagation");
        let output_dir = self.path(TRANSFER_OUTPUT_DIR);
        let summary = self.transfer_summary_path();
        if checkpoint::reuse(&summary) {
            stage.skip(&summary);
            return Ok(());
        }
        ToolCommand::python_module("transfer tool", &self.settings.tools.python, "simsi_transfer")
            .option("--mq_txt_folder", self.path(TRANSFER_INPUT_DIR))
            .option("--raw_folder", mzml_dir)
            .option("--output_folder", &output_dir)
            .option("--cache_folder", &output_dir)
            .option("--stringencies", self.settings.transfer.stringency.to_string())
            .option("--maximum_pep", self.settings.transfer.max_pep.to_string())
            .option("--num_threads", self.settings.threads.to_string())
            .option("--tmt_ms_level", self.settings.tmt_ms_level.to_string())
            .option("--ambiguity_decision", "keep_all")
            .flag("--skip_evidence")
            .flag("--skip_msmsscans")
            .run()?;
        stage.finish();
        Ok(())
    }

    /// Stage 5: reshape the transfer summary for the second rescoring pass.
    fn prepare_second_pass_input(&self) -> anyhow::Result<PathBuf> {
        let stage = Stage::begin("second-pass input preparation");
        let output = self.summaries_dir().join("msms.txt");
        transfer::write_second_pass_input(&self.transfer_summary_path(), &output)?;
        stage.finish();
        Ok(output)
    }

    /// Stage 6: re-run the rescoring tool over the propagated
    /// identifications, reusing the first pass's calibration artifacts.
    fn second_rescoring(
        &self,
        config: &RescoreConfig,
        search_results: &Path,
    ) -> anyhow::Result<()> {
        let stage = Stage::begin("second rescoring pass");
        let second_dir = self.path(SECOND_PASS_DIR);
        let psms = second_dir.join(RESCORE_PSMS);
        if checkpoint::reuse(&psms) {
            stage.skip(&psms);
            return Ok(());
        }

        let first_dir = self.path(FIRST_PASS_DIR);
        let copied = copy_matching(&first_dir.join("results"), &second_dir.join("results"), |name| {
            name.ends_with(".txt")
        })?;
        info!("carried over {copied} result tables from the first pass");
        let copied = copy_matching(&first_dir.join("proc"), &second_dir.join("proc"), |name| {
            name.starts_with("ce_calib")
        })?;
        info!("carried over {copied} collision energy calibration artifacts");

        let second_config = config.second_pass(search_results, &second_dir);
        let config_path = self.path("rescore_config_2.json");
        second_config.write(&config_path)?;
        ToolCommand::python_module("rescoring tool", &self.settings.tools.python, "oktoberfest")
            .option("--config_path", &config_path)
            .run()?;
        stage.finish();
        Ok(())
    }

    /// Stage 7: merge both passes' feature tables into one input table for
    /// the discriminant rescorer.
    fn merge_feature_tables(&self) -> anyhow::Result<()> {
        let stage = Stage::begin("feature table merge");
        let dir = self.path(PERCOLATOR_DIR);
        fs::create_dir_all(&dir)?;
        merge::merge_rescore_tables(
            &self.path(FIRST_PASS_DIR).join("results/percolator/rescore.tab"),
            &self.path(SECOND_PASS_DIR).join("results/percolator"),
            &dir.join("rescore_all.tab"),
        )?;
        stage.finish();
        Ok(())
    }

    /// Stage 8: discriminant rescoring over the merged table, initialized
    /// from the first pass's weights.
    fn run_discriminant(&self) -> anyhow::Result<()> {
        let stage = Stage::begin("discriminant rescoring");
        let dir = self.path(PERCOLATOR_DIR);
        let target_psms = dir.join("rescore_all.percolator.psms.txt");
        if checkpoint::reuse(&target_psms) {
            stage.skip(&target_psms);
            return Ok(());
        }
        let weights = self
            .path(FIRST_PASS_DIR)
            .join("results/percolator/rescore.percolator.weights.csv");
        ToolCommand::executable("discriminant rescorer", &self.settings.tools.percolator)
            .option("--init-weights", &weights)
            .flag("--static")
            .option("--num-threads", self.settings.threads.to_string())
            .option("--subset-max-train", "500000")
            .flag("--post-processing-tdc")
            .option("--testFDR", "0.01")
            .option("--trainFDR", "0.01")
            .option("--results-psms", &target_psms)
            .option(
                "--decoy-results-psms",
                dir.join("rescore_all.percolator.decoy.psms.txt"),
            )
            .option(
                "--results-peptides",
                dir.join("rescore_all.percolator.peptides.txt"),
            )
            .option(
                "--decoy-results-peptides",
                dir.join("rescore_all.percolator.decoy.peptides.txt"),
            )
            .arg(dir.join("rescore_all.tab"))
            .stderr_file(&dir.join("rescore_all.log"))?
            .run()?;
        stage.finish();
        Ok(())
    }

    /// Stage 9: reconcile rescorer, transfer and search records into the
    /// evidence table.
    fn assemble_evidence(&self, raw_file_hyphens: usize) -> anyhow::Result<()> {
        let stage = Stage::begin("evidence assembly");
        let dir = self.path(PROTEIN_FDR_DIR);
        fs::create_dir_all(&dir)?;
        let percolator_dir = self.path(PERCOLATOR_DIR);
        evidence::assemble(
            &evidence::EvidenceInputs {
                target_psms: &percolator_dir.join("rescore_all.percolator.psms.txt"),
                decoy_psms: &percolator_dir.join("rescore_all.percolator.decoy.psms.txt"),
                transfer_summary: &self.transfer_summary_path(),
                search_results: &self.settings.search_results.join("msms.txt"),
                run_summary: &self.settings.search_results.join("summary.txt"),
                output: &dir.join("evidence.txt"),
            },
            raw_file_hyphens,
        )?;
        stage.finish();
        Ok(())
    }

    /// Stage 10: identifier adjustment, evidence update, protein group FDR.
    fn protein_group_fdr(&self) -> anyhow::Result<()> {
        let stage = Stage::begin("protein group FDR");
        let percolator_dir = self.path(PERCOLATOR_DIR);
        let fdr_dir = self.path(PROTEIN_FDR_DIR);

        let target_dash = percolator_dir.join("rescore_all.percolator.psms.dash.txt");
        let decoy_dash = percolator_dir.join("rescore_all.percolator.decoy.psms.dash.txt");
        evidence::append_rank_suffix(
            &percolator_dir.join("rescore_all.percolator.psms.txt"),
            &target_dash,
        )?;
        evidence::append_rank_suffix(
            &percolator_dir.join("rescore_all.percolator.decoy.psms.txt"),
            &decoy_dash,
        )?;

        let updated = fdr_dir.join("updated_evidence.txt");
        if checkpoint::reuse(&updated) {
            info!("found {}; skipping evidence update", updated.display());
        } else {
            ToolCommand::python_module(
                "evidence update",
                &self.settings.tools.python,
                "picked_group_fdr.pipeline.update_evidence_from_pout",
            )
            .option("--mq_evidence", fdr_dir.join("evidence.txt"))
            .option("--perc_results", &target_dash)
            .arg(&decoy_dash)
            .option("--mq_evidence_out", &updated)
            .option("--pout_input_type", "prosit")
            .run()?;
        }

        let groups = fdr_dir.join("group_results.txt");
        if checkpoint::reuse(&groups) {
            stage.skip(&groups);
            return Ok(());
        }
        let mut command = ToolCommand::python_module(
            "protein group FDR",
            &self.settings.tools.python,
            "picked_group_fdr",
        )
        .option("--mq_evidence", &updated)
        .option("--protein_groups_out", &groups)
        .flag("--fasta");
        for fasta in &self.settings.protein_fdr.fasta {
            command = command.arg(fasta);
        }
        command
            .option("--methods", "picked_protein_group_mq_input")
            .option("--enzyme", &self.settings.protein_fdr.enzyme)
            .flag("--do_quant")
            .run()?;
        stage.finish();
        Ok(())
    }
}

/// Number of hyphens inside the raw file names themselves, taken from the
/// first spectra file; needed to split synthetic PSM identifiers correctly.
fn raw_file_hyphens(mzml_dir: &Path) -> anyhow::Result<usize> {
    let mut stems: Vec<String> = Vec::new();
    for entry in fs::read_dir(mzml_dir)
        .with_context(|| format!("Failed to read spectra directory `{}`", mzml_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    let first = stems
        .first()
        .with_context(|| format!("no spectra files found in `{}`", mzml_dir.display()))?;
    Ok(first.matches('-').count())
}

fn copy_matching(
    source: &Path,
    target: &Path,
    keep: impl Fn(&str) -> bool,
) -> anyhow::Result<usize> {
    fs::create_dir_all(target)?;
    if !source.is_dir() {
        return Ok(0);
    }
    let mut copied = 0;
    for entry in fs::read_dir(source)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if !keep(&name) {
            continue;
        }
        fs::copy(&path, target.join(&name))
            .with_context(|| format!("Failed to copy `{}`", path.display()))?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hyphen_count_comes_from_the_first_spectra_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Run-B-02.mzML"), "").unwrap();
        fs::write(dir.path().join("Run-A-01.mzML"), "").unwrap();
        assert_eq!(raw_file_hyphens(dir.path()).unwrap(), 2);

        let empty = tempfile::tempdir().unwrap();
        assert!(raw_file_hyphens(empty.path()).is_err());
    }

    #[test]
    fn copy_matching_filters_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        let target = dir.path().join("dst");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("ce_calib.txt"), "x").unwrap();
        fs::write(source.join("other.log"), "y").unwrap();

        let copied = copy_matching(&source, &target, |name| name.starts_with("ce_calib")).unwrap();
        assert_eq!(copied, 1);
        assert!(target.join("ce_calib.txt").is_file());
        assert!(!target.join("other.log").exists());

        // a missing source directory is not an error, just nothing to carry
        let copied = copy_matching(&dir.path().join("absent"), &target, |_| true).unwrap();
        assert_eq!(copied, 0);
    }
}
