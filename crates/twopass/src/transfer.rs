//! Format translators at the transfer-tool boundary: rescoring output into
//! transfer input, and transfer output into second-pass rescoring input.

use std::path::Path;

use log::info;

use crate::psm::PsmId;
use crate::table::{self, Table};
use crate::{checkpoint, Error};

/// Proton mass as the transfer tool's precursor convention defines it.
pub const PROTON: f64 = 1.0078;
/// Correction applied when reconstructing a precursor mass from m/z.
pub const MASS_CORRECTION: f64 = 0.0005;

/// PSMs above this q-value never enter the transfer tool's input.
pub const SIGNIFICANCE_THRESHOLD: f64 = 0.01;

/// Build the transfer tool's input table from both rescoring PSM tables and
/// the original 100 %-FDR search results.
///
/// Target and decoy PSMs are concatenated, filtered to q ≤ 0.01, reduced to
/// their composite identity plus the rescored PEP/score, and joined 1:1
/// against the search results so the transfer tool sees fully populated
/// search-engine rows carrying the rescored statistics.
pub fn write_transfer_input(
    target_psms: &Path,
    decoy_psms: &Path,
    search_results: &Path,
    output: &Path,
    raw_file_hyphens: usize,
) -> Result<(), Error> {
    if checkpoint::reuse(output) {
        info!("{} already exists; skipping transfer input generation", output.display());
        return Ok(());
    }

    let mut significant = Table::new(["Raw file", "Scan number", "posterior_error_prob", "score"]);
    for path in [target_psms, decoy_psms] {
        let psms =
            Table::from_path_select(path, &["PSMId", "q-value", "posterior_error_prob", "score"])?;
        for row in 0..psms.len() {
            let passes = psms
                .value(row, "q-value")?
                .parse::<f64>()
                .map(|q| q <= SIGNIFICANCE_THRESHOLD)
                .unwrap_or(false);
            if !passes {
                continue;
            }
            let id = PsmId::parse(psms.value(row, "PSMId")?, raw_file_hyphens)?;
            significant.push_row(vec![
                id.raw_file,
                itoa::Buffer::new().format(id.scan).to_string(),
                psms.value(row, "posterior_error_prob")?.to_string(),
                psms.value(row, "score")?.to_string(),
            ]);
        }
    }

    let search = Table::from_path(search_results)?;
    significant.left_join_one_to_one(
        &search,
        &["Raw file", "Scan number"],
        "transfer input against search results",
    )?;

    let pep = significant.column_owned("posterior_error_prob")?;
    let score = significant.column_owned("score")?;
    significant.set_column("PEP", pep);
    significant.set_column("Score", score);
    significant.drop_column("posterior_error_prob")?;
    significant.drop_column("score")?;

    significant.write(output)?;
    info!(
        "wrote transfer input with {} PSMs to {}",
        significant.len(),
        output.display()
    );
    Ok(())
}

/// Reshape the transfer tool's summary table into the schema the rescoring
/// tool expects for its second pass.
///
/// Only confidently transferred rows are kept. The transfer format carries no
/// scan-event concept, so the scan number doubles as the event number; a
/// missing score defaults to 1 (least confident) and a missing precursor mass
/// is reconstructed from m/z and charge.
pub fn write_second_pass_input(transfer_summary: &Path, output: &Path) -> Result<(), Error> {
    if checkpoint::reuse(output) {
        info!("{} already exists; skipping second-pass input generation", output.display());
        return Ok(());
    }

    let mut summary = Table::from_path(transfer_summary)?;
    summary.retain_by("identification", |flag| flag == "t")?;
    summary.rename_column("scanID", "Scan number")?;

    let mut charges = Vec::with_capacity(summary.len());
    for value in summary.column_values("Charge")? {
        let charge = table::parse_f64(value, "Charge")? as i64;
        charges.push(itoa::Buffer::new().format(charge).to_string());
    }
    summary.set_column("Charge", charges);

    let scans = summary.column_owned("Scan number")?;
    summary.set_column("Scan event number", scans);

    let scores = summary
        .column_owned("Score")?
        .into_iter()
        .map(|score| if score.trim().is_empty() { "1".into() } else { score })
        .collect();
    summary.set_column("Score", scores);

    let charge_values = summary.column_owned("Charge")?;
    let mz_values = summary.column_owned("m/z")?;
    let mut masses = summary.column_owned("Mass")?;
    for row in 0..masses.len() {
        if masses[row].trim().is_empty() {
            let mz = table::parse_f64(&mz_values[row], "m/z")?;
            let charge = table::parse_f64(&charge_values[row], "Charge")?;
            let mass = (mz - PROTON + MASS_CORRECTION) * charge;
            masses[row] = ryu::Buffer::new().format(mass).to_string();
        }
    }
    summary.set_column("Mass", masses);

    summary.write(output)?;
    info!(
        "wrote second-pass rescoring input with {} identifications to {}",
        summary.len(),
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn write_fixture(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn transfer_input_filters_joins_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("rescore.percolator.psms.txt");
        let decoy = dir.path().join("rescore.percolator.decoy.psms.txt");
        let msms = dir.path().join("msms.txt");
        let output = dir.path().join("transfer_input.txt");

        write_fixture(
            &target,
            "PSMId\tscore\tq-value\tposterior_error_prob\tpeptide\n\
             Exp1-500-2-AAA-1\t3.5\t0.001\t0.01\tAAA\n\
             Exp1-600-2-CCC-1\t1.0\t0.5\t0.4\tCCC\n",
        );
        write_fixture(
            &decoy,
            "PSMId\tscore\tq-value\tposterior_error_prob\tpeptide\n\
             Exp1-700-3-DDD-1\t2.5\t0.009\t0.02\tDDD\n",
        );
        write_fixture(
            &msms,
            "Raw file\tScan number\tSequence\tPEP\tScore\n\
             Exp1\t500\tAAA\t0.9\t50\n\
             Exp1\t600\tCCC\t0.9\t40\n\
             Exp1\t700\tDDD\t0.9\t30\n",
        );

        write_transfer_input(&target, &decoy, &msms, &output, 0).unwrap();

        let result = Table::from_path(&output).unwrap();
        assert_eq!(result.len(), 2);
        assert!(!result.has_column("posterior_error_prob"));
        assert!(!result.has_column("score"));
        // rescored statistics replace the search engine's
        assert_eq!(result.column_values("PEP").unwrap(), vec!["0.01", "0.02"]);
        assert_eq!(result.column_values("Score").unwrap(), vec!["3.5", "2.5"]);
        assert_eq!(result.column_values("Sequence").unwrap(), vec!["AAA", "DDD"]);
        assert_eq!(
            result.column_values("Scan number").unwrap(),
            vec!["500", "700"]
        );
    }

    #[test]
    fn transfer_input_rejects_ambiguous_search_rows() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("psms.txt");
        let decoy = dir.path().join("decoy.psms.txt");
        let msms = dir.path().join("msms.txt");
        let output = dir.path().join("transfer_input.txt");

        write_fixture(
            &target,
            "PSMId\tscore\tq-value\tposterior_error_prob\n\
             Exp1-500-2-AAA-1\t3.5\t0.001\t0.01\n",
        );
        write_fixture(
            &decoy,
            "PSMId\tscore\tq-value\tposterior_error_prob\n",
        );
        write_fixture(
            &msms,
            "Raw file\tScan number\tSequence\n\
             Exp1\t500\tAAA\n\
             Exp1\t500\tAAB\n",
        );

        let result = write_transfer_input(&target, &decoy, &msms, &output, 0);
        assert!(matches!(result, Err(Error::JoinCardinality { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn transfer_input_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("transfer_input.txt");
        write_fixture(&output, "sentinel\n");

        // upstream paths do not even exist; the existing output short-circuits
        let missing = dir.path().join("missing.txt");
        write_transfer_input(&missing, &missing, &missing, &output, 0).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "sentinel\n");
    }

    #[test]
    fn second_pass_input_reshapes_the_summary() {
        let dir = tempfile::tempdir().unwrap();
        let summary = dir.path().join("p10_msms.txt");
        let output = dir.path().join("msms.txt");

        write_fixture(
            &summary,
            "Raw file\tscanID\tModified sequence\tCharge\tm/z\tMass\tScore\tidentification\n\
             Exp1\t500\t_AAA_\t2.0\t500.0\t\t\tt\n\
             Exp1\t600\t_CCC_\t3.0\t400.0\t1200.5\t77\tt\n\
             Exp1\t700\t_DDD_\t2.0\t300.0\t600.0\t50\td\n",
        );

        write_second_pass_input(&summary, &output).unwrap();

        let result = Table::from_path(&output).unwrap();
        assert_eq!(result.len(), 2);
        assert!(!result.has_column("scanID"));
        assert_eq!(result.column_values("Scan number").unwrap(), vec!["500", "600"]);
        assert_eq!(
            result.column_values("Scan event number").unwrap(),
            vec!["500", "600"]
        );
        assert_eq!(result.column_values("Charge").unwrap(), vec!["2", "3"]);
        assert_eq!(result.column_values("Score").unwrap(), vec!["1", "77"]);
        // (500.0 - 1.0078 + 0.0005) * 2
        assert_eq!(
            result.column_values("Mass").unwrap(),
            vec!["997.9854", "1200.5"]
        );
    }

    #[test]
    fn second_pass_input_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("msms.txt");
        write_fixture(&output, "sentinel\n");

        let missing = dir.path().join("missing.txt");
        write_second_pass_input(&missing, &output).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "sentinel\n");
    }
}
