//! Cross-stage record reconciliation: merge the discriminant rescorer's
//! target/decoy output, the transfer tool's summary and the original
//! 100 %-FDR search results into one deduplicated evidence table.
//!
//! Every identity the rescorer considered must surface exactly once in the
//! evidence table: sourced from the transfer summary when present there, and
//! recovered from the 100 %-FDR search results otherwise.

use std::path::Path;

use fnv::FnvHashSet;
use log::info;

use crate::psm::{self, PsmId};
use crate::table::Table;
use crate::{checkpoint, Error};

/// Columns not carried over from the search results when recovering rows the
/// transfer tool never emitted: either backfilled separately, derived, or
/// only produced by the transfer tool itself.
const EXCLUDED_SEARCH_COLUMNS: [&str; 12] = [
    "Fraction",
    "MS scan number",
    "clusterID",
    "Experiment",
    "mod_ambiguous",
    "ID",
    "PEP",
    "summary_ID",
    "identification",
    "scanID",
    "raw_ambiguous",
    "Phospho (STY) Probabilities",
];

pub struct EvidenceInputs<'a> {
    /// Discriminant rescorer target PSMs
    pub target_psms: &'a Path,
    /// Discriminant rescorer decoy PSMs
    pub decoy_psms: &'a Path,
    /// Transfer tool summary table
    pub transfer_summary: &'a Path,
    /// 100 %-FDR search results (msms.txt)
    pub search_results: &'a Path,
    /// Per-raw-file experiment/fraction metadata (summary.txt)
    pub run_summary: &'a Path,
    /// Assembled evidence table
    pub output: &'a Path,
}

/// The identities one rescorer output table actually considered.
struct RescoredIds {
    /// `(raw file)-(scan)-_<translated peptide>_` keys
    peptide_keys: FnvHashSet<String>,
    /// `(raw file)-(scan)` keys
    scan_keys: FnvHashSet<String>,
    /// posterior error probability per scan key
    peps: Vec<(String, String)>,
}

fn collect_rescored(path: &Path, raw_file_hyphens: usize) -> Result<RescoredIds, Error> {
    let psms = Table::from_path_select(path, &["PSMId", "filename", "posterior_error_prob"])?;
    let mut ids = RescoredIds {
        peptide_keys: FnvHashSet::default(),
        scan_keys: FnvHashSet::default(),
        peps: Vec::with_capacity(psms.len()),
    };
    for row in 0..psms.len() {
        let id = psms.value(row, "PSMId")?;
        let parsed = PsmId::parse(id, raw_file_hyphens)?;
        let peptide = match parsed.peptide {
            Some(ref peptide) => peptide.as_str(),
            None => {
                return Err(Error::MalformedPsmId {
                    id: id.into(),
                    reason: "missing modified-peptide segment",
                })
            }
        };
        let scan_key = format!("{}-{}", psms.value(row, "filename")?, parsed.scan);
        let peptide_key = format!("{}-_{}_", scan_key, psm::translate_modifications(peptide));
        ids.peptide_keys.insert(peptide_key);
        ids.peps
            .push((scan_key.clone(), psms.value(row, "posterior_error_prob")?.to_string()));
        ids.scan_keys.insert(scan_key);
    }
    Ok(ids)
}

pub fn assemble(inputs: &EvidenceInputs<'_>, raw_file_hyphens: usize) -> Result<(), Error> {
    if checkpoint::reuse(inputs.output) {
        info!(
            "evidence table {} already exists; skipping assembly",
            inputs.output.display()
        );
        return Ok(());
    }

    let targets = collect_rescored(inputs.target_psms, raw_file_hyphens)?;
    let decoys = collect_rescored(inputs.decoy_psms, raw_file_hyphens)?;
    let mut rescored_peptides = targets.peptide_keys.clone();
    rescored_peptides.extend(decoys.peptide_keys.iter().cloned());

    // keep only transfer rows whose peptide-level identity the rescorer saw
    let mut transfer = Table::from_path(inputs.transfer_summary)?;
    let peptide_keys = transfer.composite_key(&["Raw file", "scanID", "Modified sequence"])?;
    let scan_keys = transfer.composite_key(&["Raw file", "scanID"])?;
    let mask: Vec<bool> = peptide_keys
        .iter()
        .map(|key| rescored_peptides.contains(key))
        .collect();
    let kept_ids: Vec<String> = scan_keys
        .into_iter()
        .zip(&mask)
        .filter(|(_, keep)| **keep)
        .map(|(key, _)| key)
        .collect();
    transfer.retain_mask(&mask);
    let transfer_ids: FnvHashSet<String> = kept_ids.iter().cloned().collect();
    transfer.set_column("ID", kept_ids);

    // identities the rescorer considered but the transfer tool never emitted
    let missing_targets: FnvHashSet<String> = targets
        .scan_keys
        .difference(&transfer_ids)
        .cloned()
        .collect();
    let missing_decoys: FnvHashSet<String> = decoys
        .scan_keys
        .difference(&transfer_ids)
        .cloned()
        .collect();

    // recover the missing identities from the 100 %-FDR search results,
    // restricted to the columns the transfer schema retains
    let mut keep: Vec<String> = transfer
        .columns()
        .iter()
        .filter(|column| !EXCLUDED_SEARCH_COLUMNS.contains(&column.as_str()))
        .cloned()
        .collect();
    if !keep.iter().any(|column| column == "Scan number") {
        keep.push("Scan number".into());
    }
    let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
    let mut recovered = Table::from_path_select(inputs.search_results, &keep)?;

    let search_keys = recovered.composite_key(&["Raw file", "Scan number"])?;
    let mask: Vec<bool> = search_keys
        .iter()
        .map(|key| missing_targets.contains(key) || missing_decoys.contains(key))
        .collect();
    let recovered_ids: Vec<String> = search_keys
        .into_iter()
        .zip(&mask)
        .filter(|(_, keep)| **keep)
        .map(|(key, _)| key)
        .collect();
    recovered.retain_mask(&mask);
    recovered.set_column("ID", recovered_ids);
    recovered.rename_column("Scan number", "scanID")?;

    // backfill experiment/fraction metadata the search results lack per row
    let mut run_summary = Table::from_path(inputs.run_summary)?;
    if !run_summary.has_column("Fraction") {
        run_summary.set_constant("Fraction", "1");
    }
    let run_summary = run_summary.select(&["Raw file", "Experiment", "Fraction"])?;
    recovered.left_join_many_to_one(&run_summary, &["Raw file"], "experiment metadata")?;

    // fresh group ids, strictly above anything the transfer tool assigned
    let mut highest = 0i64;
    for value in transfer.column_values("summary_ID")? {
        if let Ok(id) = value.trim().parse::<i64>() {
            highest = highest.max(id);
        }
    }
    let fresh = (0..recovered.len())
        .map(|offset| {
            itoa::Buffer::new()
                .format(highest + 1 + offset as i64)
                .to_string()
        })
        .collect();
    recovered.set_column("summary_ID", fresh);

    for column in [
        "raw_ambiguous",
        "mod_ambiguous",
        "Phospho (STY) Probabilities",
        "MS scan number",
        "clusterID",
    ] {
        recovered.set_constant(column, "");
    }
    recovered.set_constant("identification", "d");

    // transfer rows that matched a rescored identity, then the recovered rows
    let mut evidence = transfer;
    evidence.retain_by("ID", |id| {
        targets.scan_keys.contains(id) || decoys.scan_keys.contains(id)
    })?;
    evidence.append_aligned(recovered);

    let mut peps = Table::new(["ID", "posterior_error_prob"]);
    for (id, pep) in targets.peps.iter().chain(decoys.peps.iter()) {
        peps.push_row(vec![id.clone(), pep.clone()]);
    }
    evidence.left_join_one_to_one(&peps, &["ID"], "posterior error attachment")?;

    evidence.write(inputs.output)?;
    info!(
        "assembled evidence table with {} rows at {}",
        evidence.len(),
        inputs.output.display()
    );
    Ok(())
}

/// Append the rank segment the protein-FDR tool expects at the end of each
/// synthetic identifier.
pub fn append_rank_suffix(input: &Path, output: &Path) -> Result<(), Error> {
    if checkpoint::reuse(output) {
        info!("{} already exists; skipping identifier adjustment", output.display());
        return Ok(());
    }
    let mut psms = Table::from_path(input)?;
    let ids = psms
        .column_owned("PSMId")?
        .into_iter()
        .map(|mut id| {
            id.push_str("-1");
            id
        })
        .collect();
    psms.set_column("PSMId", ids);
    psms.write(output)
}
