//! Merging of the per-pass discriminant feature tables into the single input
//! table the discriminant rescorer trains on.

use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use log::info;

use crate::table::{self, Table};
use crate::{checkpoint, Error};

const GROUP_COLUMN: &str = "ExpMass";
const GROUP_COLUMN_POSITION: usize = 4;

/// Concatenate every `*rescore.tab` produced by the second rescoring pass
/// with the first pass's table, then assign a fresh mass-group index.
///
/// The two passes' `ExpMass` indices are not mutually comparable, so every
/// pre-existing index is dropped and the merged table is renumbered by
/// grouping rows on (`filename`, `ScanNr`), groups in sorted key order.
pub fn merge_rescore_tables(
    first_pass: &Path,
    second_pass_dir: &Path,
    output: &Path,
) -> Result<(), Error> {
    if checkpoint::reuse(output) {
        info!("{} already exists; reusing merged features", output.display());
        return Ok(());
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(second_pass_dir)? {
        let path = entry?.path();
        let is_feature_table = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with("rescore.tab"))
            .unwrap_or(false);
        if is_feature_table {
            paths.push(path);
        }
    }
    paths.sort();

    let mut merged = Table::default();
    for path in &paths {
        let mut features = Table::from_path(path)?;
        features.drop_column_if_present(GROUP_COLUMN);
        merged.append_aligned(features);
    }
    let mut first = Table::from_path(first_pass)?;
    first.drop_column(GROUP_COLUMN)?;
    merged.append_aligned(first);

    let files = merged.column_owned("filename")?;
    let mut scans = Vec::with_capacity(merged.len());
    for value in merged.column_values("ScanNr")? {
        scans.push(table::parse_i64(value, "ScanNr")?);
    }

    let mut keys: Vec<(String, i64)> = files.iter().cloned().zip(scans.iter().copied()).collect();
    keys.sort();
    keys.dedup();
    let groups: FnvHashMap<(String, i64), usize> = keys
        .into_iter()
        .enumerate()
        .map(|(group, key)| (key, group))
        .collect();

    let values = files
        .into_iter()
        .zip(scans)
        .map(|(file, scan)| {
            itoa::Buffer::new()
                .format(groups[&(file, scan)])
                .to_string()
        })
        .collect();
    merged.insert_column(GROUP_COLUMN_POSITION, GROUP_COLUMN, values);

    merged.write(output)?;
    info!(
        "merged {} feature tables into {} ({} rows)",
        paths.len() + 1,
        output.display(),
        merged.len()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn merges_and_renumbers_mass_groups() {
        let dir = tempfile::tempdir().unwrap();
        let second_dir = dir.path().join("percolator");
        fs::create_dir_all(&second_dir).unwrap();
        let first = dir.path().join("rescore.tab");
        let output = dir.path().join("rescore_all.tab");

        fs::write(
            second_dir.join("a.rescore.tab"),
            "SpecId\tLabel\tScanNr\tfilename\tExpMass\tlnrSp\n\
             a-10\t1\t10\ta\t7\t0.5\n\
             a-11\t-1\t11\ta\t8\t0.1\n",
        )
        .unwrap();
        fs::write(
            second_dir.join("b.rescore.tab"),
            "SpecId\tLabel\tScanNr\tfilename\tExpMass\tlnrSp\n\
             b-10\t1\t10\tb\t2\t0.7\n",
        )
        .unwrap();
        // a stray non-feature file must be ignored
        fs::write(second_dir.join("rescore.log"), "noise\n").unwrap();
        fs::write(
            &first,
            "SpecId\tLabel\tScanNr\tfilename\tExpMass\tlnrSp\n\
             a-10\t1\t10\ta\t999\t0.6\n\
             c-5\t1\t5\tc\t999\t0.2\n",
        )
        .unwrap();

        merge_rescore_tables(&first, &second_dir, &output).unwrap();

        let merged = Table::from_path(&output).unwrap();
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.columns()[GROUP_COLUMN_POSITION], GROUP_COLUMN);
        // groups numbered in sorted (filename, ScanNr) order
        assert_eq!(
            merged.column_values(GROUP_COLUMN).unwrap(),
            vec!["0", "1", "2", "0", "3"]
        );
        // second-pass rows come first, then the first pass's
        assert_eq!(
            merged.column_values("SpecId").unwrap(),
            vec!["a-10", "a-11", "b-10", "a-10", "c-5"]
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("rescore_all.tab");
        fs::write(&output, "sentinel\n").unwrap();

        let missing = dir.path().join("missing.tab");
        merge_rescore_tables(&missing, dir.path(), &output).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "sentinel\n");
    }
}
