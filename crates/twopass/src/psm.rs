//! Parsing of the rescoring tool's synthetic PSM identifiers and translation
//! of their embedded modification codes into search-engine notation.

use crate::Error;

/// A synthetic PSM identifier of the form
/// `<raw file>-<scan>-<charge>-<modified peptide>[-<rank>]`, where the raw
/// file name may itself contain `raw_file_hyphens` hyphens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsmId {
    pub raw_file: String,
    pub scan: i64,
    pub charge: Option<String>,
    pub peptide: Option<String>,
}

impl PsmId {
    pub fn parse(id: &str, raw_file_hyphens: usize) -> Result<PsmId, Error> {
        let segments: Vec<&str> = id.split('-').collect();
        if segments.len() < raw_file_hyphens + 2 {
            return Err(Error::MalformedPsmId {
                id: id.into(),
                reason: "expected at least raw-file and scan-number segments",
            });
        }
        let raw_file = segments[..=raw_file_hyphens].join("-");
        let scan = segments[raw_file_hyphens + 1]
            .parse::<i64>()
            .map_err(|_| Error::MalformedPsmId {
                id: id.into(),
                reason: "scan-number segment is not an integer",
            })?;
        Ok(PsmId {
            raw_file,
            scan,
            charge: segments.get(raw_file_hyphens + 2).map(|s| s.to_string()),
            peptide: segments.get(raw_file_hyphens + 3).map(|s| s.to_string()),
        })
    }

    /// The `(raw file)-(scan number)` composite identity.
    pub fn scan_key(&self) -> String {
        format!("{}-{}", self.raw_file, self.scan)
    }
}

/// Translate the UNIMOD codes the rescoring tool embeds in peptide sequences
/// into the search engine's textual notation. Static labeling and
/// carbamidomethyl codes carry no information downstream and are stripped.
pub fn translate_modifications(peptide: &str) -> String {
    peptide
        .replace("[UNIMOD:737]", "")
        .replace("[UNIMOD:35]", "(Oxidation (M))")
        .replace("[UNIMOD:21]", "(Phospho (STY))")
        .replace("[UNIMOD:4]", "")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_simple_identifier() {
        let id = PsmId::parse("Exp1-500-2-AAA[UNIMOD:35]-1", 0).unwrap();
        assert_eq!(id.raw_file, "Exp1");
        assert_eq!(id.scan, 500);
        assert_eq!(id.charge.as_deref(), Some("2"));
        assert_eq!(id.peptide.as_deref(), Some("AAA[UNIMOD:35]"));
        assert_eq!(id.scan_key(), "Exp1-500");
    }

    #[test]
    fn parse_hyphenated_raw_file() {
        let id = PsmId::parse("Run-A-500-2-PEPTIDE-1", 1).unwrap();
        assert_eq!(id.raw_file, "Run-A");
        assert_eq!(id.scan, 500);
        assert_eq!(id.peptide.as_deref(), Some("PEPTIDE"));
    }

    #[test]
    fn parse_without_peptide_segment() {
        let id = PsmId::parse("Exp1-500", 0).unwrap();
        assert_eq!(id.scan, 500);
        assert_eq!(id.charge, None);
        assert_eq!(id.peptide, None);
    }

    #[test]
    fn reject_malformed_identifiers() {
        assert!(matches!(
            PsmId::parse("Exp1", 0),
            Err(Error::MalformedPsmId { .. })
        ));
        // with one in-name hyphen, segment two is part of the raw file name
        assert!(matches!(
            PsmId::parse("Run-A-xyz-2-PEPTIDE", 1),
            Err(Error::MalformedPsmId { .. })
        ));
        assert!(matches!(
            PsmId::parse("Exp1-notascan-2-PEPTIDE", 0),
            Err(Error::MalformedPsmId { .. })
        ));
    }

    #[test]
    fn translate_known_codes() {
        assert_eq!(
            translate_modifications("AAA[UNIMOD:35]"),
            "AAA(Oxidation (M))"
        );
        assert_eq!(
            translate_modifications("AS[UNIMOD:21]K"),
            "AS(Phospho (STY))K"
        );
        assert_eq!(translate_modifications("C[UNIMOD:4]K[UNIMOD:737]"), "CK");
        assert_eq!(
            translate_modifications("M[UNIMOD:35]C[UNIMOD:4]S[UNIMOD:21]"),
            "M(Oxidation (M))CS(Phospho (STY))"
        );
    }

    #[test]
    fn translation_leaves_plain_sequences_alone() {
        assert_eq!(translate_modifications("PEPTIDE"), "PEPTIDE");
    }
}
