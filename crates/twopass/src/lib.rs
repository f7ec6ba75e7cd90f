//! Glue logic for a two-pass spectrum re-scoring workflow: tabular format
//! translation between the external rescoring, transfer and FDR tools, plus
//! the cross-stage record reconciliation that assembles the evidence table.

pub mod checkpoint;
pub mod evidence;
pub mod merge;
pub mod psm;
pub mod rescoring;
pub mod table;
pub mod transfer;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    /// A required column is absent from a table
    MissingColumn { table: String, column: String },
    /// A synthetic PSM identifier could not be split into its segments
    MalformedPsmId { id: String, reason: &'static str },
    /// A merge expected to be one-to-one saw the same key twice
    JoinCardinality { context: &'static str, key: String },
    /// A join would introduce a column that already exists
    DuplicateColumn { context: &'static str, column: String },
    /// A cell could not be parsed as the number its column requires
    Parse { column: String, value: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Csv(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::MissingColumn { table, column } => {
                write!(f, "column `{column}` not found in `{table}`")
            }
            Self::MalformedPsmId { id, reason } => {
                write!(f, "malformed PSM identifier `{id}`: {reason}")
            }
            Self::JoinCardinality { context, key } => {
                write!(f, "{context}: merge is not one-to-one for key `{key}`")
            }
            Self::DuplicateColumn { context, column } => {
                write!(f, "{context}: column `{column}` already present in the left table")
            }
            Self::Parse { column, value } => {
                write!(f, "could not parse `{value}` in column `{column}` as a number")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<csv::Error> for Error {
    fn from(error: csv::Error) -> Self {
        Error::Csv(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json(error)
    }
}
