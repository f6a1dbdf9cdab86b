use thiserror::Error;

use crate::constants::Degree;

#[derive(Error, Debug)]
pub enum MostHostsError {
    #[error("Unknown DESI release or collection: {0}")]
    UnknownCatalog(String),

    #[error("No DESI observation found within radius of {0}")]
    NoMatchFound(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("External service error (status {status}): {message}")]
    ExternalService { status: u16, message: String },

    #[error("The candidate list is empty")]
    EmptyCandidateList,

    #[error("Invalid sky position for {name}: ra={ra}, dec={dec}")]
    InvalidPosition { name: String, ra: Degree, dec: Degree },

    #[error("Unable to parse night (expected yyyymmdd or yyyy-mm-dd): {0}")]
    InvalidNight(String),

    #[error("Invalid spectrum: {0}")]
    InvalidSpectrum(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Database query failed ({context}): {source}")]
    QueryFailed {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("HTTP reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Worker failed: {0}")]
    WorkerFailed(String),
}

impl MostHostsError {
    /// Attach the query context to a database error.
    pub fn query_failed(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let context = context.into();
        move |source| MostHostsError::QueryFailed { context, source }
    }

    /// Whether the failure is the expected "nothing within radius" outcome.
    pub fn is_no_match(&self) -> bool {
        matches!(self, MostHostsError::NoMatchFound(_))
    }
}

impl PartialEq for MostHostsError {
    fn eq(&self, other: &Self) -> bool {
        use MostHostsError::*;
        match (self, other) {
            (UnknownCatalog(a), UnknownCatalog(b)) => a == b,
            (NoMatchFound(a), NoMatchFound(b)) => a == b,
            (DataIntegrity(a), DataIntegrity(b)) => a == b,
            (
                ExternalService {
                    status: s1,
                    message: m1,
                },
                ExternalService {
                    status: s2,
                    message: m2,
                },
            ) => s1 == s2 && m1 == m2,
            (
                InvalidPosition {
                    name: n1,
                    ra: r1,
                    dec: d1,
                },
                InvalidPosition {
                    name: n2,
                    ra: r2,
                    dec: d2,
                },
            ) => n1 == n2 && r1.to_bits() == r2.to_bits() && d1.to_bits() == d2.to_bits(),
            (InvalidNight(a), InvalidNight(b)) => a == b,
            (InvalidSpectrum(a), InvalidSpectrum(b)) => a == b,
            (Config(a), Config(b)) => a == b,
            (WorkerFailed(a), WorkerFailed(b)) => a == b,
            (QueryFailed { context: a, .. }, QueryFailed { context: b, .. }) => a == b,

            // Wrapped library errors are not comparable: same variant is enough
            (TomlError(_), TomlError(_)) => true,
            (DatabaseError(_), DatabaseError(_)) => true,
            (ReqwestError(_), ReqwestError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (JsonError(_), JsonError(_)) => true,
            (IoError(_), IoError(_)) => true,

            (EmptyCandidateList, EmptyCandidateList) => true,

            _ => false,
        }
    }
}
