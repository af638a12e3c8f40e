use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackOfficeError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table '{0}' has no header row")]
    EmptyTable(String),

    #[error("Column '{column}' not found in table '{table}'")]
    MissingColumn { table: String, column: String },

    #[error("Invalid record in table '{table}': {details}")]
    InvalidRecord { table: String, details: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackOfficeError>;

impl BackOfficeError {
    /// Points an [`BackOfficeError::InvalidRecord`] at the table the row was
    /// read from. Other variants pass through unchanged.
    pub fn in_table(self, table: &str) -> Self {
        match self {
            BackOfficeError::InvalidRecord { details, .. } => BackOfficeError::InvalidRecord {
                table: table.to_string(),
                details,
            },
            other => other,
        }
    }
}
