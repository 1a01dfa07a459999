use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArtifactError>;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Malformed line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("Element count mismatch for {kind}: declared {declared}, wrote {actual}")]
    CountMismatch {
        kind: &'static str,
        declared: usize,
        actual: usize,
    },
}

impl ArtifactError {
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line,
            reason: reason.into(),
        }
    }
}
