use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Upstream collaborator errors
    #[error("upstream overloaded: {0}")]
    Overloaded(String),

    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("structured output parse error: {0}")]
    MalformedOutput(String),

    #[error("search failed: {0}")]
    Search(String),

    #[error("memory store error: {0}")]
    Memory(String),

    // Step contract errors
    #[error("step '{node}' missing required input: {what}")]
    MissingInput { node: String, what: String },

    // Graph construction errors (never raised at run time)
    #[error("graph error: {0}")]
    Graph(String),

    // Run-level errors
    #[error("run exceeded step limit ({limit})")]
    StepLimitExceeded { limit: usize },

    #[error("run cancelled")]
    Cancelled,

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    // Storage errors
    #[error("database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Whether a retry policy may attempt this failure again.
    ///
    /// Overload and search failures are transient; malformed output and
    /// everything else is fatal to the attempt and handed to commit as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            FlowError::Overloaded(_) | FlowError::Search(_) => true,
            FlowError::LlmRequest(msg) => {
                msg.contains("timeout")
                    || msg.contains("connection")
                    || msg.contains("500")
                    || msg.contains("502")
                    || msg.contains("503")
            }
            _ => false,
        }
    }

    /// Whether this failure came from an overloaded upstream collaborator.
    /// Nodes use this to route to the fallback edge instead of degrading locally.
    pub fn is_overload(&self) -> bool {
        matches!(self, FlowError::Overloaded(_))
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FlowError::Overloaded("429".into()).is_transient());
        assert!(FlowError::Search("index busy".into()).is_transient());
        assert!(FlowError::LlmRequest("connection reset".into()).is_transient());
        assert!(!FlowError::LlmRequest("401 unauthorized".into()).is_transient());
        assert!(!FlowError::MalformedOutput("missing field".into()).is_transient());
        assert!(!FlowError::Graph("dangling edge".into()).is_transient());
    }

    #[test]
    fn test_overload_is_distinguishable() {
        assert!(FlowError::Overloaded("503".into()).is_overload());
        assert!(!FlowError::LlmRequest("503".into()).is_overload());
    }
}
