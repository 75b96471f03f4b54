use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Network, timeout or rate-limit failure talking to an upstream source.
    #[error("Fetch from {source_name} failed: {message}")]
    AdapterFetch {
        source_name: String,
        message: String,
    },

    /// Upstream item did not match the shape the adapter expects.
    #[error("Schema mismatch in {source_name}: {message}")]
    SchemaMapping {
        source_name: String,
        message: String,
    },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ingestion run already in progress: {0}")]
    RunInProgress(String),
}

impl TrackerError {
    pub fn fetch(source_name: &str, message: impl Into<String>) -> Self {
        TrackerError::AdapterFetch {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub fn schema(source_name: &str, message: impl Into<String>) -> Self {
        TrackerError::SchemaMapping {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    /// Short machine-readable kind used in API error bodies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::Http(_) | TrackerError::AdapterFetch { .. } => "adapter_fetch_error",
            TrackerError::SchemaMapping { .. } => "schema_mapping_error",
            TrackerError::Validation(_) => "validation_error",
            TrackerError::Store(_) | TrackerError::Database(_) => "store_error",
            TrackerError::NotFound(_) => "not_found",
            TrackerError::RunInProgress(_) => "run_in_progress",
            TrackerError::Config(_) | TrackerError::Toml(_) => "config_error",
            TrackerError::Json(_) | TrackerError::Io(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
