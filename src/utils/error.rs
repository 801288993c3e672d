use thiserror::Error;

#[derive(Error, Debug)]
pub enum HelpdeskError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Upstream API returned {status} for {url}")]
    ApiStatusError { url: String, status: u16 },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("XML parsing error: {0}")]
    XmlError(#[from] quick_xml::DeError),

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid commodity code '{code}': {reason}")]
    InvalidCommodityCode { code: String, reason: String },

    #[error("Country '{code}' does not exist")]
    CountryNotFound { code: String },

    #[error("No active nomenclature tree for region '{region}'")]
    NoActiveTree { region: String },

    #[error("Broken nomenclature hierarchy at node {node_id}: {reason}")]
    BrokenHierarchy { node_id: i64, reason: String },

    #[error("Rules document '{document}' is missing expected footnotes")]
    MissingFootnotes { document: String },

    #[error("Invalid rules of origin document: {message}")]
    InvalidDocument { message: String },

    #[error("Rules of origin document '{document}' has multiple start dates: {dates:?}")]
    MultipleStartDates { document: String, dates: Vec<String> },

    #[error("No result found for {query}")]
    NoResultError { query: String },

    #[error("Multiple results ({count}) found for {query}")]
    MultipleResultsError { query: String, count: usize },

    #[error("Already running reload data")]
    ReloadLocked,

    #[error("reload_data has failed during the {step} step with the following error: {message}")]
    ReloadStepFailed { step: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Data,
    Storage,
    Configuration,
    Lookup,
    Operational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Process exit code of a command failing with this severity. Never 0.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl HelpdeskError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ApiError(_) | Self::ApiStatusError { .. } => ErrorCategory::Network,
            Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::XmlError(_)
            | Self::InvalidDocument { .. }
            | Self::MultipleStartDates { .. }
            | Self::MissingFootnotes { .. }
            | Self::BrokenHierarchy { .. } => ErrorCategory::Data,
            Self::IoError(_) | Self::DatabaseError(_) | Self::StorageError { .. } => {
                ErrorCategory::Storage
            }
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            Self::InvalidCommodityCode { .. }
            | Self::CountryNotFound { .. }
            | Self::NoActiveTree { .. }
            | Self::NoResultError { .. }
            | Self::MultipleResultsError { .. } => ErrorCategory::Lookup,
            Self::ReloadLocked | Self::ReloadStepFailed { .. } => ErrorCategory::Operational,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Lookup | ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Data | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Storage => ErrorSeverity::Critical,
            ErrorCategory::Operational => match self {
                Self::ReloadLocked => ErrorSeverity::Medium,
                _ => ErrorSeverity::High,
            },
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::ReloadLocked => "Wait for the running reload to finish, or close its tracking row if it crashed",
            Self::ReloadStepFailed { .. } => "Fix the failing step and rerun the whole reload",
            Self::MissingFootnotes { .. } => "Re-import the rules document including its notes section",
            Self::InvalidCommodityCode { .. } => "Use a numeric commodity code of at most 12 digits",
            _ => match self.category() {
                ErrorCategory::Network => "Check the upstream API endpoint and network connectivity",
                ErrorCategory::Data => "Check the source data for malformed or inconsistent records",
                ErrorCategory::Storage => "Check the database path and file permissions",
                ErrorCategory::Configuration => "Check the configuration file and environment variables",
                ErrorCategory::Lookup => "Check that the requested code or country exists in the active data",
                ErrorCategory::Operational => "Rerun the command",
            },
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Could not reach the tariff service: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HelpdeskError>;
