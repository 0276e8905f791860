use thiserror::Error;

pub const CODE_DOES_NOT_EXIST: &str = "DOES_NOT_EXIST";
pub const CODE_READ_ERROR: &str = "READ_ERROR";
pub const CODE_WRITE_ERROR: &str = "WRITE_ERROR";
pub const CODE_REPOSITORY_CONFIGURATION_ERROR: &str = "REPOSITORY_CONFIGURATION_ERROR";
pub const CODE_INCOMPATIBLE_REPOSITORY_VERSION: &str = "INCOMPATIBLE_REPOSITORY_VERSION";
pub const CODE_CORRUPTED_REPOSITORY_SPEC: &str = "CORRUPTED_REPOSITORY_SPEC";
pub const CODE_CONFIG_NOT_FOUND: &str = "CONFIG_NOT_FOUND";

/// Error kinds shared by every layer below the command line.
///
/// Call sites that need to branch (checkout fallback, spec load, cache warm-up) match on the
/// variant or use [`Error::code`]; everything else just propagates the message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    DoesNotExist(String),

    #[error("{0}")]
    Read(String),

    #[error("{0}")]
    Write(String),

    #[error("{0}")]
    RepositoryConfiguration(String),

    #[error(
        "The repository at {root_url} is using a newer storage mechanism which is incompatible with your version of Keepsake.\n\nTo upgrade, run:\npip install --upgrade keepsake"
    )]
    IncompatibleRepositoryVersion { root_url: String },

    #[error(
        "The project spec file at {root_url}/{spec_path} is corrupted ({reason}).\nYou can manually edit it with the format {{\"version\": VERSION}},\nwhere VERSION is an integer."
    )]
    CorruptedRepositorySpec {
        root_url: String,
        spec_path: String,
        reason: String,
    },

    #[error(
        "{0}\nYou must either create a keepsake.yaml configuration file, or explicitly pass a repository URL with --repository."
    )]
    ConfigNotFound(String),

    #[error("Prefix is ambiguous: {prefix} ({count} matching {kind})")]
    AmbiguousPrefix {
        prefix: String,
        count: usize,
        kind: &'static str,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::DoesNotExist(_) => CODE_DOES_NOT_EXIST,
            Error::Read(_) => CODE_READ_ERROR,
            Error::Write(_) => CODE_WRITE_ERROR,
            Error::RepositoryConfiguration(_) => CODE_REPOSITORY_CONFIGURATION_ERROR,
            Error::IncompatibleRepositoryVersion { .. } => CODE_INCOMPATIBLE_REPOSITORY_VERSION,
            Error::CorruptedRepositorySpec { .. } => CODE_CORRUPTED_REPOSITORY_SPEC,
            Error::ConfigNotFound(_) => CODE_CONFIG_NOT_FOUND,
            _ => "",
        }
    }

    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Error::DoesNotExist(_))
    }

    pub fn is_config_not_found(&self) -> bool {
        matches!(self, Error::ConfigNotFound(_))
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

/// Builds the error returned for a URL whose scheme is empty or unsupported.
pub fn unknown_repository_scheme(scheme: &str) -> Error {
    let message = if scheme.is_empty() {
        "Missing repository scheme".to_string()
    } else {
        format!("Unknown repository scheme: {}", scheme)
    };
    Error::RepositoryConfiguration(format!(
        "{}.\n\nMake sure your repository URL starts with either 'file://', 's3://', or 'gs://'.",
        message
    ))
}
