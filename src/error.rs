use thiserror::Error;

/// Crate-wide error type. One variant per category so call sites can match on
/// the failure class without string inspection.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("System error: {0}")]
    System(String),
}

impl Error {
    /// Category tag for log lines and exit-code mapping.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "I/O",
            Error::Memory(_) => "Memory",
            Error::Crypto(_) => "Crypto",
            Error::Parse(_) => "Parse",
            Error::Network(_) => "Network",
            Error::Config(_) => "Config",
            Error::Validation(_) => "Validation",
            Error::Runtime(_) => "Runtime",
            Error::System(_) => "System",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
