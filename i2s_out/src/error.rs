use thiserror::Error;

/// Coarse failure categories for the output driver.
///
/// Backends log the detailed vendor error; the enum just carries the
/// category and a short static description.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutputError {
    #[error("driver install failed: {0}")]
    Install(&'static str),
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    #[error("audio error: {0}")]
    Audio(&'static str),
}
