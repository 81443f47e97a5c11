use thiserror::Error;

/// Errors raised while building a host view.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FactError {
    /// A field every host must carry is absent or blank.
    #[error("host is missing required field '{0}'")]
    MissingField(&'static str),
}
