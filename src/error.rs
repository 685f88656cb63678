use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The row arena hit its hard cap and flushing did not free enough room.
    #[error("out of buffer space: {needed} bytes needed, {available} available")]
    OutOfBuffer { needed: usize, available: usize },

    #[error("raster input error: {0}")]
    Reader(String),

    #[error("job cancelled")]
    Cancelled,
}

/// Job option string rejections.  Every variant names the offending key so
/// the driver can report it verbatim.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("unknown option {0}")]
    UnknownOption(String),

    #[error("the value of {key} must be {expected}")]
    BadValue { key: String, expected: String },

    #[error("option {0} requires a value")]
    MissingValue(String),

    #[error("options {0} and {1} are mutually exclusive")]
    Exclusive(&'static str, &'static str),
}
