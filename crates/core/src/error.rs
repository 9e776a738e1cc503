use std::path::PathBuf;

/// Result alias that carries the custom [`HapticError`] type.
pub type Result<T> = std::result::Result<T, HapticError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum HapticError {
    /// The audio stream could not be decoded.
    #[error("failed to decode audio: {0}")]
    Decode(String),
    /// The container or codec is not supported by the decoder.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
    /// Decoding succeeded but produced no samples.
    #[error("audio track contains no samples")]
    EmptyAudio,
    /// A feature matrix is malformed (no frames, ragged rows, ...).
    #[error("invalid feature matrix: {0}")]
    InvalidFeatureMatrix(String),
    #[error("onset arrays differ in length ({timestamps} timestamps, {strengths} strengths)")]
    MismatchedOnsetArrays { timestamps: usize, strengths: usize },
    #[error("invalid timestamp {0}: must be finite and non-negative")]
    InvalidTimestamp(f64),
    #[error("invalid duration {0}: must be finite and greater than zero")]
    InvalidDuration(f64),
    /// Persisting a document failed. No file is left at `path`.
    #[error("failed to write `{}`: {source}", path.display())]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A parsed document does not follow the pattern schema.
    #[error("invalid haptic pattern document: {0}")]
    InvalidDocument(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
    /// Wrapper around standard IO errors raised while reading.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

impl HapticError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoWrite {
            path: path.into(),
            source,
        }
    }
}

impl From<&str> for HapticError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for HapticError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
