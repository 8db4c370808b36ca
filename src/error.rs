//! Error types for the audio-to-MIDI converter

use std::fmt;

/// Error type for conversion and tempo analysis
#[derive(Debug, Clone, PartialEq)]
pub enum ConvertError {
    /// E001: Audio could not be read, is corrupt, or uses an unsupported format
    Decode(String),
    /// E002: Signal is empty or too degenerate to analyze
    Analysis(String),
    /// E003: Output could not be written
    Io(String),
    /// E004: Conversion parameter or configuration value out of range
    InvalidParameter(String),
    /// E005: Run was cancelled between pipeline stages
    Cancelled,
}

impl ConvertError {
    /// Stable error code, suitable for branching in front ends
    pub fn code(&self) -> &'static str {
        match self {
            ConvertError::Decode(_) => "E001",
            ConvertError::Analysis(_) => "E002",
            ConvertError::Io(_) => "E003",
            ConvertError::InvalidParameter(_) => "E004",
            ConvertError::Cancelled => "E005",
        }
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Decode(msg) => write!(f, "E001: Audio decode error - {}", msg),
            ConvertError::Analysis(msg) => write!(f, "E002: Analysis error - {}", msg),
            ConvertError::Io(msg) => write!(f, "E003: Output I/O error - {}", msg),
            ConvertError::InvalidParameter(msg) => {
                write!(f, "E004: Invalid parameter - {}", msg)
            }
            ConvertError::Cancelled => write!(f, "E005: Conversion cancelled"),
        }
    }
}

impl std::error::Error for ConvertError {}

impl From<std::io::Error> for ConvertError {
    fn from(err: std::io::Error) -> Self {
        ConvertError::Io(err.to_string())
    }
}

impl From<hound::Error> for ConvertError {
    fn from(err: hound::Error) -> Self {
        ConvertError::Decode(format!("WAV read error: {}", err))
    }
}

impl From<symphonia::core::errors::Error> for ConvertError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        ConvertError::Decode(format!("Decoder error: {}", err))
    }
}

impl From<serde_json::Error> for ConvertError {
    fn from(err: serde_json::Error) -> Self {
        ConvertError::Io(format!("JSON serialization error: {}", err))
    }
}

/// Result type alias for conversion operations
pub type Result<T> = std::result::Result<T, ConvertError>;
