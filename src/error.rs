use thiserror::Error;

/// Errors raised by the caption core (normalization, alignment, timing, chunking).
///
/// External collaborators (TTS, recognition, ffmpeg) report through `anyhow`
/// instead; these variants are the only failures the core itself produces.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptionError {
    #[error("unusable confession text: {message}")]
    Normalization { message: String },
    #[error("invalid configuration for `{field}`: {message}")]
    Config {
        field: &'static str,
        message: String,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl CaptionError {
    pub(crate) fn normalization(message: impl Into<String>) -> Self {
        Self::Normalization {
            message: message.into(),
        }
    }

    pub(crate) fn config(field: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

pub type CaptionResult<T> = std::result::Result<T, CaptionError>;
