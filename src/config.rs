use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{CaptionError, CaptionResult};

/// Tuning for the reference/recognition alignment pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Number of recognized tokens scanned ahead of the cursor for each word
    pub lookahead_window: usize,
    /// Minimum similarity for a fuzzy match, in (0, 1]
    pub similarity_threshold: f64,
    /// How many consecutive tokens one reference word may be matched against
    pub max_merge_tokens: usize,
    /// Fuzzy matches below this mean token confidence are rejected
    pub min_fuzzy_confidence: f64,
    /// Unmatched fraction above which the track is reported as degraded
    pub degraded_threshold: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            lookahead_window: 5,
            similarity_threshold: 0.6,
            max_merge_tokens: 3,
            min_fuzzy_confidence: 0.3,
            degraded_threshold: 0.5,
        }
    }
}

impl AlignmentConfig {
    pub fn validate(&self) -> CaptionResult<()> {
        if self.lookahead_window == 0 {
            return Err(CaptionError::config(
                "lookahead_window",
                "must scan at least one token",
            ));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(CaptionError::config(
                "similarity_threshold",
                format!("{} is outside (0, 1]", self.similarity_threshold),
            ));
        }
        if self.max_merge_tokens == 0 {
            return Err(CaptionError::config(
                "max_merge_tokens",
                "must allow at least one token",
            ));
        }
        check_unit("min_fuzzy_confidence", self.min_fuzzy_confidence)?;
        check_unit("degraded_threshold", self.degraded_threshold)?;
        Ok(())
    }
}

/// Cue packing policy for the caption chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkPolicy {
    pub max_chars_per_line: usize,
    pub max_lines_per_cue: usize,
    /// Optional hard cap on words per cue
    pub max_words_per_cue: Option<usize>,
    /// Seconds
    pub max_cue_duration: f64,
    /// Shortest time a sentence-ending cue stays on screen, seconds
    pub min_cue_duration: f64,
    /// A pause between words longer than this many seconds starts a new cue
    pub silence_threshold: f64,
    /// Flush a cue after a word ending a sentence
    pub break_on_punctuation: bool,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_chars_per_line: 20,
            max_lines_per_cue: 2,
            max_words_per_cue: None,
            max_cue_duration: 3.0,
            min_cue_duration: 0.5,
            silence_threshold: 2.0,
            break_on_punctuation: true,
        }
    }
}

impl ChunkPolicy {
    pub const MAX_LINES: usize = 2;

    pub fn validate(&self) -> CaptionResult<()> {
        if self.max_chars_per_line == 0 {
            return Err(CaptionError::config(
                "max_chars_per_line",
                "must be at least 1",
            ));
        }
        if self.max_lines_per_cue == 0 || self.max_lines_per_cue > Self::MAX_LINES {
            return Err(CaptionError::config(
                "max_lines_per_cue",
                format!("{} is outside 1..={}", self.max_lines_per_cue, Self::MAX_LINES),
            ));
        }
        if self.max_words_per_cue == Some(0) {
            return Err(CaptionError::config(
                "max_words_per_cue",
                "must be at least 1 when set",
            ));
        }
        if !(self.max_cue_duration > 0.0) || !self.max_cue_duration.is_finite() {
            return Err(CaptionError::config(
                "max_cue_duration",
                format!("{} is not a positive duration", self.max_cue_duration),
            ));
        }
        if !(self.min_cue_duration >= 0.0) || self.min_cue_duration > self.max_cue_duration {
            return Err(CaptionError::config(
                "min_cue_duration",
                format!(
                    "{} must be within 0..={}",
                    self.min_cue_duration, self.max_cue_duration
                ),
            ));
        }
        if !(self.silence_threshold >= 0.0) || !self.silence_threshold.is_finite() {
            return Err(CaptionError::config(
                "silence_threshold",
                format!("{} is not a valid duration", self.silence_threshold),
            ));
        }
        Ok(())
    }
}

/// Everything the caption core needs, loadable from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    pub alignment: AlignmentConfig,
    pub chunking: ChunkPolicy,
}

impl CaptionConfig {
    pub fn validate(&self) -> CaptionResult<()> {
        self.alignment.validate()?;
        self.chunking.validate()
    }

    /// Load and validate a config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CaptionConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

/// How the word being spoken is marked inside its caption.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum HighlightFormat {
    /// Show each cue whole, with no per-word marking
    #[strum(to_string = "none", serialize = "n")]
    None,
    #[strum(to_string = "u", serialize = "underline")]
    Underline,
    #[strum(to_string = "i", serialize = "italic")]
    Italic,
    #[default]
    #[strum(to_string = "b", serialize = "bold")]
    Bold,
    /// `\k` karaoke fill from the secondary to the primary colour
    #[strum(to_string = "k", serialize = "karaoke")]
    Karaoke,
}

/// Subtitle styling handed to the compositor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionStyle {
    pub font: String,
    pub font_size: u32,
    /// RGB hex, with or without a leading `#`
    pub color: String,
    /// ASS numpad alignment: 1 bottom-left .. 5 center .. 9 top-right
    pub position: u8,
    pub highlight: HighlightFormat,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font: "Lexend Bold".to_string(),
            font_size: 21,
            color: "00B400".to_string(),
            position: 5,
            highlight: HighlightFormat::default(),
        }
    }
}

impl CaptionStyle {
    pub fn validate(&self) -> CaptionResult<()> {
        if self.font.trim().is_empty() {
            return Err(CaptionError::config("font", "font name is empty"));
        }
        if self.font_size == 0 {
            return Err(CaptionError::config("font_size", "must be positive"));
        }
        if !(1..=9).contains(&self.position) {
            return Err(CaptionError::config(
                "position",
                format!("{} is outside 1..=9", self.position),
            ));
        }
        self.rgb_hex().map(|_| ())
    }

    /// Normalized `RRGGBB` colour (upper-case, no `#`).
    pub fn rgb_hex(&self) -> CaptionResult<String> {
        let hex = self.color.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CaptionError::config(
                "color",
                format!("`{}` is not a six digit hex colour", self.color),
            ));
        }
        Ok(hex.to_ascii_uppercase())
    }
}

fn check_unit(field: &'static str, value: f64) -> CaptionResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CaptionError::config(
            field,
            format!("{} is outside [0, 1]", value),
        ))
    }
}
