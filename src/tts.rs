use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::CaptionError;
use crate::video::probe_duration;

pub const DEFAULT_VOICE: &str = "en-US-ChristopherNeural";

/// Narration written to disk by a speech synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub path: PathBuf,
    /// Seconds
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Gender {
    Male,
    Female,
}

/// One entry of a synthesizer's voice catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub gender: Gender,
    /// `en-US`, taken from the voice name
    pub locale: String,
}

impl Voice {
    pub fn new(name: &str, gender: Gender) -> Self {
        let locale = name.splitn(3, '-').take(2).collect::<Vec<_>>().join("-");
        Self {
            name: name.to_string(),
            gender,
            locale,
        }
    }

    /// `en` matches every English locale, `en-GB` only British voices.
    pub fn speaks(&self, language: &str) -> bool {
        let language = language.trim();
        self.locale.eq_ignore_ascii_case(language)
            || (!language.contains('-')
                && self
                    .locale
                    .split('-')
                    .next()
                    .is_some_and(|lang| lang.eq_ignore_ascii_case(language)))
    }
}

/// How a job picks its narrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceChoice {
    Named(String),
    /// Any catalogue voice with this gender speaking `language` (e.g. `en-US`)
    Random { gender: Gender, language: String },
}

impl Default for VoiceChoice {
    fn default() -> Self {
        Self::Named(DEFAULT_VOICE.to_string())
    }
}

impl VoiceChoice {
    /// The voice name or language, enough to tell the narration's locale.
    pub fn locale_hint(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Random { language, .. } => language,
        }
    }

    /// Check the choice against the synthesizer's catalogue and return the
    /// voice name to synthesize with.
    pub async fn resolve(&self, tts: &dyn SpeechSynthesizer) -> Result<String> {
        let voices = tts.list_voices().await?;
        match self {
            Self::Named(name) => {
                if voices.iter().any(|v| v.name == *name) {
                    Ok(name.clone())
                } else {
                    Err(CaptionError::config(
                        "voice",
                        format!(
                            "`{}` is not an available voice; run `edge-tts --list-voices` to see them",
                            name
                        ),
                    )
                    .into())
                }
            }
            Self::Random { gender, language } => {
                let picked = pick_voice(&voices, *gender, language, &mut rand::thread_rng())
                    .map(|v| v.name.clone());
                match picked {
                    Some(name) => {
                        info!("Picked random {} voice {}", gender, name);
                        Ok(name)
                    }
                    None => Err(CaptionError::config(
                        "voice",
                        format!("no {} voice speaks `{}`", gender, language),
                    )
                    .into()),
                }
            }
        }
    }
}

/// A random voice of `gender` speaking `language`.
pub fn pick_voice<'a, R: Rng + ?Sized>(
    voices: &'a [Voice],
    gender: Gender,
    language: &str,
    rng: &mut R,
) -> Option<&'a Voice> {
    let candidates: Vec<&Voice> = voices
        .iter()
        .filter(|v| v.gender == gender && v.speaks(language))
        .collect();
    candidates.choose(rng).copied()
}

/// Parse `edge-tts --list-voices`. Newer releases print a table with `Name`
/// and `Gender` columns, older ones `Name: ..` / `Gender: ..` blocks.
pub fn parse_voice_list(output: &str) -> Vec<Voice> {
    let mut voices = Vec::new();
    let mut pending: Option<&str> = None;

    for line in output.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix("Name:") {
            pending = Some(name.trim());
            continue;
        }
        if let Some(gender) = line.strip_prefix("Gender:") {
            if let (Some(name), Ok(gender)) = (pending.take(), gender.trim().parse()) {
                voices.push(Voice::new(name, gender));
            }
            continue;
        }

        let mut columns = line.split_whitespace();
        if let (Some(name), Some(gender)) = (columns.next(), columns.next()) {
            if let Ok(gender) = gender.parse() {
                if name.contains('-') {
                    voices.push(Voice::new(name, gender));
                }
            }
        }
    }
    voices
}

/// Text-to-speech collaborator.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text` with `voice` into `output` (an mp3 file).
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<SynthesizedAudio>;

    /// Every voice this synthesizer can speak with.
    async fn list_voices(&self) -> Result<Vec<Voice>>;
}

/// The `edge-tts` command line tool.
#[derive(Debug, Clone)]
pub struct EdgeTts {
    binary: String,
    /// Catalogue fetched once and shared by every job
    voices: Arc<OnceCell<Vec<Voice>>>,
}

impl EdgeTts {
    pub fn new() -> Self {
        Self {
            binary: "edge-tts".to_string(),
            voices: Arc::new(OnceCell::new()),
        }
    }

    pub fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }
}

impl Default for EdgeTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTts {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<SynthesizedAudio> {
        info!("Synthesizing narration with {}", voice);
        debug!("Narration script: {}", text);

        let result = Command::new(&self.binary)
            .args(["--voice", voice])
            .args(["--text", text])
            .arg("--write-media")
            .arg(output)
            .output()
            .await
            .context("failed to run edge-tts")?;

        if !result.status.success() {
            bail!(
                "edge-tts failed for voice {}: {}",
                voice,
                String::from_utf8_lossy(&result.stderr)
            );
        }

        let duration = probe_duration(output).await?;
        debug!("Narration is {:.2}s", duration);
        Ok(SynthesizedAudio {
            path: output.to_path_buf(),
            duration,
        })
    }

    async fn list_voices(&self) -> Result<Vec<Voice>> {
        let voices = self
            .voices
            .get_or_try_init(|| async {
                let result = Command::new(&self.binary)
                    .arg("--list-voices")
                    .output()
                    .await
                    .context("failed to run edge-tts --list-voices")?;
                if !result.status.success() {
                    bail!(
                        "edge-tts --list-voices failed: {}",
                        String::from_utf8_lossy(&result.stderr)
                    );
                }
                let voices = parse_voice_list(&String::from_utf8_lossy(&result.stdout));
                if voices.is_empty() {
                    bail!("edge-tts listed no voices");
                }
                debug!("edge-tts offers {} voices", voices.len());
                Ok(voices)
            })
            .await?;
        Ok(voices.clone())
    }
}
