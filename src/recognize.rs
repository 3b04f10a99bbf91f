use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::align::RecognizedToken;
use crate::text::locale_of;

/// Speech recognition collaborator: audio in, timestamped tokens out.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(&self, audio: &Path, tier: ModelTier) -> Result<Vec<RecognizedToken>>;
}

/// Available Whisper model sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModel {
    Tiny,
    Base,
    #[default]
    Small,
    Medium,
    Large,
}

impl WhisperModel {
    /// Get approximate model size for display
    pub fn size_display(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "~75 MB",
            WhisperModel::Base => "~142 MB",
            WhisperModel::Small => "~466 MB",
            WhisperModel::Medium => "~1.5 GB",
            WhisperModel::Large => "~2.9 GB",
        }
    }

    /// ggml model filename; `english_only` picks the `.en` variant where one exists.
    pub fn ggml_filename(&self, english_only: bool) -> &'static str {
        match (self, english_only) {
            (WhisperModel::Tiny, false) => "ggml-tiny.bin",
            (WhisperModel::Tiny, true) => "ggml-tiny.en.bin",
            (WhisperModel::Base, false) => "ggml-base.bin",
            (WhisperModel::Base, true) => "ggml-base.en.bin",
            (WhisperModel::Small, false) => "ggml-small.bin",
            (WhisperModel::Small, true) => "ggml-small.en.bin",
            (WhisperModel::Medium, false) => "ggml-medium.bin",
            (WhisperModel::Medium, true) => "ggml-medium.en.bin",
            // No English-only large model is published
            (WhisperModel::Large, _) => "ggml-large-v3.bin",
        }
    }

    /// Get HuggingFace download URL for the model
    pub fn download_url(&self, english_only: bool) -> String {
        format!("{}/{}", MODEL_DOWNLOAD_BASE, self.ggml_filename(english_only))
    }

    /// Parse from user input
    pub fn from_input(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "large-v1" | "large-v2" | "large-v3" => Some(WhisperModel::Large),
            other => other.trim_end_matches(".en").parse().ok(),
        }
    }
}

/// A model size plus whether its English-only variant is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTier {
    pub model: WhisperModel,
    pub english_only: bool,
}

impl ModelTier {
    /// English voices get the `.en` model unless `non_english` is set.
    pub fn for_voice(model: WhisperModel, voice: &str, non_english: bool) -> Self {
        Self {
            model,
            english_only: !non_english && locale_of(voice) == "en",
        }
    }

    pub fn ggml_filename(&self) -> &'static str {
        self.model.ggml_filename(self.english_only)
    }

    /// Language passed to whisper.cpp
    pub fn language(&self) -> &'static str {
        if self.english_only {
            "en"
        } else {
            "auto"
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.english_only && self.model != WhisperModel::Large {
            write!(f, "{}.en", self.model)
        } else {
            write!(f, "{}", self.model)
        }
    }
}

/// Get the whisper.cpp models directory
pub fn whisper_models_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".cache").join("whisper.cpp"),
        None => PathBuf::from("models"),
    }
}

/// Locate a whisper.cpp binary on PATH or in the working directory.
pub fn whisper_cpp_binary() -> Option<String> {
    // whisper-cli is the name used by recent releases and scoop
    let binary_names = ["whisper-cli", "whisper", "whisper-cpp", "main"];
    for name in binary_names {
        if which::which(name).is_ok() {
            return Some(name.to_string());
        }
    }

    let current_dir_binaries = [
        "whisper-cli.exe",
        "whisper.exe",
        "whisper-cpp.exe",
        "main.exe",
        "whisper-cli",
        "whisper",
        "main",
    ];
    current_dir_binaries
        .into_iter()
        .find(|name| Path::new(name).exists())
        .map(|name| format!("./{}", name))
}

pub const MODEL_DOWNLOAD_BASE: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// whisper.cpp run as a subprocess, one word per segment.
#[derive(Debug, Clone)]
pub struct WhisperCpp {
    models_dir: PathBuf,
    download_base: String,
    /// Held while a model is fetched, so concurrent jobs download it once
    download_lock: Arc<Mutex<()>>,
}

impl WhisperCpp {
    pub fn new() -> Self {
        Self {
            models_dir: whisper_models_dir(),
            download_base: MODEL_DOWNLOAD_BASE.to_string(),
            download_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_models_dir(mut self, models_dir: PathBuf) -> Self {
        self.models_dir = models_dir;
        self
    }

    /// Fetch models from a mirror instead of HuggingFace.
    pub fn with_download_base(mut self, base: impl Into<String>) -> Self {
        self.download_base = base.into();
        self
    }

    /// Return the model path, downloading it on first use.
    pub async fn ensure_model(&self, tier: ModelTier) -> Result<PathBuf> {
        let model_path = self.models_dir.join(tier.ggml_filename());
        if model_path.exists() {
            return Ok(model_path);
        }

        let _guard = self.download_lock.lock().await;
        if model_path.exists() {
            debug!("{} was downloaded by another job", model_path.display());
            return Ok(model_path);
        }

        tokio::fs::create_dir_all(&self.models_dir)
            .await
            .with_context(|| format!("creating {}", self.models_dir.display()))?;

        let url = format!(
            "{}/{}",
            self.download_base.trim_end_matches('/'),
            tier.ggml_filename()
        );
        info!(
            "Downloading {} model ({}) from {}",
            tier,
            tier.model.size_display(),
            url
        );

        let mut response = reqwest::get(&url).await?.error_for_status().map_err(|e| {
            anyhow!(
                "Failed to download model: {}. Download it manually from:\n  {}\n  and save to: {}",
                e,
                url,
                model_path.display()
            )
        })?;

        let partial = model_path.with_extension("bin.part");
        let mut file = tokio::fs::File::create(&partial).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        tokio::fs::rename(&partial, &model_path).await?;

        info!("Model saved to {}", model_path.display());
        Ok(model_path)
    }
}

impl Default for WhisperCpp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperCpp {
    async fn recognize(&self, audio: &Path, tier: ModelTier) -> Result<Vec<RecognizedToken>> {
        let binary = whisper_cpp_binary()
            .ok_or_else(|| anyhow!("whisper.cpp binary not found. Please install it."))?;
        let model_path = self.ensure_model(tier).await?;

        let wav = audio.with_extension("wav");
        extract_audio(audio, &wav).await?;

        let output_base = audio.with_extension("whisper");
        debug!("Transcribing {} with whisper.cpp ({})", wav.display(), tier);

        let output = Command::new(&binary)
            .arg("-m")
            .arg(&model_path)
            .arg("-f")
            .arg(&wav)
            .args(["-l", tier.language()])
            .arg("--output-json-full")
            .arg("--split-on-word")
            .args(["--max-len", "1"])
            .arg("-of")
            .arg(&output_base)
            .output()
            .await
            .context("failed to run whisper.cpp")?;

        let _ = tokio::fs::remove_file(&wav).await;
        if !output.status.success() {
            bail!(
                "whisper.cpp failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let json_file = PathBuf::from(format!("{}.json", output_base.display()));
        let content = tokio::fs::read_to_string(&json_file)
            .await
            .with_context(|| format!("whisper.cpp wrote no output at {}", json_file.display()))?;
        let _ = tokio::fs::remove_file(&json_file).await;

        let tokens = parse_whisper_json(&content)?;
        info!("Recognized {} tokens", tokens.len());
        Ok(tokens)
    }
}

/// Convert audio to 16 kHz mono PCM, the only input whisper.cpp accepts.
async fn extract_audio(input: &Path, wav: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-loglevel", "error"])
        .arg("-i")
        .arg(input)
        .args(["-ar", "16000"])
        .args(["-ac", "1"])
        .args(["-c:a", "pcm_s16le"])
        .arg(wav)
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("Failed to extract audio from {}", input.display()))
    }
}

/// Parse `--output-json-full` output.
///
/// With `--max-len 1 --split-on-word` every segment holds one word; its
/// offsets (milliseconds) become the token timing and the mean probability
/// of its text tokens the confidence.
pub fn parse_whisper_json(content: &str) -> Result<Vec<RecognizedToken>> {
    let json: Value = serde_json::from_str(content)?;
    let segments = json
        .get("transcription")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow!("whisper.cpp output has no transcription"))?;

    let mut tokens = Vec::new();
    for segment in segments {
        let Some(text) = segment.get("text").and_then(|t| t.as_str()) else {
            continue;
        };
        let text = text.trim();
        // Skip blanks and annotations such as [BLANK_AUDIO] or (music)
        if text.is_empty() || text.starts_with('[') || text.starts_with('(') {
            continue;
        }

        let offsets = segment.get("offsets");
        let from = offsets.and_then(|o| o.get("from")).and_then(Value::as_f64);
        let to = offsets.and_then(|o| o.get("to")).and_then(Value::as_f64);
        let (Some(from), Some(to)) = (from, to) else {
            continue;
        };

        let probabilities: Vec<f64> = segment
            .get("tokens")
            .and_then(|t| t.as_array())
            .map(|list| {
                list.iter()
                    .filter(|token| {
                        token
                            .get("text")
                            .and_then(|t| t.as_str())
                            .is_some_and(|t| !t.starts_with("[_") && !t.starts_with("<|"))
                    })
                    .filter_map(|token| token.get("p").and_then(Value::as_f64))
                    .collect()
            })
            .unwrap_or_default();
        let confidence = if probabilities.is_empty() {
            1.0
        } else {
            probabilities.iter().sum::<f64>() / probabilities.len() as f64
        };

        let start = from / 1000.0;
        tokens.push(RecognizedToken::new(
            text,
            start,
            (to / 1000.0).max(start),
            confidence.clamp(0.0, 1.0),
        ));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whisper_model_from_input() {
        assert_eq!(WhisperModel::from_input("tiny"), Some(WhisperModel::Tiny));
        assert_eq!(WhisperModel::from_input("Small"), Some(WhisperModel::Small));
        assert_eq!(WhisperModel::from_input("base.en"), Some(WhisperModel::Base));
        assert_eq!(WhisperModel::from_input("large-v3"), Some(WhisperModel::Large));
        assert_eq!(WhisperModel::from_input("invalid"), None);
    }

    #[test]
    fn test_ggml_filename() {
        assert_eq!(WhisperModel::Small.ggml_filename(false), "ggml-small.bin");
        assert_eq!(WhisperModel::Small.ggml_filename(true), "ggml-small.en.bin");
        assert_eq!(WhisperModel::Large.ggml_filename(true), "ggml-large-v3.bin");
        assert!(WhisperModel::Tiny
            .download_url(true)
            .ends_with("/ggml-tiny.en.bin"));
    }

    #[test]
    fn test_model_tier_for_voice() {
        let tier = ModelTier::for_voice(WhisperModel::Small, "en-US-ChristopherNeural", false);
        assert!(tier.english_only);
        assert_eq!(tier.ggml_filename(), "ggml-small.en.bin");
        assert_eq!(tier.to_string(), "small.en");
        assert_eq!(tier.language(), "en");

        let tier = ModelTier::for_voice(WhisperModel::Small, "en-GB-SoniaNeural", true);
        assert!(!tier.english_only);
        assert_eq!(tier.language(), "auto");

        let tier = ModelTier::for_voice(WhisperModel::Base, "es-ES-AlvaroNeural", false);
        assert_eq!(tier.ggml_filename(), "ggml-base.bin");

        let tier = ModelTier::for_voice(WhisperModel::Large, "en-US-JennyNeural", false);
        assert_eq!(tier.to_string(), "large");
    }

    #[tokio::test]
    async fn test_ensure_model_uses_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        let tier = ModelTier::for_voice(WhisperModel::Tiny, "en-US-JennyNeural", false);
        let cached = dir.path().join("ggml-tiny.en.bin");
        std::fs::write(&cached, b"model").unwrap();

        let whisper = WhisperCpp::new().with_models_dir(dir.path().to_path_buf());
        assert_eq!(whisper.ensure_model(tier).await.unwrap(), cached);
    }

    #[tokio::test]
    async fn test_concurrent_jobs_download_model_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/:file",
            axum::routing::get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    "ggml weights"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let dir = tempfile::tempdir().unwrap();
        let whisper = WhisperCpp::new()
            .with_models_dir(dir.path().to_path_buf())
            .with_download_base(format!("http://{}", addr));
        let tier = ModelTier::for_voice(WhisperModel::Tiny, "en-US-JennyNeural", false);
        let other_job = whisper.clone();

        let (first, second) = tokio::join!(whisper.ensure_model(tier), other_job.ensure_model(tier));
        let path = first.unwrap();
        assert_eq!(second.unwrap(), path);
        assert_eq!(path, dir.path().join("ggml-tiny.en.bin"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ggml weights");
        assert!(!path.with_extension("bin.part").exists());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_whisper_json() {
        let content = r#"{
            "transcription": [
                {
                    "timestamps": {"from": "00:00:00,000", "to": "00:00:00,420"},
                    "offsets": {"from": 0, "to": 420},
                    "text": " Confess",
                    "tokens": [
                        {"text": "[_BEG_]", "p": 0.2},
                        {"text": " Conf", "p": 0.9},
                        {"text": "ess", "p": 0.7}
                    ]
                },
                {
                    "offsets": {"from": 420, "to": 900},
                    "text": " [BLANK_AUDIO]"
                },
                {
                    "offsets": {"from": 900, "to": 1100},
                    "text": " dot",
                    "tokens": []
                }
            ]
        }"#;

        let tokens = parse_whisper_json(content).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "Confess");
        assert_eq!(tokens[0].start_time, 0.0);
        assert_eq!(tokens[0].end_time, 0.42);
        assert!((tokens[0].confidence - 0.8).abs() < 1e-9);
        assert_eq!(tokens[1].text, "dot");
        assert_eq!(tokens[1].start_time, 0.9);
        assert_eq!(tokens[1].confidence, 1.0);
    }

    #[test]
    fn test_parse_rejects_foreign_json() {
        assert!(parse_whisper_json(r#"{"segments": []}"#).is_err());
        assert!(parse_whisper_json("not json").is_err());
    }

    #[test]
    fn test_models_dir_is_whisper_cache() {
        let dir = whisper_models_dir();
        assert!(dir.ends_with("whisper.cpp") || dir.ends_with("models"));
    }
}
