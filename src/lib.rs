pub mod align;
pub mod captions;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod recognize;
pub mod subtitle;
pub mod text;
pub mod timing;
pub mod tts;
pub mod video;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info};

pub use crate::align::{AlignmentMatcher, MatchQuality, MatchedWord, RecognizedToken};
pub use crate::captions::CaptionCue;
pub use crate::config::{
    AlignmentConfig, CaptionConfig, CaptionStyle, ChunkPolicy, HighlightFormat,
};
pub use crate::error::{CaptionError, CaptionResult};
pub use crate::pipeline::{AlignmentReport, CaptionTrack, SubtitlePipeline};
pub use crate::recognize::{ModelTier, SpeechRecognizer, WhisperCpp, WhisperModel};
pub use crate::text::{Confession, ReferenceWord};
pub use crate::timing::TimedWord;
pub use crate::tts::{
    EdgeTts, Gender, SpeechSynthesizer, SynthesizedAudio, Voice, VoiceChoice, DEFAULT_VOICE,
};
pub use crate::video::{BackgroundSource, Composition, FfmpegBackend, MusicMix, VideoBackend};

pub const DEFAULT_BACKGROUND: &str = "https://www.youtube.com/watch?v=intRX7BRA90";
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_BATCH_JOBS: usize = 2;

/// One video to generate.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub text: String,
    pub series: String,
    pub part: String,
    pub voice: VoiceChoice,
    pub model: WhisperModel,
    /// Decode with the multilingual model even for English voices
    pub non_english: bool,
    pub style: CaptionStyle,
    pub background: BackgroundSource,
    pub music: Option<MusicMix>,
    pub output_dir: PathBuf,
}

impl VideoRequest {
    pub fn new(text: impl Into<String>, background: BackgroundSource) -> Self {
        Self {
            text: text.into(),
            series: "Video".to_string(),
            part: "1".to_string(),
            voice: VoiceChoice::default(),
            model: WhisperModel::default(),
            non_english: false,
            style: CaptionStyle::default(),
            background,
            music: None,
            output_dir: PathBuf::from("output"),
        }
    }

    /// Same options, narrating `confession` instead.
    pub fn for_confession(&self, confession: &Confession) -> Self {
        Self {
            text: confession.script(),
            series: confession.series.clone(),
            part: confession.part.clone(),
            ..self.clone()
        }
    }

    /// Recognition model for narration spoken by `voice`.
    pub fn model_tier(&self, voice: &str) -> ModelTier {
        ModelTier::for_voice(self.model, voice, self.non_english)
    }
}

/// The external services a job talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub video: Arc<dyn VideoBackend>,
    /// Upper bound for each TTS and recognition call
    pub service_timeout: Duration,
}

impl Collaborators {
    /// edge-tts, whisper.cpp and ffmpeg from PATH.
    pub fn system() -> Self {
        Self {
            tts: Arc::new(EdgeTts::new()),
            recognizer: Arc::new(WhisperCpp::new()),
            video: Arc::new(FfmpegBackend::default()),
            service_timeout: DEFAULT_SERVICE_TIMEOUT,
        }
    }
}

/// Paths of a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedVideo {
    pub id: String,
    pub directory: PathBuf,
    pub video: PathBuf,
    pub narration: PathBuf,
    pub report: AlignmentReport,
}

/// `YYYYMMDD_HHMMSS_<series>_part<NN>`
pub fn job_id(series: &str, part: &str, now: NaiveDateTime) -> String {
    let series = match slug(series) {
        s if s.is_empty() => "video".to_string(),
        s => s,
    };
    let part = match slug(part) {
        p if p.is_empty() => "1".to_string(),
        p => p,
    };
    format!(
        "{}_{}_part{:0>2}",
        now.format("%Y%m%d_%H%M%S"),
        series,
        part
    )
}

fn slug(text: &str) -> String {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Claim a fresh directory under `output_dir`, suffixing the id if taken.
async fn create_job_dir(output_dir: &Path, id: &str) -> Result<(String, PathBuf)> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let mut attempt = 1;
    loop {
        let candidate = match attempt {
            1 => id.to_string(),
            n => format!("{}_{}", id, n),
        };
        let dir = output_dir.join(&candidate);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => return Ok((candidate, dir)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e).with_context(|| format!("creating {}", dir.display())),
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| anyhow!("{} timed out after {}s", what, limit.as_secs_f64()))?
}

/// Generate one video end to end.
///
/// Configuration, text and voice problems fail before the job directory
/// exists. Narration and background acquisition run concurrently;
/// recognition waits for the narration, and the caption core waits for
/// recognition.
pub async fn generate_video(
    request: &VideoRequest,
    config: &CaptionConfig,
    collaborators: &Collaborators,
) -> Result<GeneratedVideo> {
    let pipeline = SubtitlePipeline::new(config.clone())?;
    request.style.validate()?;
    if let Some(music) = &request.music {
        if !(0.0..=1.0).contains(&music.mix) {
            bail!("Music mix {} is outside 0..=1", music.mix);
        }
    }
    let (words, script) = pipeline.prepare(&request.text, request.voice.locale_hint())?;
    let voice = with_timeout(
        collaborators.service_timeout,
        "voice lookup",
        request.voice.resolve(collaborators.tts.as_ref()),
    )
    .await?;

    let id = job_id(
        &request.series,
        &request.part,
        chrono::Local::now().naive_local(),
    );
    let (id, directory) = create_job_dir(&request.output_dir, &id).await?;
    info!("[{}] Generating video ({} words, {})", id, words.len(), voice);

    let audio_path = directory.join(format!("{}.mp3", id));
    let narration = with_timeout(
        collaborators.service_timeout,
        "speech synthesis",
        collaborators
            .tts
            .synthesize(&script, &voice, &audio_path),
    );
    let background = collaborators.video.acquire_background(&request.background);
    let (audio, background) = tokio::try_join!(narration, background)?;
    info!("[{}] Narration ready ({:.1}s)", id, audio.duration);

    let tier = request.model_tier(&voice);
    let tokens = with_timeout(
        collaborators.service_timeout,
        "speech recognition",
        collaborators.recognizer.recognize(&audio.path, tier),
    )
    .await?;

    let track = pipeline.align(&words, &tokens, audio.duration)?;

    let ass_path = directory.join(format!("{}.ass", id));
    let srt_path = directory.join(format!("{}.srt", id));
    subtitle::write_subtitles(&track.cues, &request.style, &ass_path, &srt_path).await?;
    tokio::fs::write(
        directory.join(format!("{}.json", id)),
        serde_json::to_string_pretty(&track)?,
    )
    .await?;

    let composition = Composition {
        background,
        narration: audio.path.clone(),
        narration_duration: audio.duration,
        subtitles: ass_path,
        output: directory.join(format!("{}.mp4", id)),
        music: request.music.clone(),
    };
    let video = collaborators.video.compose(&composition).await?;
    info!("[{}] Video saved to {}", id, video.display());

    Ok(GeneratedVideo {
        id,
        directory,
        video,
        narration: audio.path,
        report: track.report,
    })
}

/// Read a `video.json` batch file.
pub fn load_confessions(path: &Path) -> Result<Vec<Confession>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let confessions: Vec<Confession> = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(confessions)
}

/// Generate one video per confession, at most `max_jobs` at a time.
/// Failures are logged and skipped; successes are returned in completion
/// order.
pub async fn generate_batch(
    template: &VideoRequest,
    confessions: &[Confession],
    config: &CaptionConfig,
    collaborators: &Collaborators,
    max_jobs: usize,
) -> Vec<GeneratedVideo> {
    let permits = Arc::new(Semaphore::new(max_jobs.max(1)));
    let mut jobs = tokio::task::JoinSet::new();
    for confession in confessions {
        let request = template.for_confession(confession);
        let config = config.clone();
        let collaborators = collaborators.clone();
        let permits = permits.clone();
        jobs.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => generate_video(&request, &config, &collaborators).await,
                Err(e) => Err(anyhow!("job queue closed: {}", e)),
            };
            (request.series, request.part, result)
        });
    }

    let mut generated = Vec::new();
    while let Some(joined) = jobs.join_next().await {
        match joined {
            Ok((_, _, Ok(video))) => generated.push(video),
            Ok((series, part, Err(e))) => error!("{} part {} failed: {:#}", series, part, e),
            Err(e) => error!("Video job panicked: {}", e),
        }
    }
    generated
}

pub fn check_dependencies() -> Result<()> {
    if which::which("ffmpeg").is_err() || which::which("ffprobe").is_err() {
        return Err(anyhow!(
            "FFmpeg not found. Please install FFmpeg (with ffprobe) and ensure it is in PATH."
        ));
    }

    if which::which("yt-dlp").is_err() {
        return Err(anyhow!("yt-dlp not found. Please install it and ensure it is in PATH.\nDownload: https://github.com/yt-dlp/yt-dlp/releases"));
    }

    if !EdgeTts::new().is_available() {
        return Err(anyhow!(
            "edge-tts not found. Install it with: pip install edge-tts"
        ));
    }

    if recognize::whisper_cpp_binary().is_none() {
        return Err(anyhow!(
            "whisper.cpp not found.\nDownload from: https://github.com/ggerganov/whisper.cpp/releases"
        ));
    }

    Ok(())
}
