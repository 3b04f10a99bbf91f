use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

pub const OUTPUT_WIDTH: u32 = 1080;
pub const OUTPUT_HEIGHT: u32 = 1920;

/// Where the background footage comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundSource {
    Local(PathBuf),
    YouTube { url: String, video_id: String },
}

impl BackgroundSource {
    /// A YouTube link, or else a path to an existing local file.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(video_id) = extract_video_id(input) {
            return Ok(Self::YouTube {
                url: input.to_string(),
                video_id,
            });
        }
        let path = PathBuf::from(input);
        if path.is_file() {
            Ok(Self::Local(path))
        } else {
            Err(anyhow!(
                "Background `{}` is neither a YouTube link nor an existing file",
                input
            ))
        }
    }
}

/// Extract the YouTube video ID from a given URL.
pub fn extract_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;

    if host == "youtu.be" || host == "www.youtu.be" {
        let id = parsed.path().trim_start_matches('/');
        return (!id.is_empty()).then(|| id.to_string());
    }

    if host == "youtube.com" || host == "www.youtube.com" || host == "m.youtube.com" {
        if parsed.path() == "/watch" {
            return parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned());
        }
        if parsed.path().starts_with("/shorts/") {
            let parts: Vec<&str> = parsed.path().split('/').collect();
            if parts.len() >= 3 && !parts[2].is_empty() {
                return Some(parts[2].to_string());
            }
        }
    }

    None
}

/// Background music laid under the narration.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicMix {
    pub path: PathBuf,
    /// Music volume in 0..=1; the narration plays at `1 - mix`
    pub mix: f64,
}

/// Everything needed to render one video.
#[derive(Debug, Clone)]
pub struct Composition {
    pub background: PathBuf,
    pub narration: PathBuf,
    pub narration_duration: f64,
    pub subtitles: PathBuf,
    pub output: PathBuf,
    pub music: Option<MusicMix>,
}

/// Background acquisition and final rendering.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Make the background available as a local file.
    async fn acquire_background(&self, source: &BackgroundSource) -> Result<PathBuf>;

    /// Render the vertical video and return its path.
    async fn compose(&self, composition: &Composition) -> Result<PathBuf>;
}

/// ffmpeg/ffprobe/yt-dlp on PATH.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    /// Downloaded backgrounds, keyed by video id
    cache_dir: PathBuf,
    /// One yt-dlp run at a time, so jobs sharing a background fetch it once
    download_lock: Arc<Mutex<()>>,
}

impl FfmpegBackend {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            download_lock: Arc::new(Mutex::new(())),
        }
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("background")
    }
}

#[async_trait]
impl VideoBackend for FfmpegBackend {
    async fn acquire_background(&self, source: &BackgroundSource) -> Result<PathBuf> {
        let (url, video_id) = match source {
            BackgroundSource::Local(path) => return Ok(path.clone()),
            BackgroundSource::YouTube { url, video_id } => (url, video_id),
        };

        let target = self.cache_dir.join(format!("{}.mp4", video_id));
        let _guard = self.download_lock.lock().await;
        if target.exists() {
            debug!("Using cached background {}", target.display());
            return Ok(target);
        }
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        info!("Downloading background {}", url);
        let status = Command::new("yt-dlp")
            .args(["--force-ipv4", "--quiet", "--no-warnings"])
            .arg("-f")
            .arg("bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best")
            .args(["--merge-output-format", "mp4"])
            .arg("-o")
            .arg(&target)
            .arg(url)
            .status()
            .await
            .context("failed to run yt-dlp")?;

        if !status.success() || !target.exists() {
            bail!("Failed to download background video {}", url);
        }
        Ok(target)
    }

    async fn compose(&self, composition: &Composition) -> Result<PathBuf> {
        let background_duration = probe_duration(&composition.background).await?;
        let offset = {
            let mut rng = rand::thread_rng();
            start_offset(
                background_duration,
                composition.narration_duration,
                &mut rng,
            )
        };
        let loop_background = background_duration < composition.narration_duration;

        let subtitles = composition
            .subtitles
            .canonicalize()
            .unwrap_or_else(|_| composition.subtitles.clone());
        let graph = filter_graph(&subtitles, composition.music.as_ref().map(|m| m.mix));

        let mut command = Command::new("ffmpeg");
        command.args(["-y", "-hide_banner", "-loglevel", "error"]);
        if loop_background {
            command.args(["-stream_loop", "-1"]);
        }
        command
            .arg("-ss")
            .arg(format!("{:.3}", offset))
            .arg("-i")
            .arg(&composition.background)
            .arg("-i")
            .arg(&composition.narration);
        if let Some(music) = &composition.music {
            command
                .args(["-stream_loop", "-1", "-i"])
                .arg(&music.path);
        }
        command
            .args(["-filter_complex", &graph])
            .args(["-map", "[v]", "-map", "[a]"])
            .arg("-t")
            .arg(format!("{:.3}", composition.narration_duration))
            .args(["-c:v", "libx264", "-preset", "veryfast", "-crf", "23"])
            .args(["-c:a", "aac", "-ac", "2", "-b:a", "192k"])
            .arg(&composition.output);

        info!(
            "Rendering {} (background offset {:.1}s)",
            composition.output.display(),
            offset
        );
        let output = command.output().await.context("failed to run ffmpeg")?;
        if !output.status.success() {
            bail!(
                "ffmpeg failed to render video: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(composition.output.clone())
    }
}

/// Random start inside the background so the narration fits.
pub fn start_offset<R: Rng>(background_duration: f64, narration_duration: f64, rng: &mut R) -> f64 {
    let slack = background_duration - narration_duration;
    if slack > 0.0 {
        rng.gen_range(0.0..slack)
    } else {
        0.0
    }
}

/// Crop to 9:16, scale, blur slightly and burn the subtitles; narration only
/// or narration mixed with music.
pub fn filter_graph(subtitles: &Path, music_mix: Option<f64>) -> String {
    let video = format!(
        "[0:v]crop=ih/16*9:ih,scale=w={}:h={}:flags=lanczos,gblur=sigma=2,ass='{}'[v]",
        OUTPUT_WIDTH,
        OUTPUT_HEIGHT,
        escape_filter_path(subtitles)
    );
    let audio = match music_mix {
        None => "[1:a]anull[a]".to_string(),
        Some(mix) => format!(
            "[1:a]volume={:.3}[narration];[2:a]volume={:.3}[music];\
             [narration][music]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[a]",
            1.0 - mix,
            mix
        ),
    };
    format!("{};{}", video, audio)
}

/// ffmpeg filter arguments need forward slashes and escaped colons.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Media duration in seconds, via ffprobe.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("failed to run ffprobe")?;

    if !output.status.success() {
        bail!(
            "ffprobe failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    parse_probe_duration(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("no duration reported for {}", path.display()))
}

fn parse_probe_duration(stdout: &str) -> Result<f64> {
    let duration: f64 = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != "N/A")
        .ok_or_else(|| anyhow!("empty ffprobe output"))?
        .parse()?;
    if duration.is_finite() && duration > 0.0 {
        Ok(duration)
    } else {
        Err(anyhow!("invalid duration {}", duration))
    }
}
