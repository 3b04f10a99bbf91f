use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use confession_shorts::{
    check_dependencies, generate_batch, generate_video, load_confessions, BackgroundSource,
    CaptionConfig, CaptionStyle, Collaborators, Gender, HighlightFormat, MusicMix, VideoRequest,
    VoiceChoice, WhisperModel, DEFAULT_BACKGROUND, DEFAULT_BATCH_JOBS, DEFAULT_VOICE,
};
use tracing::Level;

mod server;

#[derive(Parser, Debug)]
#[command(version, about = "Narrated confession shorts with aligned subtitles", long_about = None)]
struct Args {
    /// Confession text to narrate (prompted for when omitted)
    #[arg(long, conflicts_with = "json")]
    text: Option<String>,

    /// Batch file with a list of confessions (video.json)
    #[arg(long)]
    json: Option<PathBuf>,

    /// edge-tts voice
    #[arg(long, default_value = DEFAULT_VOICE)]
    voice: String,

    /// Narrate with a random voice of --gender speaking --language
    #[arg(long, requires = "gender", requires = "language")]
    random_voice: bool,

    /// Gender of the random voice (male, female)
    #[arg(long)]
    gender: Option<Gender>,

    /// Language of the random voice, e.g. en-US
    #[arg(long)]
    language: Option<String>,

    /// Whisper model size (tiny, base, small, medium, large)
    #[arg(long, default_value = "small", value_parser = parse_model)]
    model: WhisperModel,

    /// Use the multilingual model even for English voices
    #[arg(long)]
    non_english: bool,

    /// Subtitle font
    #[arg(long, default_value = "Lexend Bold")]
    font: String,

    /// Subtitle colour as RGB hex, e.g. 00B400
    #[arg(long, default_value = "00B400")]
    font_color: String,

    #[arg(long, default_value_t = 21)]
    font_size: u32,

    /// Subtitle position on the numpad grid (1-9, 5 is centre)
    #[arg(long, default_value_t = 5)]
    position: u8,

    /// Spoken-word highlight: u (underline), i (italic), b (bold), k (karaoke) or none
    #[arg(long, default_value = "b")]
    sub_format: HighlightFormat,

    /// YouTube link or local video file
    #[arg(long, default_value = DEFAULT_BACKGROUND)]
    background: String,

    /// Output directory
    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// Caption tuning (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Background music to mix under the narration
    #[arg(long)]
    music: Option<PathBuf>,

    /// Music volume, 0.0 - 1.0
    #[arg(long, default_value_t = 0.3, requires = "music")]
    mix: f64,

    /// Videos generated at once in batch mode
    #[arg(long, default_value_t = DEFAULT_BATCH_JOBS)]
    jobs: usize,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Run in web server mode
    #[arg(long)]
    server: bool,

    /// Port to run server on
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

fn parse_model(input: &str) -> Result<WhisperModel, String> {
    WhisperModel::from_input(input).ok_or_else(|| format!("unknown whisper model `{}`", input))
}

impl Args {
    fn template(&self) -> anyhow::Result<VideoRequest> {
        let background = BackgroundSource::parse(&self.background)?;
        let mut request = VideoRequest::new(String::new(), background);
        request.voice = match (self.random_voice, self.gender, &self.language) {
            (true, Some(gender), Some(language)) => VoiceChoice::Random {
                gender,
                language: language.clone(),
            },
            _ => VoiceChoice::Named(self.voice.clone()),
        };
        request.model = self.model;
        request.non_english = self.non_english;
        request.style = CaptionStyle {
            font: self.font.clone(),
            font_size: self.font_size,
            color: self.font_color.clone(),
            position: self.position,
            highlight: self.sub_format,
        };
        request.music = self.music.as_ref().map(|path| MusicMix {
            path: path.clone(),
            mix: self.mix,
        });
        request.output_dir = self.output.clone();
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    // Check dependencies (ffmpeg, yt-dlp, edge-tts, whisper.cpp)
    if let Err(e) = check_dependencies() {
        eprintln!("Error checking dependencies: {}", e);
        std::process::exit(1);
    }

    let config = match &args.config {
        Some(path) => CaptionConfig::load(path)?,
        None => CaptionConfig::default(),
    };
    config.validate()?;

    let template = args.template()?;
    let collaborators = Collaborators::system();

    if args.server {
        return server::start_server(args.port, template, config, collaborators).await;
    }

    if let Some(path) = &args.json {
        let confessions = load_confessions(path)?;
        let generated =
            generate_batch(&template, &confessions, &config, &collaborators, args.jobs).await;
        println!(
            "Finished processing. {} of {} video(s) saved to '{}'.",
            generated.len(),
            confessions.len(),
            args.output.display()
        );
        return Ok(());
    }

    let text = match &args.text {
        Some(text) => text.clone(),
        None => {
            print!("Enter confession text: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            line
        }
    };

    let mut request = template;
    request.text = text;
    match generate_video(&request, &config, &collaborators).await {
        Ok(generated) => {
            println!("Video saved to {}", generated.video.display());
            if generated.report.is_degraded() {
                println!(
                    "Warning: {} of {} words were timed by interpolation.",
                    generated.report.unmatched,
                    generated.report.exact + generated.report.fuzzy + generated.report.unmatched
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
