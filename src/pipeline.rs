//! The caption core end to end: script words and recognizer tokens in,
//! timed cues out. Pure and synchronous; the async collaborators live in
//! `lib.rs`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::align::{validate_tokens, AlignmentMatcher, MatchQuality, MatchedWord, RecognizedToken};
use crate::captions::{chunk, CaptionCue};
use crate::config::CaptionConfig;
use crate::error::CaptionResult;
use crate::text::{narration_script, normalize, ReferenceWord};
use crate::timing::{synthesize, verify_timeline, TimedWord};

/// Too many words fell back to interpolated timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentDegraded {
    pub unmatched_fraction: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub exact: usize,
    pub fuzzy: usize,
    pub unmatched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<AlignmentDegraded>,
}

impl AlignmentReport {
    fn from_matches(matches: &[MatchedWord], threshold: f64) -> Self {
        let count = |quality| matches.iter().filter(|m| m.quality() == quality).count();
        let exact = count(MatchQuality::Exact);
        let fuzzy = count(MatchQuality::Fuzzy);
        let unmatched = count(MatchQuality::Unmatched);

        let unmatched_fraction = if matches.is_empty() {
            0.0
        } else {
            unmatched as f64 / matches.len() as f64
        };
        let degraded = (unmatched_fraction > threshold).then_some(AlignmentDegraded {
            unmatched_fraction,
            threshold,
        });

        Self {
            exact,
            fuzzy,
            unmatched,
            degraded,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Everything the compositor and the metadata file need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionTrack {
    pub total_duration: f64,
    pub cues: Vec<CaptionCue>,
    pub words: Vec<TimedWord>,
    pub matches: Vec<MatchedWord>,
    pub report: AlignmentReport,
}

pub struct SubtitlePipeline {
    config: CaptionConfig,
    matcher: AlignmentMatcher,
}

impl SubtitlePipeline {
    /// Fails with `CaptionError::Config` before anything runs.
    pub fn new(config: CaptionConfig) -> CaptionResult<Self> {
        config.validate()?;
        let matcher = AlignmentMatcher::new(config.alignment.clone());
        Ok(Self { config, matcher })
    }

    pub fn config(&self) -> &CaptionConfig {
        &self.config
    }

    /// Normalize the confession and build the text handed to TTS.
    pub fn prepare(&self, text: &str, voice: &str) -> CaptionResult<(Vec<ReferenceWord>, String)> {
        let words = normalize(text, voice)?;
        let script = narration_script(&words);
        debug!("Normalized {} words: {}", words.len(), script);
        Ok((words, script))
    }

    /// Match recognizer output to the script and build the caption track.
    pub fn align(
        &self,
        words: &[ReferenceWord],
        tokens: &[RecognizedToken],
        total_duration: f64,
    ) -> CaptionResult<CaptionTrack> {
        validate_tokens(tokens)?;

        let matches = self.matcher.align(words, tokens);
        for (word, m) in words.iter().zip(&matches) {
            match m.token() {
                Some(token) => debug!(
                    "{:>9} '{}' <- '{}' [{:.2}s - {:.2}s]",
                    m.quality(),
                    word.text,
                    token.text,
                    token.start_time,
                    token.end_time
                ),
                None => debug!("unmatched '{}'", word.text),
            }
        }

        let timed = synthesize(words, &matches, total_duration)?;
        verify_timeline(&timed, total_duration)?;
        let cues = chunk(&timed, &self.config.chunking, total_duration);

        let report = AlignmentReport::from_matches(&matches, self.config.alignment.degraded_threshold);
        match &report.degraded {
            Some(degraded) => warn!(
                "Alignment degraded: {:.0}% of words unmatched (threshold {:.0}%), using interpolated timing",
                degraded.unmatched_fraction * 100.0,
                degraded.threshold * 100.0
            ),
            None => info!(
                "Aligned {} words: {} exact, {} fuzzy, {} unmatched -> {} cues",
                words.len(),
                report.exact,
                report.fuzzy,
                report.unmatched,
                cues.len()
            ),
        }

        Ok(CaptionTrack {
            total_duration,
            cues,
            words: timed,
            matches,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptionError;

    fn pipeline() -> SubtitlePipeline {
        SubtitlePipeline::new(CaptionConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let mut config = CaptionConfig::default();
        config.chunking.min_cue_duration = -1.0;
        assert!(matches!(
            SubtitlePipeline::new(config),
            Err(CaptionError::Config { .. })
        ));
    }

    #[test]
    fn test_empty_text_rejected() {
        assert!(matches!(
            pipeline().prepare("   ", "en-US-ChristopherNeural"),
            Err(CaptionError::Normalization { .. })
        ));
    }

    #[test]
    fn test_prepare_spells_out_url() {
        let (words, script) = pipeline()
            .prepare("Go to confess.com now", "en-US-ChristopherNeural")
            .unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[2].text, "confess.com");
        assert!(script.contains("confess dot com"));
    }

    #[test]
    fn test_full_alignment() {
        let pipeline = pipeline();
        let (words, _) = pipeline
            .prepare("I never told anyone this.", "en-US-ChristopherNeural")
            .unwrap();
        let tokens = vec![
            RecognizedToken::new(" I", 0.0, 0.2, 0.9),
            RecognizedToken::new(" never", 0.2, 0.6, 0.9),
            RecognizedToken::new(" told", 0.6, 0.9, 0.9),
            RecognizedToken::new(" anyone", 0.9, 1.4, 0.9),
            RecognizedToken::new(" this.", 1.4, 1.8, 0.9),
        ];
        let track = pipeline.align(&words, &tokens, 2.0).unwrap();

        assert_eq!(track.report.exact, 5);
        assert!(!track.report.is_degraded());
        assert_eq!(track.cues.len(), 1);
        assert_eq!(track.cues[0].text, "I never told anyone this.");
        assert_eq!(track.cues[0].start_time, 0.0);
        assert_eq!(track.cues[0].end_time, 2.0);
    }

    #[test]
    fn test_no_tokens_is_degraded_not_fatal() {
        let pipeline = pipeline();
        let (words, _) = pipeline
            .prepare("Nobody heard me say this", "en-US-ChristopherNeural")
            .unwrap();
        let track = pipeline.align(&words, &[], 4.0).unwrap();

        assert_eq!(track.report.unmatched, 5);
        assert!(track.report.is_degraded());
        assert!(track.words.iter().all(|w| w.synthesized));
        assert_eq!(track.words.last().unwrap().end_time, 4.0);
    }

    #[test]
    fn test_non_monotonic_tokens_rejected() {
        let pipeline = pipeline();
        let (words, _) = pipeline.prepare("a b", "en-US-ChristopherNeural").unwrap();
        let tokens = vec![
            RecognizedToken::new("a", 1.0, 1.2, 0.9),
            RecognizedToken::new("b", 0.5, 0.7, 0.9),
        ];
        assert!(matches!(
            pipeline.align(&words, &tokens, 2.0),
            Err(CaptionError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_report_serializes_without_degraded() {
        let report = AlignmentReport {
            exact: 2,
            fuzzy: 1,
            unmatched: 0,
            degraded: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"exact":2,"fuzzy":1,"unmatched":0}"#);
    }
}
