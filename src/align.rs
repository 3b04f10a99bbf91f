//! Greedy windowed alignment of the narration script against recognizer output.
//!
//! Each reference word scans a bounded window of tokens ahead of a cursor and
//! takes the best scoring token (or short run of tokens, when the recognizer
//! split the word). Words with no acceptable candidate are left unmatched and
//! the cursor stays put, so recognizer omissions and filler words only cost
//! the words around them.

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

use crate::config::AlignmentConfig;
use crate::error::{CaptionError, CaptionResult};
use crate::text::{fold, ReferenceWord, WordKind};

/// A word-like unit with timestamps, as emitted by the speech recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedToken {
    pub text: String,
    /// Seconds
    pub start_time: f64,
    /// Seconds
    pub end_time: f64,
    /// 0.0 - 1.0
    pub confidence: f64,
}

impl RecognizedToken {
    pub fn new(text: &str, start_time: f64, end_time: f64, confidence: f64) -> Self {
        Self {
            text: text.to_string(),
            start_time,
            end_time,
            confidence,
        }
    }
}

/// Reject recognizer output the timing stages cannot reason about.
pub fn validate_tokens(tokens: &[RecognizedToken]) -> CaptionResult<()> {
    let mut previous_start = 0.0_f64;
    for (i, token) in tokens.iter().enumerate() {
        if !token.start_time.is_finite() || !token.end_time.is_finite() {
            return Err(CaptionError::invalid_input(format!(
                "token {} (`{}`) has a non-finite timestamp",
                i, token.text
            )));
        }
        if token.start_time < 0.0 {
            return Err(CaptionError::invalid_input(format!(
                "token {} (`{}`) starts before zero",
                i, token.text
            )));
        }
        if token.end_time < token.start_time {
            return Err(CaptionError::invalid_input(format!(
                "token {} (`{}`) has a negative duration ({:.3}s -> {:.3}s)",
                i, token.text, token.start_time, token.end_time
            )));
        }
        if token.start_time < previous_start {
            return Err(CaptionError::invalid_input(format!(
                "token {} (`{}`) starts at {:.3}s, before the previous token at {:.3}s",
                i, token.text, token.start_time, previous_start
            )));
        }
        if !(0.0..=1.0).contains(&token.confidence) {
            return Err(CaptionError::invalid_input(format!(
                "token {} (`{}`) has confidence {} outside [0, 1]",
                i, token.text, token.confidence
            )));
        }
        previous_start = token.start_time;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MatchQuality {
    Exact,
    Fuzzy,
    Unmatched,
}

/// Outcome of aligning one reference word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "quality", rename_all = "lowercase")]
pub enum WordMatch {
    Exact { token: RecognizedToken },
    Fuzzy { token: RecognizedToken, score: f64 },
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedWord {
    pub reference_index: usize,
    #[serde(flatten)]
    pub outcome: WordMatch,
}

impl MatchedWord {
    pub fn quality(&self) -> MatchQuality {
        match self.outcome {
            WordMatch::Exact { .. } => MatchQuality::Exact,
            WordMatch::Fuzzy { .. } => MatchQuality::Fuzzy,
            WordMatch::Unmatched => MatchQuality::Unmatched,
        }
    }

    pub fn token(&self) -> Option<&RecognizedToken> {
        match &self.outcome {
            WordMatch::Exact { token } | WordMatch::Fuzzy { token, .. } => Some(token),
            WordMatch::Unmatched => None,
        }
    }
}

/// String similarity in [0, 1]; 1.0 means identical.
pub trait Similarity: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Normalized Levenshtein ratio over characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Levenshtein;

impl Similarity for Levenshtein {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let distance = levenshtein_distance(&a, &b);
        1.0 - distance as f64 / a.len().max(b.len()) as f64
    }
}

fn levenshtein_distance(a: &[char], b: &[char]) -> usize {
    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}

/// A run of `len` tokens starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    start: usize,
    len: usize,
    score: f64,
    exact: bool,
}

pub struct AlignmentMatcher<S = Levenshtein> {
    config: AlignmentConfig,
    similarity: S,
}

impl AlignmentMatcher<Levenshtein> {
    pub fn new(config: AlignmentConfig) -> Self {
        Self::with_similarity(config, Levenshtein)
    }
}

impl<S: Similarity> AlignmentMatcher<S> {
    pub fn with_similarity(config: AlignmentConfig, similarity: S) -> Self {
        Self { config, similarity }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Produce exactly one `MatchedWord` per reference word, in order.
    ///
    /// Never fails: with no usable tokens every word comes back unmatched.
    pub fn align(&self, words: &[ReferenceWord], tokens: &[RecognizedToken]) -> Vec<MatchedWord> {
        let folded: Vec<String> = tokens.iter().map(|t| fold(&t.text)).collect();
        let keys: Vec<String> = words.iter().map(match_key).collect();

        let mut cursor = 0;
        let mut matched = Vec::with_capacity(words.len());

        for (i, word) in words.iter().enumerate() {
            let outcome = match self.best_candidate(&keys[i], word, &folded, cursor, tokens.len()) {
                None => WordMatch::Unmatched,
                Some(candidate) if self.steals_from_next(i, words, &keys, &folded, cursor, &candidate) => {
                    debug!(
                        "'{}' skipped: next word matches inside tokens {}..{}",
                        word.text, cursor, candidate.start
                    );
                    WordMatch::Unmatched
                }
                Some(candidate) => {
                    let token = merge_tokens(&tokens[candidate.start..candidate.start + candidate.len]);
                    if candidate.exact {
                        cursor = candidate.start + candidate.len;
                        WordMatch::Exact { token }
                    } else if token.confidence >= self.config.min_fuzzy_confidence {
                        cursor = candidate.start + candidate.len;
                        WordMatch::Fuzzy {
                            token,
                            score: candidate.score,
                        }
                    } else {
                        debug!(
                            "'{}' fuzzy match '{}' rejected (confidence {:.2})",
                            word.text, token.text, token.confidence
                        );
                        WordMatch::Unmatched
                    }
                }
            };

            matched.push(MatchedWord {
                reference_index: word.index,
                outcome,
            });
        }

        matched
    }

    /// Best candidate starting in `[cursor, cursor + window)`.
    ///
    /// Ties keep the earliest start, then the shortest run.
    fn best_candidate(
        &self,
        key: &str,
        word: &ReferenceWord,
        folded: &[String],
        cursor: usize,
        limit: usize,
    ) -> Option<Candidate> {
        if key.is_empty() {
            return None;
        }
        let window_end = (cursor + self.config.lookahead_window).min(folded.len());
        let max_len = self.span_limit(word);

        let mut best: Option<Candidate> = None;
        for start in cursor..window_end {
            if folded[start].is_empty() {
                continue;
            }
            let mut joined = String::new();
            for len in 1..=max_len {
                let end = start + len;
                if end > limit {
                    break;
                }
                joined.push_str(&folded[end - 1]);

                let exact = joined == key;
                let score = if exact {
                    1.0
                } else {
                    self.similarity.similarity(key, &joined)
                };
                if score < self.config.similarity_threshold {
                    continue;
                }
                if best.map_or(true, |b| score > b.score) {
                    best = Some(Candidate {
                        start,
                        len,
                        score,
                        exact,
                    });
                }
            }
        }
        best
    }

    /// A candidate that skips tokens loses them to the next word if that word
    /// clears the threshold entirely inside the skipped region.
    fn steals_from_next(
        &self,
        i: usize,
        words: &[ReferenceWord],
        keys: &[String],
        folded: &[String],
        cursor: usize,
        candidate: &Candidate,
    ) -> bool {
        if candidate.start == cursor {
            return false;
        }
        let Some(next) = words.get(i + 1) else {
            return false;
        };
        self.best_candidate(&keys[i + 1], next, folded, cursor, candidate.start)
            .is_some()
    }

    fn span_limit(&self, word: &ReferenceWord) -> usize {
        match word.kind {
            WordKind::Url | WordKind::Number => {
                word.normalized_text.split_whitespace().count().max(1) + self.config.max_merge_tokens
                    - 1
            }
            WordKind::Word => self.config.max_merge_tokens,
        }
    }
}

fn match_key(word: &ReferenceWord) -> String {
    let key = fold(&word.normalized_text);
    if key.is_empty() {
        fold(&word.text)
    } else {
        key
    }
}

/// Collapse a run of tokens into one spanning token.
fn merge_tokens(run: &[RecognizedToken]) -> RecognizedToken {
    match run {
        [single] => single.clone(),
        _ => {
            let text = run
                .iter()
                .map(|t| t.text.trim())
                .collect::<Vec<_>>()
                .join(" ");
            let start_time = run.first().map_or(0.0, |t| t.start_time);
            let end_time = run
                .iter()
                .map(|t| t.end_time)
                .fold(start_time, f64::max);
            let confidence = if run.is_empty() {
                0.0
            } else {
                run.iter().map(|t| t.confidence).sum::<f64>() / run.len() as f64
            };
            RecognizedToken {
                text,
                start_time,
                end_time,
                confidence,
            }
        }
    }
}
