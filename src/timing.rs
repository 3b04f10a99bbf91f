use serde::{Deserialize, Serialize};

use crate::align::{MatchedWord, WordMatch};
use crate::error::{CaptionError, CaptionResult};
use crate::text::{ReferenceWord, WordKind};

/// Shortest duration any word is squeezed to, in seconds
pub const MIN_WORD_DURATION: f64 = 0.04;

const EPSILON: f64 = 1e-9;

/// A reference word with its final on-screen timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedWord {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    /// True when the timing was interpolated rather than recognized
    pub synthesized: bool,
    pub kind: WordKind,
}

impl TimedWord {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Give every reference word a timing.
///
/// Matched words keep their recognized timestamps (clamped to the narration
/// and made non-overlapping). Runs of unmatched words share the interval
/// between their neighbouring anchors in proportion to spoken length; a
/// leading run starts at 0, a trailing run ends at `total_duration`.
pub fn synthesize(
    words: &[ReferenceWord],
    matched: &[MatchedWord],
    total_duration: f64,
) -> CaptionResult<Vec<TimedWord>> {
    if !total_duration.is_finite() || total_duration <= 0.0 {
        return Err(CaptionError::invalid_input(format!(
            "narration duration must be positive, got {}",
            total_duration
        )));
    }
    if words.len() != matched.len() {
        return Err(CaptionError::invalid_input(format!(
            "{} reference words but {} alignment results",
            words.len(),
            matched.len()
        )));
    }
    if let Some((i, m)) = matched
        .iter()
        .enumerate()
        .find(|(i, m)| m.reference_index != words[*i].index)
    {
        return Err(CaptionError::invalid_input(format!(
            "alignment result {} refers to word {} instead of {}",
            i, m.reference_index, words[i].index
        )));
    }
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let mut spans = anchor_spans(matched, total_duration);
    fill_unmatched_runs(words, &mut spans, total_duration);

    let n = words.len();
    let mut starts: Vec<f64> = Vec::with_capacity(n);
    let mut ends: Vec<f64> = Vec::with_capacity(n);
    for span in &spans {
        let (start, end) = span.unwrap_or((0.0, 0.0));
        starts.push(start);
        ends.push(end);
    }
    enforce_positive_durations(&mut starts, &mut ends, total_duration);

    Ok(words
        .iter()
        .zip(matched)
        .enumerate()
        .map(|(i, (word, m))| TimedWord {
            text: word.text.clone(),
            start_time: starts[i],
            end_time: ends[i],
            synthesized: matches!(m.outcome, WordMatch::Unmatched),
            kind: word.kind,
        })
        .collect())
}

/// Recognized timings, clamped to `[0, total]` and made monotone.
fn anchor_spans(matched: &[MatchedWord], total: f64) -> Vec<Option<(f64, f64)>> {
    let mut previous_end = 0.0_f64;
    matched
        .iter()
        .map(|m| match &m.outcome {
            WordMatch::Exact { token } | WordMatch::Fuzzy { token, .. } => {
                let start = token.start_time.clamp(previous_end, total);
                let end = token.end_time.clamp(start, total);
                previous_end = end;
                Some((start, end))
            }
            WordMatch::Unmatched => None,
        })
        .collect()
}

fn fill_unmatched_runs(words: &[ReferenceWord], spans: &mut [Option<(f64, f64)>], total: f64) {
    let n = spans.len();
    let mut i = 0;
    while i < n {
        if spans[i].is_some() {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < n && spans[i].is_none() {
            i += 1;
        }
        let run_end = i;

        let left = match run_start {
            0 => 0.0,
            _ => spans[run_start - 1].map_or(0.0, |(_, end)| end),
        };
        let right = if run_end == n {
            total
        } else {
            spans[run_end].map_or(total, |(start, _)| start)
        };
        let right = right.max(left);

        let weights: Vec<f64> = words[run_start..run_end]
            .iter()
            .map(|w| w.spoken_len() as f64)
            .collect();
        let total_weight: f64 = weights.iter().sum();

        let mut consumed = 0.0_f64;
        let mut cursor = left;
        for (offset, weight) in weights.iter().enumerate() {
            consumed += weight;
            let end = if offset + 1 == weights.len() {
                right
            } else {
                left + (right - left) * consumed / total_weight
            };
            spans[run_start + offset] = Some((cursor, end));
            cursor = end;
        }
    }
}

/// Push words apart until each lasts at least a small positive duration,
/// without leaving `[0, total]`.
///
/// A forward pass removes overlaps and grows short words; a backward pass
/// pulls anything that ran past the end back in. With the minimum capped at
/// `total / 2n` the backward pass never pushes a start below zero.
fn enforce_positive_durations(starts: &mut [f64], ends: &mut [f64], total: f64) {
    let n = starts.len();
    let min_duration = MIN_WORD_DURATION.min(total / (2 * n) as f64);

    let mut previous_end = 0.0_f64;
    for i in 0..n {
        starts[i] = starts[i].max(previous_end);
        ends[i] = ends[i].max(starts[i] + min_duration);
        previous_end = ends[i];
    }

    let mut next_start = total;
    for i in (0..n).rev() {
        ends[i] = ends[i].min(next_start);
        starts[i] = starts[i].min(ends[i] - min_duration);
        next_start = starts[i];
    }
}

/// Check the timeline invariants: inside `[0, total]`, positive durations,
/// non-decreasing starts, no overlap, and interpolated words reaching the
/// ends of the narration.
///
/// Recognized words may leave silence before the first word or after the
/// last one; an interpolated first word must start at 0 and an interpolated
/// last word must end at `total_duration`.
pub fn verify_timeline(words: &[TimedWord], total_duration: f64) -> CaptionResult<()> {
    for (i, word) in words.iter().enumerate() {
        if word.start_time < -EPSILON || word.end_time > total_duration + EPSILON {
            return Err(CaptionError::invalid_input(format!(
                "word {} (`{}`) lies outside the narration",
                i, word.text
            )));
        }
        if word.duration() <= 0.0 {
            return Err(CaptionError::invalid_input(format!(
                "word {} (`{}`) has no duration",
                i, word.text
            )));
        }
    }
    for pair in words.windows(2) {
        if pair[1].start_time + EPSILON < pair[0].start_time {
            return Err(CaptionError::invalid_input(format!(
                "`{}` starts before `{}`",
                pair[1].text, pair[0].text
            )));
        }
        if pair[0].end_time > pair[1].start_time + EPSILON {
            return Err(CaptionError::invalid_input(format!(
                "`{}` overlaps `{}`",
                pair[0].text, pair[1].text
            )));
        }
    }

    if let Some(first) = words.first().filter(|w| w.synthesized) {
        if first.start_time > EPSILON {
            return Err(CaptionError::invalid_input(format!(
                "interpolated first word `{}` starts at {:.3} instead of 0",
                first.text, first.start_time
            )));
        }
    }
    if let Some(last) = words.last().filter(|w| w.synthesized) {
        if (last.end_time - total_duration).abs() > EPSILON {
            return Err(CaptionError::invalid_input(format!(
                "interpolated last word `{}` ends at {:.3} instead of {:.3}",
                last.text, last.end_time, total_duration
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::RecognizedToken;

    fn reference(texts: &[&str]) -> Vec<ReferenceWord> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| ReferenceWord {
                text: text.to_string(),
                normalized_text: text.to_lowercase(),
                index,
                kind: WordKind::Word,
            })
            .collect()
    }

    fn exact(index: usize, start: f64, end: f64) -> MatchedWord {
        MatchedWord {
            reference_index: index,
            outcome: WordMatch::Exact {
                token: RecognizedToken::new("x", start, end, 0.9),
            },
        }
    }

    fn unmatched(index: usize) -> MatchedWord {
        MatchedWord {
            reference_index: index,
            outcome: WordMatch::Unmatched,
        }
    }

    #[test]
    fn test_matched_words_keep_timestamps() {
        let words = reference(&["hello", "there"]);
        let matched = vec![exact(0, 0.1, 0.5), exact(1, 0.6, 1.0)];
        let timed = synthesize(&words, &matched, 2.0).unwrap();
        assert_eq!(timed[0].start_time, 0.1);
        assert_eq!(timed[0].end_time, 0.5);
        assert_eq!(timed[1].start_time, 0.6);
        assert!(!timed[1].synthesized);
    }

    #[test]
    fn test_gap_interpolated_by_length() {
        // "a" (1 char) and "abc" (3 chars) share the 0.4s gap 1:3
        let words = reference(&["start", "a", "abc", "end"]);
        let matched = vec![exact(0, 0.0, 0.5), unmatched(1), unmatched(2), exact(3, 0.9, 1.2)];
        let timed = synthesize(&words, &matched, 1.2).unwrap();

        assert!((timed[1].start_time - 0.5).abs() < 1e-9);
        assert!((timed[1].end_time - 0.6).abs() < 1e-9);
        assert!((timed[2].start_time - 0.6).abs() < 1e-9);
        assert_eq!(timed[2].end_time, 0.9);
        assert!(timed[1].synthesized && timed[2].synthesized);
        verify_timeline(&timed, 1.2).unwrap();
    }

    #[test]
    fn test_leading_and_trailing_runs() {
        let words = reference(&["so", "anyway", "bye", "now"]);
        let matched = vec![unmatched(0), exact(1, 1.0, 1.6), unmatched(2), unmatched(3)];
        let timed = synthesize(&words, &matched, 3.0).unwrap();

        assert_eq!(timed[0].start_time, 0.0);
        assert_eq!(timed[0].end_time, 1.0);
        assert_eq!(timed[2].start_time, 1.6);
        assert_eq!(timed[3].end_time, 3.0);
        verify_timeline(&timed, 3.0).unwrap();
    }

    #[test]
    fn test_zero_matches_spread_over_duration() {
        let words = reference(&["I", "never", "told", "anyone", "this"]);
        let matched: Vec<MatchedWord> = (0..words.len()).map(unmatched).collect();
        let timed = synthesize(&words, &matched, 10.0).unwrap();

        let total: f64 = timed.iter().map(TimedWord::duration).sum();
        assert!((total - 10.0).abs() < 1e-9);
        assert_eq!(timed[0].start_time, 0.0);
        assert_eq!(timed.last().unwrap().end_time, 10.0);
        assert!(timed.iter().all(|w| w.duration() > 0.0));
        // 20 spoken characters; "anyone" gets 6/20 of the time
        assert!((timed[3].duration() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_squeezed_unmatched_word_gets_positive_duration() {
        // No room between the anchors for the middle word
        let words = reference(&["one", "two", "three"]);
        let matched = vec![exact(0, 0.0, 0.5), unmatched(1), exact(2, 0.5, 1.0)];
        let timed = synthesize(&words, &matched, 1.0).unwrap();
        assert!(timed.iter().all(|w| w.duration() > 0.0));
        verify_timeline(&timed, 1.0).unwrap();
        assert_eq!(timed[2].end_time, 1.0);
    }

    #[test]
    fn test_overlapping_and_overlong_tokens_are_clamped() {
        let words = reference(&["a", "b"]);
        let matched = vec![exact(0, 0.0, 0.8), exact(1, 0.5, 2.5)];
        let timed = synthesize(&words, &matched, 2.0).unwrap();
        assert_eq!(timed[1].start_time, 0.8);
        assert_eq!(timed[1].end_time, 2.0);
        verify_timeline(&timed, 2.0).unwrap();
    }

    #[test]
    fn test_zero_length_token_stretched() {
        let words = reference(&["a", "b"]);
        let matched = vec![exact(0, 0.5, 0.5), exact(1, 0.5, 0.9)];
        let timed = synthesize(&words, &matched, 1.0).unwrap();
        assert!(timed[0].duration() > 0.0);
        verify_timeline(&timed, 1.0).unwrap();
    }

    fn word(text: &str, start: f64, end: f64, synthesized: bool) -> TimedWord {
        TimedWord {
            text: text.to_string(),
            start_time: start,
            end_time: end,
            synthesized,
            kind: WordKind::Word,
        }
    }

    #[test]
    fn test_verify_timeline_rejects_out_of_order_starts() {
        let words = vec![word("late", 0.5, 0.5 + 1e-3, false), word("early", 0.2, 0.4, false)];
        let err = verify_timeline(&words, 1.0).unwrap_err();
        assert!(err.to_string().contains("starts before"));
    }

    #[test]
    fn test_verify_timeline_coverage() {
        // Silence around recognized words is fine
        let recognized = vec![word("hi", 0.4, 0.8, false), word("there", 0.9, 1.2, false)];
        verify_timeline(&recognized, 2.0).unwrap();

        let leading = vec![word("so", 0.3, 0.6, true), word("yes", 0.6, 1.0, false)];
        assert!(verify_timeline(&leading, 1.0).is_err());

        let trailing = vec![word("yes", 0.0, 0.5, false), word("bye", 0.5, 0.9, true)];
        assert!(verify_timeline(&trailing, 1.0).is_err());

        let covered = vec![word("so", 0.0, 0.6, true), word("bye", 0.6, 1.0, true)];
        verify_timeline(&covered, 1.0).unwrap();
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let words = reference(&["a"]);
        let matched = vec![unmatched(0)];
        assert!(matches!(
            synthesize(&words, &matched, 0.0),
            Err(CaptionError::InvalidInput { .. })
        ));
        assert!(synthesize(&words, &matched, -3.0).is_err());
        assert!(synthesize(&words, &matched, f64::INFINITY).is_err());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let words = reference(&["a", "b"]);
        assert!(synthesize(&words, &[unmatched(0)], 1.0).is_err());
        assert!(synthesize(&words, &[unmatched(0), unmatched(0)], 1.0).is_err());
    }
}
