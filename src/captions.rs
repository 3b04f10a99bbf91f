use serde::{Deserialize, Serialize};

use crate::config::ChunkPolicy;
use crate::text::WordKind;
use crate::timing::TimedWord;

const EPSILON: f64 = 1e-9;

/// One on-screen subtitle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionCue {
    pub start_time: f64,
    pub end_time: f64,
    /// Wrapped display lines, at most `ChunkPolicy::MAX_LINES`
    pub lines: Vec<String>,
    /// The cue's words joined by single spaces, before wrapping
    pub text: String,
    /// The timed words shown by this cue, for per-word highlighting
    pub words: Vec<TimedWord>,
}

impl CaptionCue {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    fn from_words(words: &[TimedWord], policy: &ChunkPolicy) -> Self {
        let start_time = words.first().map_or(0.0, |w| w.start_time);
        let end_time = words.last().map_or(start_time, |w| w.end_time);
        Self {
            start_time,
            end_time,
            lines: wrap_lines(words, policy.max_chars_per_line, policy.max_lines_per_cue),
            text: words
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            words: words.to_vec(),
        }
    }
}

/// Pack timed words into cues.
///
/// Words accumulate into the current cue while the wrapped text fits in
/// `max_lines_per_cue` lines, the cue spans at most `max_cue_duration` and
/// no pause inside it exceeds `silence_threshold`. Sentence-ending words
/// close the cue when `break_on_punctuation` is set, unless the cue would
/// then be on screen for less than `min_cue_duration`.
///
/// The resulting cues tile `[0, total_duration]` without gaps or overlap.
/// Every cue but the first starts with its first word; each cue is held
/// until the next one starts, and the last until the narration ends.
pub fn chunk(words: &[TimedWord], policy: &ChunkPolicy, total_duration: f64) -> Vec<CaptionCue> {
    let mut cues = Vec::new();
    let mut start = 0;

    for i in 0..words.len() {
        if i > start && !fits(&words[start..=i], policy) {
            cues.push(CaptionCue::from_words(&words[start..i], policy));
            start = i;
        }
        if policy.break_on_punctuation
            && ends_sentence(&words[i].text)
            && held_long_enough(&words[start], words.get(i + 1), policy)
        {
            cues.push(CaptionCue::from_words(&words[start..=i], policy));
            start = i + 1;
        }
    }
    if start < words.len() {
        cues.push(CaptionCue::from_words(&words[start..], policy));
    }

    settle_timing(&mut cues, total_duration);
    cues
}

fn fits(candidate: &[TimedWord], policy: &ChunkPolicy) -> bool {
    let (Some(first), Some(last)) = (candidate.first(), candidate.last()) else {
        return true;
    };
    if last.end_time - first.start_time > policy.max_cue_duration + EPSILON {
        return false;
    }
    if let [.., before, _] = candidate {
        if last.start_time - before.end_time > policy.silence_threshold + EPSILON {
            return false;
        }
    }
    if policy
        .max_words_per_cue
        .is_some_and(|max| candidate.len() > max)
    {
        return false;
    }
    wrap_lines(candidate, policy.max_chars_per_line, policy.max_lines_per_cue).len()
        <= policy.max_lines_per_cue
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end_matches(['"', '\'', ')', '\u{201d}'])
        .ends_with(['.', '!', '?'])
}

/// A sentence break after the current word keeps the cue on screen until
/// the next word starts; skip the break if that is shorter than
/// `min_cue_duration`.
fn held_long_enough(first: &TimedWord, next: Option<&TimedWord>, policy: &ChunkPolicy) -> bool {
    next.map_or(true, |next| {
        next.start_time - first.start_time + EPSILON >= policy.min_cue_duration
    })
}

/// Hold every cue until the next one starts so the cues tile the narration.
/// Only ends move, so no caption appears before its first word is spoken.
fn settle_timing(cues: &mut [CaptionCue], total_duration: f64) {
    let count = cues.len();
    for i in 0..count {
        let next_start = if i + 1 < count {
            cues[i + 1].start_time
        } else {
            total_duration
        };
        let cue = &mut cues[i];
        cue.end_time = next_start.max(cue.end_time);
    }

    if let Some(first) = cues.first_mut() {
        first.start_time = 0.0;
    }
}

/// Greedy word wrap.
///
/// Words are never split or hyphenated; a word longer than the line gets a
/// line of its own. Web addresses start a fresh line and are broken at `.`
/// boundaries only when they cannot fit on a single line.
pub fn wrap_lines(words: &[TimedWord], max_chars: usize, max_lines: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in words {
        let len = word.text.chars().count();

        if word.kind == WordKind::Url {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if len <= max_chars {
                current = word.text.clone();
            } else {
                let mut pieces = split_url(&word.text, max_chars, max_lines);
                current = pieces.pop().unwrap_or_default();
                lines.extend(pieces);
            }
            continue;
        }

        if current.is_empty() {
            current = word.text.clone();
        } else if current.chars().count() + 1 + len <= max_chars {
            current.push(' ');
            current.push_str(&word.text);
        } else {
            lines.push(std::mem::replace(&mut current, word.text.clone()));
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Break an address after its dots, packing segments greedily into lines.
/// Anything beyond `max_lines` stays on the last line.
fn split_url(url: &str, max_chars: usize, max_lines: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for piece in url.split_inclusive('.') {
        let fits = current.chars().count() + piece.chars().count() <= max_chars;
        if current.is_empty() || fits || lines.len() + 1 >= max_lines.max(1) {
            current.push_str(piece);
        } else {
            lines.push(std::mem::replace(&mut current, piece.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(text: &str, start: f64, end: f64) -> TimedWord {
        TimedWord {
            text: text.to_string(),
            start_time: start,
            end_time: end,
            synthesized: false,
            kind: if crate::text::is_url_like(text) {
                WordKind::Url
            } else {
                WordKind::Word
            },
        }
    }

    /// Words of 0.3s each, back to back.
    fn sequence(texts: &[&str]) -> Vec<TimedWord> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| timed(t, i as f64 * 0.3, (i + 1) as f64 * 0.3))
            .collect()
    }

    fn policy() -> ChunkPolicy {
        ChunkPolicy {
            max_chars_per_line: 20,
            max_lines_per_cue: 2,
            max_words_per_cue: None,
            max_cue_duration: 3.0,
            min_cue_duration: 0.5,
            silence_threshold: 2.0,
            break_on_punctuation: false,
        }
    }

    #[test]
    fn test_long_word_alone_unsplit() {
        let word = "a".repeat(40);
        let words = vec![timed(&word, 0.0, 1.0)];
        let cues = chunk(&words, &policy(), 1.0);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].lines, vec![word]);
    }

    #[test]
    fn test_long_word_gets_own_line() {
        let long = "b".repeat(30);
        let lines = wrap_lines(&sequence(&["hi", &long, "there"]), 20, 3);
        assert_eq!(lines, vec!["hi".to_string(), long, "there".to_string()]);
    }

    #[test]
    fn test_wraps_into_two_lines_then_flushes() {
        let words = sequence(&[
            "I", "secretly", "replaced", "my", "brother's", "protein", "powder", "with", "flour",
        ]);
        let cues = chunk(&words, &policy(), 2.7);

        for cue in &cues {
            assert!(cue.lines.len() <= 2);
            assert!(cue.lines.iter().all(|l| l.chars().count() <= 20));
        }
        assert_eq!(cues[0].lines, vec!["I secretly replaced", "my brother's protein"]);
        assert_eq!(cues[1].text, "powder with flour");
    }

    #[test]
    fn test_max_duration_flushes() {
        let words = vec![
            timed("slow", 0.0, 1.5),
            timed("words", 1.5, 3.0),
            timed("here", 3.0, 4.0),
        ];
        let cues = chunk(&words, &policy(), 4.0);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "slow words");
        assert_eq!(cues[1].text, "here");
    }

    #[test]
    fn test_max_words_flushes() {
        let policy = ChunkPolicy {
            max_words_per_cue: Some(2),
            ..policy()
        };
        let cues = chunk(&sequence(&["one", "two", "three"]), &policy, 0.9);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "one two");
    }

    #[test]
    fn test_sentence_end_flushes() {
        let policy = ChunkPolicy {
            break_on_punctuation: true,
            ..policy()
        };
        let cues = chunk(&sequence(&["It", "hurt.", "Then", "I", "laughed!"]), &policy, 1.5);
        let texts: Vec<&str> = cues.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["It hurt.", "Then I laughed!"]);
    }

    #[test]
    fn test_url_starts_new_line() {
        let lines = wrap_lines(&sequence(&["visit", "confess.com", "now"]), 20, 2);
        assert_eq!(lines, vec!["visit", "confess.com now"]);
    }

    #[test]
    fn test_url_split_only_when_too_long() {
        let lines = wrap_lines(&sequence(&["www.myconfessions.co.za"]), 20, 2);
        assert_eq!(lines, vec!["www.myconfessions.", "co.za"]);

        let lines = wrap_lines(&sequence(&["www.myconfessions.co.za"]), 30, 2);
        assert_eq!(lines, vec!["www.myconfessions.co.za"]);
    }

    #[test]
    fn test_url_split_capped_at_max_lines() {
        let lines = wrap_lines(&sequence(&["www.averyveryverylongname.co.za"]), 8, 2);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines.concat(), "www.averyveryverylongname.co.za");
    }

    #[test]
    fn test_url_after_words_moves_to_next_cue_when_split() {
        let cues = chunk(
            &sequence(&["go", "to", "www.myconfessions.co.za"]),
            &policy(),
            0.9,
        );
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "go to");
        assert_eq!(cues[1].lines, vec!["www.myconfessions.", "co.za"]);
    }

    #[test]
    fn test_min_duration_stops_at_next_word() {
        let words = vec![timed("quick", 0.8, 1.0), timed("gap", 1.2, 2.0)];
        let policy = ChunkPolicy {
            max_cue_duration: 0.5,
            ..policy()
        };
        let cues = chunk(&words, &policy, 2.0);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].end_time, 1.2);
        assert!(cues[0].end_time <= cues[1].start_time);
    }

    #[test]
    fn test_short_cue_held_until_next_word() {
        let words = vec![timed("quick", 0.0, 0.2), timed("later", 2.0, 3.0)];
        let policy = ChunkPolicy {
            max_cue_duration: 0.5,
            ..policy()
        };
        let cues = chunk(&words, &policy, 3.0);
        assert_eq!(cues[0].end_time, 2.0);
        assert_eq!(cues[1].start_time, 2.0);
    }

    #[test]
    fn test_sentence_break_skipped_when_too_brief() {
        let policy = ChunkPolicy {
            break_on_punctuation: true,
            ..policy()
        };
        let words = vec![
            timed("Wait.", 0.0, 0.2),
            timed("Then", 0.2, 0.4),
            timed("go.", 0.4, 0.7),
        ];
        let cues = chunk(&words, &policy, 0.7);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "Wait. Then go.");
    }

    #[test]
    fn test_silence_bridged_and_track_covers_narration() {
        let words = vec![
            timed("first", 0.3, 0.8),
            timed("second", 1.0, 1.4),
            timed("third", 3.2, 3.6),
        ];
        let policy = ChunkPolicy {
            max_cue_duration: 0.6,
            silence_threshold: 2.0,
            ..policy()
        };
        let cues = chunk(&words, &policy, 4.0);
        assert_eq!(cues.first().unwrap().start_time, 0.0);
        assert_eq!(cues.last().unwrap().end_time, 4.0);
        for pair in cues.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
    }

    #[test]
    fn test_long_silence_never_shows_next_cue_early() {
        let policy = ChunkPolicy {
            break_on_punctuation: true,
            ..policy()
        };
        let words = vec![
            timed("Wait.", 0.0, 0.5),
            timed("Then", 10.0, 10.3),
            timed("it", 10.3, 10.5),
            timed("happened.", 10.5, 11.0),
        ];
        let cues = chunk(&words, &policy, 11.0);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].end_time, 10.0);
        assert_eq!(cues[1].start_time, 10.0);
        assert_eq!(cues[1].end_time, 11.0);
        for cue in &cues[1..] {
            assert_eq!(cue.start_time, cue.words[0].start_time);
        }
    }

    #[test]
    fn test_pause_longer_than_threshold_breaks_cue() {
        let words = vec![timed("one", 0.0, 0.3), timed("two", 2.6, 2.9)];
        let cues = chunk(&words, &policy(), 3.0);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[1].start_time, 2.6);

        let words = vec![timed("one", 0.0, 0.3), timed("two", 1.0, 1.3)];
        assert_eq!(chunk(&words, &policy(), 1.5).len(), 1);
    }

    #[test]
    fn test_cue_keeps_its_words() {
        let cues = chunk(&sequence(&["It", "hurt"]), &policy(), 0.6);
        let texts: Vec<&str> = cues[0].words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["It", "hurt"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk(&[], &policy(), 1.0).is_empty());
    }
}
