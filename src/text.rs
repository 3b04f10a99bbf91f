use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;
use url::Url;

use crate::error::{CaptionError, CaptionResult};

/// Outro appended to every confession read from a screenshot
pub const CONFESSION_OUTRO: &str = "Visit www.myconfessions.co.za to anonymously confess";

/// Top-level segments that mark a bare `a.b` token as a web address.
/// A bare address must write its top-level segment in lower case.
const KNOWN_TLDS: &[&str] = &[
    "com", "net", "org", "io", "co", "za", "uk", "us", "ca", "au", "de", "fr", "es", "it", "nl",
    "info", "biz", "me", "tv", "app", "dev", "ly", "gg", "xyz", "edu", "gov", "ai",
];

/// Top-level segments that are also English words; a bare address ending
/// in one must be written entirely in lower case.
const WORD_TLDS: &[&str] = &["me", "it", "us", "so", "in", "is", "to", "be", "do", "no", "my"];

/// How a reference word should be treated by matching and chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WordKind {
    #[default]
    Word,
    /// Contains digits; spelled out for matching, narrated as written
    Number,
    /// Web address; displayed literally, spoken segment by segment
    Url,
}

/// One word of the narration script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceWord {
    /// Display form, original casing and punctuation kept
    pub text: String,
    /// Spoken, lower-case form used for narration and matching
    pub normalized_text: String,
    pub index: usize,
    pub kind: WordKind,
}

impl ReferenceWord {
    /// Characters that take time to speak, used as interpolation weight.
    pub fn spoken_len(&self) -> usize {
        let len = self
            .normalized_text
            .chars()
            .filter(|c| !c.is_whitespace())
            .count();
        if len == 0 {
            self.text.chars().count().max(1)
        } else {
            len
        }
    }
}

/// A confession as stored in `video.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confession {
    pub series: String,
    pub part: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outro: Option<String>,
}

impl Confession {
    /// Build a confession from OCR text containing a `Confession #<n>` marker.
    pub fn from_extracted_text(extracted: &str) -> Option<Self> {
        let marker = confession_marker().captures(extracted)?;
        let part = marker.get(1)?.as_str().to_string();

        let cleaned = clean_confession_text(extracted);
        let mut words: Vec<&str> = cleaned.split_whitespace().collect();
        // The first two words are the "Confession #n" header itself
        if words.len() >= 3 {
            words.drain(..2);
        }

        Some(Self {
            series: "Confessions".to_string(),
            part,
            text: words.join(" "),
            outro: Some(CONFESSION_OUTRO.to_string()),
        })
    }

    /// Text to narrate: the confession followed by its outro.
    pub fn script(&self) -> String {
        match self.outro.as_deref().map(str::trim) {
            Some(outro) if !outro.is_empty() => format!("{} {}", self.text.trim(), outro),
            _ => self.text.trim().to_string(),
        }
    }
}

fn confession_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Confession #(\d+)").expect("valid confession regex"))
}

fn bare_domain() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)([a-z0-9-]+\.)+([a-z]{2,24})(/\S*)?$").expect("valid domain regex")
    })
}

/// Fix OCR and typography artifacts before tokenizing.
pub fn clean_confession_text(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .replace('\u{201c}', "")
        .replace('\u{201d}', ".")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{00ae}', '\u{00a9}'], ", crying emoji")
        .replace('|', "I")
}

/// Language part of a voice identifier (`en-US-ChristopherNeural` -> `en`).
pub fn locale_of(voice: &str) -> String {
    voice
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Split confession text into reference words with display and spoken forms.
pub fn normalize(raw: &str, voice: &str) -> CaptionResult<Vec<ReferenceWord>> {
    let cleaned = clean_confession_text(raw);
    if cleaned.trim().is_empty() {
        return Err(CaptionError::normalization(
            "text is empty after trimming",
        ));
    }

    let locale = locale_of(voice);
    let mut words: Vec<ReferenceWord> = Vec::new();
    let mut dangling: Vec<&str> = Vec::new();

    for raw_word in cleaned.split_whitespace() {
        let (normalized_text, kind) = spoken_form(raw_word, &locale);

        if normalized_text.is_empty() {
            // Punctuation or emoji travels with its neighbour
            match words.last_mut() {
                Some(previous) => {
                    previous.text.push(' ');
                    previous.text.push_str(raw_word);
                }
                None => dangling.push(raw_word),
            }
            continue;
        }

        let text = if dangling.is_empty() {
            raw_word.to_string()
        } else {
            let mut prefix = dangling.join(" ");
            dangling.clear();
            prefix.push(' ');
            prefix.push_str(raw_word);
            prefix
        };

        words.push(ReferenceWord {
            text,
            normalized_text,
            index: words.len(),
            kind,
        });
    }

    if words.is_empty() {
        // Nothing speakable; keep the symbols as one silent display word
        words.push(ReferenceWord {
            text: dangling.join(" "),
            normalized_text: String::new(),
            index: 0,
            kind: WordKind::Word,
        });
    }

    Ok(words)
}

/// Text to hand to the TTS engine: display words, except that web
/// addresses are read out segment by segment.
///
/// Numbers keep their written form; the engine reads prices, times and
/// decimals better than a word-by-word spelling.
pub fn narration_script(words: &[ReferenceWord]) -> String {
    words
        .iter()
        .map(|w| match w.kind {
            WordKind::Word | WordKind::Number => w.text.as_str(),
            WordKind::Url => w.normalized_text.as_str(),
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn spoken_form(word: &str, locale: &str) -> (String, WordKind) {
    if let Some(spoken) = spoken_url(word, locale) {
        return (spoken, WordKind::Url);
    }

    if locale == "en" && word.chars().any(|c| c.is_ascii_digit()) {
        return (spell_numbers(&word.to_lowercase()), WordKind::Number);
    }

    let lowered: String = word
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '\'')
        .flat_map(char::to_lowercase)
        .collect();
    (lowered.trim_matches('\'').to_string(), WordKind::Word)
}

/// Whether a whitespace-delimited token is a web address.
pub fn is_url_like(word: &str) -> bool {
    url_core(word).is_some()
}

/// Strip sentence punctuation around an address and return `(host, path)`.
fn url_core(word: &str) -> Option<(String, String)> {
    let trimmed = word
        .trim_start_matches(['(', '"', '\''])
        .trim_end_matches(['.', ',', '!', '?', ';', ':', ')', '"', '\'']);
    if !trimmed.contains('.') {
        return None;
    }

    if trimmed.contains("://") {
        let parsed = Url::parse(trimmed).ok()?;
        let host = parsed.host_str()?.to_string();
        let path = parsed.path().trim_matches('/').to_string();
        return Some((host, path));
    }

    let caps = bare_domain().captures(trimmed)?;
    let tld = caps.get(2)?.as_str();
    let lower = trimmed.to_ascii_lowercase();
    if !lower.starts_with("www.") {
        // "him.Me" is a missing space after a full stop, not an address
        if !KNOWN_TLDS.contains(&tld) {
            return None;
        }
        if WORD_TLDS.contains(&tld) && trimmed.chars().any(|c| c.is_ascii_uppercase()) {
            return None;
        }
    }

    let (host, path) = match trimmed.split_once('/') {
        Some((host, path)) => (host, path.trim_matches('/')),
        None => (trimmed, ""),
    };
    Some((host.to_ascii_lowercase(), path.to_ascii_lowercase()))
}

fn spoken_url(word: &str, locale: &str) -> Option<String> {
    let (host, path) = url_core(word)?;
    let (dot, slash, dash) = url_words(locale);

    let mut parts: Vec<String> = Vec::new();
    for (i, label) in host.split('.').filter(|l| !l.is_empty()).enumerate() {
        if i > 0 {
            parts.push(dot.to_string());
        }
        for (j, piece) in label.split('-').enumerate() {
            if j > 0 {
                parts.push(dash.to_string());
            }
            parts.push(speak_segment(piece));
        }
    }
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        parts.push(slash.to_string());
        parts.push(speak_segment(segment));
    }

    Some(parts.join(" "))
}

/// Short or vowel-less segments are spelled letter by letter.
fn speak_segment(segment: &str) -> String {
    let has_vowel = segment
        .chars()
        .any(|c| matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u' | 'y'));
    if segment.len() <= 2 || segment == "www" || !has_vowel {
        segment
            .chars()
            .filter(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_lowercase().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        segment
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    }
}

fn url_words(locale: &str) -> (&'static str, &'static str, &'static str) {
    match locale {
        "es" => ("punto", "barra", "guion"),
        "fr" => ("point", "slash", "tiret"),
        "de" => ("punkt", "schrägstrich", "bindestrich"),
        "pt" => ("ponto", "barra", "hífen"),
        "it" => ("punto", "slash", "trattino"),
        "nl" => ("punt", "slash", "streepje"),
        _ => ("dot", "slash", "dash"),
    }
}

/// Case and punctuation insensitive key used to compare words, with digit
/// runs spelled out so "3" and "three" compare equal.
pub fn fold(text: &str) -> String {
    let lowered = text.to_lowercase();
    let spelled = if lowered.chars().any(|c| c.is_ascii_digit()) {
        spell_numbers(&lowered)
    } else {
        lowered
    };
    spelled.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Spoken words for a token containing digits, space separated.
///
/// Each digit run is spelled on its own. Between digits `.` reads as
/// "point", `,` is a thousands separator and `:`, `/` or `-` only separate
/// the runs. Currency signs are read after the amount, `%` as "percent".
/// Other punctuation is dropped.
fn spell_numbers(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut parts: Vec<String> = Vec::new();
    let mut letters = String::new();
    let mut currency: Option<&str> = None;

    let flush_letters = |letters: &mut String, parts: &mut Vec<String>| {
        let word = letters.trim_matches('\'');
        if !word.is_empty() {
            parts.push(word.to_string());
        }
        letters.clear();
    };

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let between_digits = i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());

        if c.is_ascii_digit() {
            flush_letters(&mut letters, &mut parts);
            let mut digits = String::new();
            while i < chars.len() {
                let d = chars[i];
                let grouping = d == ','
                    && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
                    && !digits.is_empty();
                if d.is_ascii_digit() {
                    digits.push(d);
                } else if !grouping {
                    break;
                }
                i += 1;
            }
            parts.push(spell_digits(&digits));
            continue;
        }

        match c {
            '.' if between_digits => parts.push("point".to_string()),
            ':' | '/' | '-' if between_digits => {}
            '%' => {
                flush_letters(&mut letters, &mut parts);
                parts.push("percent".to_string());
            }
            '$' => currency = Some("dollars"),
            '£' => currency = Some("pounds"),
            '€' => currency = Some("euros"),
            c if c.is_alphanumeric() || c == '\'' => letters.push(c),
            _ => flush_letters(&mut letters, &mut parts),
        }
        i += 1;
    }
    flush_letters(&mut letters, &mut parts);
    if let Some(currency) = currency {
        parts.push(currency.to_string());
    }
    parts.join(" ")
}

/// A digit run as words; runs too long for [`spell_number`] are read digit
/// by digit.
fn spell_digits(digits: &str) -> String {
    match digits.parse::<u64>().ok().and_then(spell_number) {
        Some(spelled) => spelled,
        None => digits
            .chars()
            .filter_map(|d| d.to_digit(10))
            .filter_map(|d| spell_number(u64::from(d)))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// English words for 0..=999_999.
pub fn spell_number(n: u64) -> Option<String> {
    const ONES: [&str; 20] = [
        "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
        "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
        "nineteen",
    ];
    const TENS: [&str; 10] = [
        "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
    ];

    fn below_thousand(n: u64, out: &mut Vec<&'static str>) {
        let hundreds = n / 100;
        let rest = n % 100;
        if hundreds > 0 {
            out.push(ONES[hundreds as usize]);
            out.push("hundred");
        }
        if rest >= 20 {
            out.push(TENS[(rest / 10) as usize]);
            if rest % 10 > 0 {
                out.push(ONES[(rest % 10) as usize]);
            }
        } else if rest > 0 || hundreds == 0 {
            out.push(ONES[rest as usize]);
        }
    }

    if n > 999_999 {
        return None;
    }

    let mut out = Vec::new();
    let thousands = n / 1000;
    let rest = n % 1000;
    if thousands > 0 {
        below_thousand(thousands, &mut out);
        out.push("thousand");
        if rest > 0 {
            below_thousand(rest, &mut out);
        }
    } else {
        below_thousand(rest, &mut out);
    }
    Some(out.join(" "))
}
