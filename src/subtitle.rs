use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;

use crate::captions::CaptionCue;
use crate::config::{CaptionStyle, HighlightFormat};
use crate::error::CaptionResult;

/// Script resolution; libass scales it to the video frame.
const PLAY_RES_X: u32 = 384;
const PLAY_RES_Y: u32 = 288;

/// Format time for ASS format (h:mm:ss.cc)
pub fn format_ass_time(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;
    let h = total_cs / 360_000;
    let m = (total_cs % 360_000) / 6000;
    let s = (total_cs % 6000) / 100;
    let cs = total_cs % 100;
    format!("{}:{:02}:{:02}.{:02}", h, m, s, cs)
}

/// Format time for SRT format (hh:mm:ss,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let h = total_ms / 3_600_000;
    let m = (total_ms % 3_600_000) / 60_000;
    let s = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// `RRGGBB` to the ASS `&H00BBGGRR` colour form.
pub fn ass_colour(style: &CaptionStyle) -> CaptionResult<String> {
    let rgb = style.rgb_hex()?;
    Ok(format!("&H00{}{}{}", &rgb[4..6], &rgb[2..4], &rgb[0..2]))
}

/// Braces start override blocks and a backslash starts `\N`, `\n` or `\h`.
/// A word joiner after each backslash keeps it literal.
fn escape_ass_text(text: &str) -> String {
    text.replace('\\', "\\\u{2060}")
        .replace('{', "(")
        .replace('}', ")")
}

/// Lay out a cue's lines, handing each piece of each word to `piece` with
/// the word's index and whether the piece opens the word. A web address
/// split over two lines arrives as two pieces.
fn render_cue_text(
    cue: &CaptionCue,
    mut piece: impl FnMut(usize, bool, &str) -> String,
) -> String {
    let mut rendered = Vec::with_capacity(cue.lines.len());
    let mut word = 0;
    let mut offset = 0;

    for line in &cue.lines {
        let mut out = String::new();
        let mut rest = line.as_str();
        while !rest.is_empty() {
            if offset == 0 {
                if let Some(after) = rest.strip_prefix(' ') {
                    out.push(' ');
                    rest = after;
                    continue;
                }
            }
            let Some(current) = cue.words.get(word) else {
                out.push_str(&escape_ass_text(rest));
                break;
            };
            let remaining = &current.text[offset..];
            let take = if rest.starts_with(remaining) {
                remaining.len()
            } else if remaining.starts_with(rest) {
                rest.len()
            } else {
                out.push_str(&escape_ass_text(rest));
                break;
            };
            out.push_str(&piece(word, offset == 0, &rest[..take]));
            rest = &rest[take..];
            offset += take;
            if offset == current.text.len() {
                word += 1;
                offset = 0;
            }
        }
        rendered.push(out);
    }
    rendered.join("\\N")
}

/// When each word of a cue is the active one: from its start until the next
/// word starts. The first word takes over any lead-in and the last runs to
/// the end of the cue.
fn word_windows(cue: &CaptionCue) -> Vec<(f64, f64)> {
    let n = cue.words.len();
    (0..n)
        .map(|i| {
            let start = if i == 0 {
                cue.start_time
            } else {
                cue.words[i].start_time
            };
            let end = cue
                .words
                .get(i + 1)
                .map_or(cue.end_time, |next| next.start_time);
            (start, end.max(start))
        })
        .collect()
}

fn plain_text(cue: &CaptionCue) -> String {
    cue.lines
        .iter()
        .map(|line| escape_ass_text(line))
        .collect::<Vec<_>>()
        .join("\\N")
}

fn highlight_tags(format: HighlightFormat) -> Option<(&'static str, &'static str)> {
    match format {
        HighlightFormat::Underline => Some(("{\\u1}", "{\\u0}")),
        HighlightFormat::Italic => Some(("{\\i1}", "{\\i0}")),
        HighlightFormat::Bold => Some(("{\\b1}", "{\\b0}")),
        HighlightFormat::None | HighlightFormat::Karaoke => None,
    }
}

fn push_dialogue(out: &mut String, start: f64, end: f64, text: &str) {
    let _ = writeln!(
        out,
        "Dialogue: 0,{},{},Default,,0,0,0,,{}",
        format_ass_time(start),
        format_ass_time(end),
        text
    );
}

/// One event per cue with a `\k` tag before each word, in centiseconds.
fn karaoke_event(out: &mut String, cue: &CaptionCue) {
    let windows = word_windows(cue);
    let text = render_cue_text(cue, |i, first_piece, fragment| {
        match windows.get(i) {
            Some(&(start, end)) if first_piece => format!(
                "{{\\k{}}}{}",
                ((end - start) * 100.0).round() as u64,
                escape_ass_text(fragment)
            ),
            _ => escape_ass_text(fragment),
        }
    });
    push_dialogue(out, cue.start_time, cue.end_time, &text);
}

/// One event per word, each showing the whole cue with that word marked.
fn highlighted_events(out: &mut String, cue: &CaptionCue, (open, close): (&str, &str)) {
    for (active, (start, end)) in word_windows(cue).into_iter().enumerate() {
        if format_ass_time(start) == format_ass_time(end) {
            continue;
        }
        let text = render_cue_text(cue, |i, _, fragment| {
            if i == active {
                format!("{}{}{}", open, escape_ass_text(fragment), close)
            } else {
                escape_ass_text(fragment)
            }
        });
        push_dialogue(out, start, end, &text);
    }
}

/// Render cues as an ASS script with a single style.
pub fn render_ass(cues: &[CaptionCue], style: &CaptionStyle) -> CaptionResult<String> {
    style.validate()?;
    let colour = ass_colour(style)?;

    let mut out = String::new();
    out.push_str("[Script Info]\n");
    out.push_str("ScriptType: v4.00+\n");
    let _ = writeln!(out, "PlayResX: {}", PLAY_RES_X);
    let _ = writeln!(out, "PlayResY: {}", PLAY_RES_Y);
    out.push_str("WrapStyle: 2\n");
    out.push_str("ScaledBorderAndShadow: yes\n\n");

    out.push_str("[V4+ Styles]\n");
    out.push_str("Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n");
    let _ = writeln!(
        out,
        "Style: Default,{},{},{},&H00FFFFFF,&H00000000,&H00000000,0,0,0,0,100,100,0,0,1,1,2,{},10,10,10,0\n",
        style.font, style.font_size, colour, style.position
    );

    out.push_str("[Events]\n");
    out.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");
    for cue in cues {
        match (style.highlight, highlight_tags(style.highlight)) {
            _ if cue.words.is_empty() => {
                push_dialogue(&mut out, cue.start_time, cue.end_time, &plain_text(cue))
            }
            (HighlightFormat::Karaoke, _) => karaoke_event(&mut out, cue),
            (_, Some(tags)) => highlighted_events(&mut out, cue, tags),
            (_, None) => push_dialogue(&mut out, cue.start_time, cue.end_time, &plain_text(cue)),
        }
    }

    Ok(out)
}

/// Render cues as SubRip.
pub fn render_srt(cues: &[CaptionCue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_srt_time(cue.start_time),
            format_srt_time(cue.end_time)
        );
        for line in &cue.lines {
            let _ = writeln!(out, "{}", line);
        }
        out.push('\n');
    }
    out
}

/// Write both subtitle files for a track.
pub async fn write_subtitles(
    cues: &[CaptionCue],
    style: &CaptionStyle,
    ass_path: &Path,
    srt_path: &Path,
) -> Result<()> {
    tokio::fs::write(ass_path, render_ass(cues, style)?).await?;
    tokio::fs::write(srt_path, render_srt(cues)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::WordKind;
    use crate::timing::TimedWord;

    fn cue(start: f64, end: f64, lines: &[&str]) -> CaptionCue {
        CaptionCue {
            start_time: start,
            end_time: end,
            lines: lines.iter().map(|l| l.to_string()).collect(),
            text: lines.join(" "),
            words: vec![],
        }
    }

    /// A cue over `words` given as (text, start); each word runs to the next.
    fn timed_cue(start: f64, end: f64, lines: &[&str], words: &[(&str, f64)]) -> CaptionCue {
        let timed = words
            .iter()
            .enumerate()
            .map(|(i, &(text, word_start))| TimedWord {
                text: text.to_string(),
                start_time: word_start,
                end_time: words.get(i + 1).map_or(end, |next| next.1),
                synthesized: false,
                kind: if text.contains(".co") {
                    WordKind::Url
                } else {
                    WordKind::Word
                },
            })
            .collect();
        CaptionCue {
            words: timed,
            ..cue(start, end, lines)
        }
    }

    fn styled(highlight: HighlightFormat) -> CaptionStyle {
        CaptionStyle {
            highlight,
            ..CaptionStyle::default()
        }
    }

    fn dialogues(ass: &str) -> Vec<&str> {
        ass.lines().filter(|l| l.starts_with("Dialogue:")).collect()
    }

    #[test]
    fn test_format_ass_time() {
        assert_eq!(format_ass_time(0.0), "0:00:00.00");
        assert_eq!(format_ass_time(61.5), "0:01:01.50");
        assert_eq!(format_ass_time(3725.07), "1:02:05.07");
        assert_eq!(format_ass_time(2.999), "0:00:03.00");
    }

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(1.25), "00:00:01,250");
        assert_eq!(format_srt_time(3661.001), "01:01:01,001");
    }

    #[test]
    fn test_ass_colour_is_bgr() {
        let style = CaptionStyle {
            color: "#1E90FF".to_string(),
            ..CaptionStyle::default()
        };
        assert_eq!(ass_colour(&style).unwrap(), "&H00FF901E");
        assert_eq!(ass_colour(&CaptionStyle::default()).unwrap(), "&H0000B400");
    }

    #[test]
    fn test_render_ass() {
        let cues = vec![
            cue(0.0, 1.5, &["I secretly replaced", "my brother's protein"]),
            cue(1.5, 2.25, &["{oops}"]),
        ];
        let ass = render_ass(&cues, &styled(HighlightFormat::None)).unwrap();

        assert!(ass.contains("PlayResY: 288"));
        assert!(ass.contains("Style: Default,Lexend Bold,21,&H0000B400,&H00FFFFFF,&H00000000,&H00000000,0,"));
        assert!(ass.contains(",5,10,10,10,0"));
        assert!(ass.contains(
            "Dialogue: 0,0:00:00.00,0:00:01.50,Default,,0,0,0,,I secretly replaced\\Nmy brother's protein"
        ));
        assert!(ass.contains("Dialogue: 0,0:00:01.50,0:00:02.25,Default,,0,0,0,,(oops)"));
    }

    #[test]
    fn test_backslash_stays_literal() {
        let cues = vec![cue(0.0, 1.0, &["C:\\Notes\\new"])];
        let ass = render_ass(&cues, &styled(HighlightFormat::None)).unwrap();
        assert!(ass.contains(",,C:\\\u{2060}Notes\\\u{2060}new\n"));
        assert!(!ass.contains("\\N"));
    }

    #[test]
    fn test_bold_highlight_follows_spoken_word() {
        let cues = vec![timed_cue(
            0.0,
            2.0,
            &["I ate", "it all"],
            &[("I", 0.2), ("ate", 0.5), ("it", 1.0), ("all", 1.5)],
        )];
        let ass = render_ass(&cues, &CaptionStyle::default()).unwrap();

        assert_eq!(
            dialogues(&ass),
            vec![
                "Dialogue: 0,0:00:00.00,0:00:00.50,Default,,0,0,0,,{\\b1}I{\\b0} ate\\Nit all",
                "Dialogue: 0,0:00:00.50,0:00:01.00,Default,,0,0,0,,I {\\b1}ate{\\b0}\\Nit all",
                "Dialogue: 0,0:00:01.00,0:00:01.50,Default,,0,0,0,,I ate\\N{\\b1}it{\\b0} all",
                "Dialogue: 0,0:00:01.50,0:00:02.00,Default,,0,0,0,,I ate\\Nit {\\b1}all{\\b0}",
            ]
        );
    }

    #[test]
    fn test_underline_and_italic_tags() {
        let cues = vec![timed_cue(0.0, 1.0, &["so {sorry}"], &[("so", 0.0), ("{sorry}", 0.4)])];

        let ass = render_ass(&cues, &styled(HighlightFormat::Underline)).unwrap();
        assert!(ass.contains(",,{\\u1}so{\\u0} (sorry)\n"));
        assert!(ass.contains(",,so {\\u1}(sorry){\\u0}\n"));

        let ass = render_ass(&cues, &styled(HighlightFormat::Italic)).unwrap();
        assert!(ass.contains(",,so {\\i1}(sorry){\\i0}\n"));
    }

    #[test]
    fn test_highlight_spans_split_address() {
        let cues = vec![timed_cue(
            0.0,
            2.0,
            &["visit", "www.myconfessions.", "co.za now"],
            &[("visit", 0.0), ("www.myconfessions.co.za", 0.5), ("now", 1.5)],
        )];
        let ass = render_ass(&cues, &CaptionStyle::default()).unwrap();
        let events = dialogues(&ass);

        assert_eq!(events.len(), 3);
        assert!(events[1].ends_with(
            ",,visit\\N{\\b1}www.myconfessions.{\\b0}\\N{\\b1}co.za{\\b0} now"
        ));
    }

    #[test]
    fn test_karaoke_durations_cover_cue() {
        let cues = vec![timed_cue(
            1.0,
            3.0,
            &["visit", "www.myconfessions.", "co.za now"],
            &[("visit", 1.25), ("www.myconfessions.co.za", 1.5), ("now", 2.5)],
        )];
        let ass = render_ass(&cues, &styled(HighlightFormat::Karaoke)).unwrap();

        assert_eq!(
            dialogues(&ass),
            vec![
                "Dialogue: 0,0:00:01.00,0:00:03.00,Default,,0,0,0,,{\\k50}visit\\N{\\k100}www.myconfessions.\\Nco.za {\\k50}now"
            ]
        );
    }

    #[test]
    fn test_render_ass_rejects_bad_style() {
        let style = CaptionStyle {
            position: 0,
            ..CaptionStyle::default()
        };
        assert!(render_ass(&[], &style).is_err());
    }

    #[test]
    fn test_render_srt() {
        let cues = vec![cue(0.0, 1.2, &["first line", "second"]), cue(1.2, 2.0, &["next"])];
        let srt = render_srt(&cues);
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,200\nfirst line\nsecond\n\n2\n00:00:01,200 --> 00:00:02,000\nnext\n\n"
        );
    }

    #[tokio::test]
    async fn test_write_subtitles() {
        let dir = tempfile::tempdir().unwrap();
        let ass = dir.path().join("job.ass");
        let srt = dir.path().join("job.srt");
        write_subtitles(&[cue(0.0, 1.0, &["hello"])], &CaptionStyle::default(), &ass, &srt)
            .await
            .unwrap();
        assert!(std::fs::read_to_string(&ass).unwrap().contains(",,hello"));
        assert!(std::fs::read_to_string(&srt).unwrap().starts_with("1\n"));
    }
}
