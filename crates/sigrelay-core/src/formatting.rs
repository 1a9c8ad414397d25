//! Text utilities for Signal: reply cleanup, mention detection and chunking.

use std::{ops::Range, sync::OnceLock};

use regex::Regex;

use crate::messaging::types::Mention;

/// Placeholder Signal renders as a mention.
pub const MENTION_PLACEHOLDER: char = '\u{FFFC}';

const BOUNDARY_BEFORE: &[char] = &[' ', '\n', '\t', ',', '.', ':', ';', '!', '?', '@'];
const BOUNDARY_AFTER: &[char] = &[' ', '\n', '\t', ',', '.', ':', ';', '!', '?'];

/// Remove mention placeholders left in inbound text and trim it.
pub fn clean_inbound(text: &str) -> String {
    text.replace(MENTION_PLACEHOLDER, "").trim().to_string()
}

/// Drop a leading `[name]:` label a model echoes from group transcripts.
pub fn strip_reply_prefix(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^\[.*?\]:\s*").expect("valid regex"));
    re.replace(text, "").trim().to_string()
}

pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Replace whole-word occurrences of known names with mention placeholders.
///
/// `directory` pairs a display name with the number that gets notified.
/// Longer names win over names they contain. Offsets in the returned
/// mentions are UTF-16 positions in the returned text, sorted by start.
pub fn detect_mentions(text: &str, directory: &[(String, String)]) -> (String, Vec<Mention>) {
    let mut names: Vec<&(String, String)> =
        directory.iter().filter(|(name, _)| !name.is_empty()).collect();
    names.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));

    let mut out = text.to_string();
    let mut mentions: Vec<Mention> = Vec::new();

    for (name, number) in names {
        let name_utf16 = utf16_len(name);
        let mut from = 0usize;
        while let Some(rel) = out[from..].find(name.as_str()) {
            let pos = from + rel;
            let end = pos + name.len();

            let before_ok = out[..pos]
                .chars()
                .next_back()
                .map_or(true, |c| BOUNDARY_BEFORE.contains(&c));
            let after_ok = out[end..]
                .chars()
                .next()
                .map_or(true, |c| BOUNDARY_AFTER.contains(&c));

            if !(before_ok && after_ok) {
                from = pos + out[pos..].chars().next().map_or(1, char::len_utf8);
                continue;
            }

            let start = utf16_len(&out[..pos]);
            out.replace_range(pos..end, MENTION_PLACEHOLDER.encode_utf8(&mut [0; 4]));

            let shrink = name_utf16 - 1;
            for m in mentions.iter_mut().filter(|m| m.start > start) {
                m.start -= shrink;
            }
            mentions.push(Mention {
                start,
                length: 1,
                author: number.clone(),
            });

            from = pos + MENTION_PLACEHOLDER.len_utf8();
        }
    }

    mentions.sort_by_key(|m| m.start);
    (out, mentions)
}

/// Byte ranges of `text` no longer than `max_chars` characters each.
///
/// Cuts prefer a line break, then a sentence end, then a space; the
/// separator at a cut is dropped. A run with no separator is cut hard.
fn chunk_ranges(text: &str, max_chars: usize) -> Vec<Range<usize>> {
    let max_chars = max_chars.max(1);
    let mut ranges = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let rest = &text[start..];
        let limit = match rest.char_indices().nth(max_chars) {
            Some((idx, _)) => idx,
            None => {
                ranges.push(start..text.len());
                break;
            }
        };

        let (cut, resume) = if rest[limit..].starts_with(['\n', ' ']) {
            (limit, limit + 1)
        } else {
            let window = &rest[..limit];
            if let Some(p) = window.rfind('\n').filter(|&p| p > 0) {
                (p, p + 1)
            } else if let Some(p) = window.rfind(". ") {
                (p + 1, p + 2)
            } else if let Some(p) = window.rfind(' ').filter(|&p| p > 0) {
                (p, p + 1)
            } else {
                (limit, limit)
            }
        };

        if cut > 0 {
            ranges.push(start..start + cut);
        }
        start += resume.max(1);
    }

    ranges
}

/// Split text into chunks of at most `max_chars` characters.
pub fn split_message(text: &str, max_chars: usize) -> Vec<&str> {
    chunk_ranges(text, max_chars)
        .into_iter()
        .map(|r| &text[r])
        .collect()
}

/// Split text like [`split_message`], moving each mention into the chunk
/// that contains it with its offset rebased to that chunk.
pub fn split_with_mentions(
    text: &str,
    mentions: &[Mention],
    max_chars: usize,
) -> Vec<(String, Vec<Mention>)> {
    chunk_ranges(text, max_chars)
        .into_iter()
        .map(|r| {
            let lo = utf16_len(&text[..r.start]);
            let hi = lo + utf16_len(&text[r.clone()]);
            let local = mentions
                .iter()
                .filter(|m| m.start >= lo && m.start + m.length <= hi)
                .map(|m| Mention {
                    start: m.start - lo,
                    length: m.length,
                    author: m.author.clone(),
                })
                .collect();
            (text[r].to_string(), local)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, p)| (n.to_string(), p.to_string()))
            .collect()
    }

    #[test]
    fn cleans_inbound_placeholders() {
        assert_eq!(clean_inbound("\u{FFFC} hello "), "hello");
        assert_eq!(clean_inbound("\u{FFFC}"), "");
    }

    #[test]
    fn strips_echoed_label() {
        assert_eq!(strip_reply_prefix("[claude-haiku-4-5]: Hi there"), "Hi there");
        assert_eq!(strip_reply_prefix("No label [x]: here"), "No label [x]: here");
    }

    #[test]
    fn mentions_whole_words_longest_first() {
        let d = dir(&[("Ann", "+1"), ("Anna Bot", "+2")]);
        let (text, mentions) = detect_mentions("Hi Anna Bot and Ann, not Annie.", &d);
        assert_eq!(text, "Hi \u{FFFC} and \u{FFFC}, not Annie.");
        assert_eq!(
            mentions,
            vec![
                Mention { start: 3, length: 1, author: "+2".into() },
                Mention { start: 9, length: 1, author: "+1".into() },
            ]
        );
    }

    #[test]
    fn mention_offsets_account_for_later_replacements() {
        // The longer name appears after the shorter one in the text.
        let d = dir(&[("Bo", "+1"), ("Carla", "+2")]);
        let (text, mentions) = detect_mentions("Bo, meet Carla", &d);
        assert_eq!(text, "\u{FFFC}, meet \u{FFFC}");
        assert_eq!(mentions[0].start, 0);
        assert_eq!(mentions[1].start, 8);
    }

    #[test]
    fn mention_offsets_are_utf16() {
        let d = dir(&[("Eve", "+3")]);
        let (_, mentions) = detect_mentions("😀 Eve", &d);
        assert_eq!(mentions[0].start, 3);
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 400), vec!["hello"]);
        assert!(split_message("", 400).is_empty());
    }

    #[test]
    fn chunks_respect_limit_and_prefer_lines() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_message(&text, 40);
        assert_eq!(chunks, vec!["a".repeat(30), "b".repeat(30)]);
    }

    #[test]
    fn long_line_splits_at_sentence_then_word() {
        let text = "One two three. Four five six seven eight";
        let chunks = split_message(text, 20);
        assert_eq!(chunks[0], "One two three.");
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn unbroken_run_is_cut_hard() {
        let text = "x".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "xxxxx");
    }

    #[test]
    fn mentions_follow_their_chunk() {
        let d = dir(&[("Zed", "+9")]);
        let (text, mentions) = detect_mentions(&format!("{} Zed", "w ".repeat(10)), &d);
        let chunks = split_with_mentions(&text, &mentions, 12);
        assert!(chunks.iter().all(|(c, _)| c.chars().count() <= 12));
        let (last, ms) = chunks.last().unwrap();
        assert_eq!(ms.len(), 1);
        let units: Vec<u16> = last.encode_utf16().collect();
        assert_eq!(units[ms[0].start], 0xFFFC);
        assert_eq!(chunks.iter().map(|(_, m)| m.len()).sum::<usize>(), 1);
    }
}
