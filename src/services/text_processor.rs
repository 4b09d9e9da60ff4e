// Text Processing Service
// Normalization, tokenization, sentence splitting and structural boundary detection

use crate::models::SectionBoundary;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9]+(?:['\u{2019}][A-Za-z]+)*|[\u{4e00}-\u{9fff}]").expect("word regex")
    })
}

fn markdown_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#{1,6}\s+\S").expect("markdown heading regex"))
}

fn part_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?i:section|sec\.|article|art\.|part|chapter|title|schedule|division|appendix)\s+(?:\d+[A-Za-z]?|[IVXLC]+)(\.|:|\s|$)",
        )
        .expect("part heading regex")
    })
}

fn numbered_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,3}(\.\d{1,3})*\.?\s+[A-Z]").expect("numbered heading regex"))
}

/// Normalize punctuation and whitespace (smart quotes, dashes, line endings)
pub fn normalize_punctuation(text: &str) -> String {
    static SPACE_RE: OnceLock<Regex> = OnceLock::new();
    static WS_RE: OnceLock<Regex> = OnceLock::new();

    if text.is_empty() {
        return String::new();
    }

    let mut s = text
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{2014}', " - ");

    let space_re = SPACE_RE.get_or_init(|| Regex::new(r"[\u{3000}\u{00A0}]").expect("space regex"));
    s = space_re.replace_all(&s, " ").to_string();

    s = s.replace("\r\n", "\n").replace('\r', "\n");

    let ws_re = WS_RE.get_or_init(|| Regex::new(r"[ \t\x0C\x0B]+").expect("whitespace regex"));
    s = ws_re.replace_all(&s, " ").to_string();

    s = s.lines().map(|ln| ln.trim()).collect::<Vec<_>>().join("\n");

    s.trim().to_string()
}

/// Word tokens (Latin words/numbers, single CJK ideographs)
pub fn tokenize_words(text: &str) -> Vec<&str> {
    word_re().find_iter(text).map(|m| m.as_str()).collect()
}

pub fn word_count(text: &str) -> usize {
    word_re().find_iter(text).count()
}

/// Lowercased word tokens
pub fn lowercase_words(text: &str) -> Vec<String> {
    tokenize_words(text).into_iter().map(|w| w.to_lowercase()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceOffset {
    pub index: usize,
    pub text: String,
    /// UTF-8 byte offset of the trimmed sentence.
    pub start: usize,
    /// UTF-8 byte offset, end-exclusive.
    pub end: usize,
}

const TERMINALS: [char; 6] = ['.', '!', '?', '。', '！', '？'];
const CLOSERS: [char; 6] = ['"', '\'', '\u{201d}', '\u{2019}', ')', ']'];

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "fig", "eq", "no", "nos",
    "inc", "ltd", "co", "corp", "sec", "secs", "art", "para", "subsec", "cl", "ch", "vol", "pp",
    "p", "approx", "dept", "est", "gov", "govt", "jan", "feb", "mar", "apr", "jun", "jul", "aug",
    "sep", "sept", "oct", "nov", "dec", "e.g", "i.e", "u.s", "u.k", "cf", "al", "ibid", "op",
];

/// Split text into sentences with byte offsets.
///
/// Boundary rule: a terminal mark (`.` `!` `?` or the CJK full-width forms),
/// optionally followed by more terminals and closing quotes/brackets, ends a
/// sentence when followed by whitespace or end of text. A blank line always
/// ends a sentence. A `.` is not a boundary when it sits between digits,
/// follows a known abbreviation or a single-letter initial, or is followed by
/// a lowercase word. Known error: a genuine sentence that begins in lowercase
/// is merged into the previous one, as is a sentence ending in an abbreviation.
pub fn split_sentences_advanced(text: &str) -> Vec<SentenceOffset> {
    let mut sentences = Vec::new();
    if text.trim().is_empty() {
        return sentences;
    }

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, ch) = chars[i];

        if ch == '\n' {
            if is_blank_line_break(&chars, i) {
                push_sentence(text, start, pos, &mut sentences);
                start = pos;
            }
            i += 1;
            continue;
        }

        if !TERMINALS.contains(&ch) {
            i += 1;
            continue;
        }

        if ch == '.' && !is_period_boundary(text, &chars, i, start) {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && (TERMINALS.contains(&chars[j].1) || CLOSERS.contains(&chars[j].1)) {
            j += 1;
        }

        let cjk = matches!(ch, '。' | '！' | '？');
        if j < chars.len() && !cjk && !chars[j].1.is_whitespace() {
            i = j;
            continue;
        }

        let end = chars.get(j).map(|(p, _)| *p).unwrap_or(text.len());
        push_sentence(text, start, end, &mut sentences);
        start = end;
        i = j;
    }

    push_sentence(text, start, text.len(), &mut sentences);
    sentences
}

fn push_sentence(text: &str, start: usize, end: usize, out: &mut Vec<SentenceOffset>) {
    if start >= end {
        return;
    }
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = slice.len() - slice.trim_start().len();
    let s = start + lead;
    out.push(SentenceOffset {
        index: out.len(),
        text: trimmed.to_string(),
        start: s,
        end: s + trimmed.len(),
    });
}

fn is_blank_line_break(chars: &[(usize, char)], i: usize) -> bool {
    let mut k = i + 1;
    while k < chars.len() && matches!(chars[k].1, ' ' | '\t' | '\r') {
        k += 1;
    }
    k < chars.len() && chars[k].1 == '\n'
}

fn is_period_boundary(text: &str, chars: &[(usize, char)], i: usize, start: usize) -> bool {
    let prev = if i > 0 { Some(chars[i - 1].1) } else { None };
    let next = chars.get(i + 1).map(|(_, c)| *c);

    // Decimal numbers: 3.5, 1.2.3
    if prev.is_some_and(|c| c.is_ascii_digit()) && next.is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }

    // Next word starting lowercase: "approx. five", "etc. and"
    let mut k = i + 1;
    while k < chars.len() && (CLOSERS.contains(&chars[k].1) || chars[k].1 == ' ' || chars[k].1 == '\t') {
        k += 1;
    }
    if k > i + 1 && chars.get(k).is_some_and(|(_, c)| c.is_lowercase()) {
        return false;
    }

    let pos = chars[i].0;
    let before = &text[start.min(pos)..pos];
    let token = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("")
        .trim_start_matches(|c: char| !c.is_alphanumeric());
    if token.is_empty() {
        return true;
    }

    let lower = token.to_lowercase();
    if ABBREVIATIONS.contains(&lower.as_str()) {
        return false;
    }

    // Single-letter initial: "J. Smith"
    let mut tc = token.chars();
    if let (Some(first), None) = (tc.next(), tc.next()) {
        if first.is_uppercase() {
            return false;
        }
    }

    // Dotted abbreviations not in the list: "U.S.C", "a.m"
    if token.contains('.') && token.split('.').all(|part| part.chars().count() <= 2) {
        return false;
    }

    true
}

fn ends_with_sentence_punct(s: &str) -> bool {
    s.trim_end()
        .chars()
        .last()
        .map(|c| TERMINALS.contains(&c))
        .unwrap_or(false)
}

/// Whether a single line reads as a structural heading
pub fn is_heading_line(line: &str) -> bool {
    let t = line.trim();
    let char_count = t.chars().count();
    if t.is_empty() || char_count > 100 {
        return false;
    }

    if markdown_heading_re().is_match(t) {
        return true;
    }

    let words = t.split_whitespace().count();
    if part_heading_re().is_match(t) {
        // "SEC. 101." and "Section 2." are headings; long prose opening with "Section 3 of" is not.
        return if ends_with_sentence_punct(t) { words <= 4 } else { words <= 12 };
    }

    if numbered_heading_re().is_match(t) && !ends_with_sentence_punct(t) && words <= 12 {
        return true;
    }

    // Short ALL CAPS lines
    let letters: Vec<char> = t.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 3
        && char_count <= 60
        && letters.iter().all(|c| c.is_uppercase())
        && !ends_with_sentence_punct(t)
}

/// Detect structural section boundaries (headers, numbered parts).
///
/// Returns an empty list when the text has no headings. When headings exist,
/// any non-empty text before the first heading becomes an unlabelled preamble
/// section.
pub fn detect_section_boundaries(text: &str) -> Vec<SectionBoundary> {
    let mut heading_starts: Vec<(usize, usize, String)> = Vec::new();
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        if is_heading_line(line) {
            let trimmed = line.trim();
            heading_starts.push((offset, offset + line.len(), trimmed.trim_start_matches('#').trim().to_string()));
        }
        offset += line.len();
    }

    if heading_starts.is_empty() {
        return Vec::new();
    }

    let mut sections = Vec::new();
    let first_start = heading_starts[0].0;
    if !text[..first_start].trim().is_empty() {
        sections.push(SectionBoundary {
            index: 0,
            heading: None,
            start: 0,
            body_start: 0,
            end: first_start,
        });
    }

    for (i, (start, body_start, heading)) in heading_starts.iter().enumerate() {
        let end = heading_starts.get(i + 1).map(|h| h.0).unwrap_or(text.len());
        sections.push(SectionBoundary {
            index: sections.len(),
            heading: Some(heading.clone()),
            start: *start,
            body_start: (*body_start).min(end),
            end,
        });
    }

    sections
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StylometryMetrics {
    pub word_count: usize,
    pub sentence_count: usize,
    pub ttr: f64,
    pub avg_sentence_words: f64,
    pub repeat_ratio: f64,
    pub ngram_repeat_rate: f64,
}

pub fn compute_stylometry(text: &str) -> StylometryMetrics {
    let words = lowercase_words(text);
    let total_words = words.len();
    if total_words == 0 {
        return StylometryMetrics::default();
    }

    let unique_words: HashSet<&str> = words.iter().map(|w| w.as_str()).collect();
    let ttr = unique_words.len() as f64 / total_words as f64;

    let sentences = split_sentences_advanced(text);
    let avg_sentence_words = if sentences.is_empty() {
        total_words as f64
    } else {
        sentences.iter().map(|s| word_count(&s.text)).sum::<usize>() as f64 / sentences.len() as f64
    };

    // Repeat ratio: fraction of vocab items that occur >= 3 times
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for t in &words {
        *freq.entry(t.as_str()).or_insert(0) += 1;
    }
    let repeat_ratio = freq.values().filter(|&&v| v >= 3).count() as f64 / freq.len().max(1) as f64;

    let refs: Vec<&str> = words.iter().map(|w| w.as_str()).collect();

    StylometryMetrics {
        word_count: total_words,
        sentence_count: sentences.len(),
        ttr,
        avg_sentence_words,
        repeat_ratio,
        ngram_repeat_rate: ngram_repeat_rate(&refs, 3),
    }
}

fn ngram_repeat_rate(tokens: &[&str], n: usize) -> f64 {
    if n == 0 || tokens.len() < n + 1 {
        return 0.0;
    }
    let mut counts: HashMap<&[&str], usize> = HashMap::new();
    let mut total = 0usize;
    for window in tokens.windows(n) {
        *counts.entry(window).or_insert(0) += 1;
        total += 1;
    }
    let repeats = counts.values().filter(|&&c| c >= 2).map(|&c| c - 1).sum::<usize>();
    repeats as f64 / total.max(1) as f64
}

/// Unigram perplexity estimate, scaled into roughly [20, 300].
/// Lower values mean more predictable, repetitive wording.
pub fn estimate_perplexity(text: &str) -> f64 {
    let tokens = lowercase_words(text);
    if tokens.is_empty() {
        return 120.0;
    }

    let mut freq: HashMap<&str, usize> = HashMap::new();
    for t in &tokens {
        *freq.entry(t.as_str()).or_insert(0) += 1;
    }

    let total = tokens.len() as f64;
    let entropy = -freq
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            p * (p + 1e-12).ln()
        })
        .sum::<f64>();

    let ppl_uni = entropy.exp();
    let scaled = 20.0 + ((ppl_uni - 1.0) * 22.5).min(280.0);
    let diversity = freq.len() as f64 / total;
    let length_term = 120.0 - diversity * 60.0 + total / 100.0;
    let value = (0.5 * scaled + 0.5 * length_term).clamp(20.0, 300.0);
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_punctuation() {
        let input = "Hello\u{201c}World\u{201d}\r\n  next   line ";
        let output = normalize_punctuation(input);
        assert_eq!(output, "Hello\"World\"\nnext line");
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("Hello World"), 2);
        assert_eq!(word_count("It's 3.5 percent"), 4);
        assert_eq!(word_count("你好世界"), 4);
    }

    #[test]
    fn test_split_basic() {
        let sentences = split_sentences_advanced("One sentence here. Another one! And a third?");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[1].text, "Another one!");
        assert_eq!(sentences[2].index, 2);
    }

    #[test]
    fn test_split_does_not_break_decimals_or_abbreviations() {
        let text = "Revenue grew 3.5 percent in FY2023. Dr. Smith and Mr. Jones met at 10 a.m. on Monday. See Sec. 4 for details.";
        let sentences = split_sentences_advanced(text);
        assert_eq!(sentences.len(), 3, "{:?}", sentences);
        assert!(sentences[0].text.contains("3.5 percent"));
        assert!(sentences[1].text.starts_with("Dr. Smith"));
        assert!(sentences[2].text.starts_with("See Sec. 4"));
    }

    #[test]
    fn test_split_initials_and_urls() {
        let text = "The report by J. Smith is online at example.com today. It is short.";
        let sentences = split_sentences_advanced(text);
        assert_eq!(sentences.len(), 2);
    }

    #[test]
    fn test_split_blank_line_ends_sentence() {
        let text = "Heading without punctuation\n\nBody text follows here.";
        let sentences = split_sentences_advanced(text);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].text, "Heading without punctuation");
    }

    #[test]
    fn test_split_offsets_slice_back() {
        let text = "  First one.   Second \"quoted.\" Third.";
        for s in split_sentences_advanced(text) {
            assert_eq!(&text[s.start..s.end], s.text);
        }
    }

    #[test]
    fn test_split_cjk() {
        let sentences = split_sentences_advanced("这是第一句。这是第二句！");
        assert_eq!(sentences.len(), 2);
    }

    #[test]
    fn test_split_empty() {
        assert!(split_sentences_advanced("").is_empty());
        assert!(split_sentences_advanced("   \n ").is_empty());
    }

    #[test]
    fn test_heading_detection() {
        assert!(is_heading_line("# Introduction"));
        assert!(is_heading_line("SEC. 101."));
        assert!(is_heading_line("Section 2. Definitions"));
        assert!(is_heading_line("1.2 Scope of Work"));
        assert!(is_heading_line("BUDGET OVERVIEW"));
        assert!(!is_heading_line("Section 3 of the Act requires that each agency report annually to the committee on progress."));
        assert!(!is_heading_line("The committee met on Tuesday."));
        assert!(!is_heading_line(""));
    }

    #[test]
    fn test_detect_sections_with_preamble() {
        let text = "Preamble words here.\n# One\nBody one.\n# Two\nBody two.";
        let sections = detect_section_boundaries(text);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, None);
        assert_eq!(sections[1].heading.as_deref(), Some("One"));
        assert_eq!(&text[sections[2].body_start..sections[2].end], "Body two.");
    }

    #[test]
    fn test_detect_sections_none() {
        assert!(detect_section_boundaries("Just a plain paragraph of text. Nothing else.").is_empty());
    }

    #[test]
    fn test_compute_stylometry() {
        let metrics = compute_stylometry("The cat sat. The cat sat. The cat sat.");
        assert_eq!(metrics.word_count, 9);
        assert_eq!(metrics.sentence_count, 3);
        assert!((metrics.ttr - 3.0 / 9.0).abs() < 1e-9);
        assert!((metrics.repeat_ratio - 1.0).abs() < 1e-9);
        assert!(metrics.ngram_repeat_rate > 0.5);
    }

    #[test]
    fn test_perplexity_lower_for_repetitive_text() {
        let repetitive = "the plan is the plan and the plan is good ".repeat(10);
        let varied = "Quarterly freight volumes slipped while harbour crews renegotiated overtime, \
                      leaving two cranes idle beside rusting containers near the old customs shed.";
        assert!(estimate_perplexity(&repetitive) < estimate_perplexity(varied));
        assert_eq!(estimate_perplexity(""), 120.0);
    }
}
