//! Shared text utilities for the scorers.
//!
//! Everything here is bilingual-aware: sentence and word splitting treat CJK
//! punctuation and characters alongside Latin text.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::config::TargetLanguage;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d+(?:,\d{3})*(?:\.\d+)?").expect("static regex"));

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("static regex"));

static RECOMMENDATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(BUY|HOLD|SELL)\b|(?i:(?:recommend(?:ation)?|rating|action)\s*[:：]?\s*(?:to\s+)?(buy|hold|sell))|(买入|持有|卖出)",
    )
    .expect("static regex")
});

static LIST_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•·]\s+|\d+(?:[.)]\s+|、)|[a-zA-Z][.)]\s+|\|)").expect("static regex")
});

/// True for CJK unified ideographs (including extension A and compatibility forms).
pub fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

/// Split text into trimmed, non-empty sentences.
///
/// A period only ends a sentence when followed by whitespace or end of text,
/// so decimals like `100.25` stay intact. Newlines always end a sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end_here = match c {
            '。' | '！' | '？' | '!' | '?' | '\n' | '；' => true,
            '.' => chars.peek().is_none_or(|(_, next)| next.is_whitespace()),
            _ => false,
        };
        if end_here {
            let end = i + c.len_utf8();
            push_sentence(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_sentence(&mut sentences, &text[start..]);
    sentences
}

fn push_sentence<'a>(out: &mut Vec<&'a str>, raw: &'a str) {
    let trimmed = raw.trim();
    if trimmed.chars().any(|c| c.is_alphanumeric()) {
        out.push(trimmed);
    }
}

/// Count words: runs of alphanumeric Latin characters, plus one per CJK character.
pub fn word_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if is_cjk(c) {
            count += 1;
            in_word = false;
        } else if c.is_alphanumeric() || (in_word && matches!(c, '\'' | '.' | ',' | '-')) {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
        }
    }
    count
}

/// Non-empty line count.
pub fn line_count(text: &str) -> usize {
    text.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Share of target-language characters among all letters (Latin + CJK).
/// Returns 0.0 when the text has no letters at all.
pub fn language_ratio(text: &str, language: TargetLanguage) -> f64 {
    let mut latin = 0usize;
    let mut cjk = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else if c.is_ascii_alphabetic() {
            latin += 1;
        }
    }
    let total = latin + cjk;
    if total == 0 {
        return 0.0;
    }
    let matching = match language {
        TargetLanguage::English => latin,
        TargetLanguage::Chinese => cjk,
    };
    matching as f64 / total as f64
}

/// Count occurrences of `term` in already-lowercased `haystack`.
///
/// ASCII terms must sit on word boundaries, so "sell" does not match "seller".
/// CJK terms match as plain substrings.
pub fn count_term(haystack: &str, term: &str) -> usize {
    if term.is_empty() {
        return 0;
    }
    let needs_boundary = term.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let mut count = 0;
    for (pos, _) in haystack.match_indices(term) {
        if !needs_boundary {
            count += 1;
            continue;
        }
        let before_ok = haystack[..pos]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_ascii_alphanumeric());
        let after_ok = haystack[pos + term.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_alphanumeric());
        if before_ok && after_ok {
            count += 1;
        }
    }
    count
}

/// True when lowercased `haystack` names `name`, either in full or by its
/// first token longer than two characters ("Apple" for "Apple Inc.").
pub fn mentions_name(haystack: &str, name: &str) -> bool {
    let name = name.trim().to_lowercase();
    if count_term(haystack, &name) > 0 {
        return true;
    }
    name.split_whitespace()
        .find(|t| t.chars().count() > 2)
        .is_some_and(|token| count_term(haystack, token) > 0)
}

/// True when lowercased `haystack` contains any of the terms.
pub fn contains_any(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| count_term(haystack, t) > 0)
}

/// Total occurrences of all terms in lowercased `haystack`.
pub fn count_terms(haystack: &str, terms: &[&str]) -> usize {
    terms.iter().map(|t| count_term(haystack, t)).sum()
}

/// Every number literal in the text, with thousands separators removed.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .collect()
}

/// Citation indices in order of appearance. `[1, 3]` yields 1 and 3.
pub fn extract_citations(text: &str) -> Vec<usize> {
    CITATION_RE
        .captures_iter(text)
        .flat_map(|caps| {
            caps[1]
                .split(',')
                .filter_map(|n| n.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// True when a line looks like a list item or a table row.
pub fn is_list_or_table_line(line: &str) -> bool {
    LIST_LINE_RE.is_match(line) || line.matches('|').count() >= 2
}

/// The three mutually exclusive recommendation verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecommendationVerb {
    Buy,
    Hold,
    Sell,
}

impl RecommendationVerb {
    fn parse(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "buy" | "买入" => Some(Self::Buy),
            "hold" | "持有" => Some(Self::Hold),
            "sell" | "卖出" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Every recommendation verb occurrence, in order.
pub fn recommendation_verbs(text: &str) -> Vec<RecommendationVerb> {
    RECOMMENDATION_RE
        .captures_iter(text)
        .filter_map(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .next()
                .and_then(|m| RecommendationVerb::parse(m.as_str()))
        })
        .collect()
}

/// Distinct recommendation verbs named in the text.
pub fn distinct_recommendation_verbs(text: &str) -> BTreeSet<RecommendationVerb> {
    recommendation_verbs(text).into_iter().collect()
}

/// The four required narrative sections, in their required order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionKind {
    Snapshot,
    Insight,
    Recommendation,
    Risk,
}

impl SectionKind {
    pub const ORDERED: [SectionKind; 4] = [
        SectionKind::Snapshot,
        SectionKind::Insight,
        SectionKind::Recommendation,
        SectionKind::Risk,
    ];

    /// Marker glyph that opens the section.
    pub fn marker(&self) -> &'static str {
        match self {
            SectionKind::Snapshot => "📊",
            SectionKind::Insight => "💡",
            SectionKind::Recommendation => "🎯",
            SectionKind::Risk => "⚠",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SectionKind::Snapshot => "snapshot",
            SectionKind::Insight => "insight",
            SectionKind::Recommendation => "recommendation",
            SectionKind::Risk => "risk",
        }
    }

    /// Heading keywords accepted when the marker glyph is absent.
    pub fn fallback_keywords(&self) -> &'static [&'static str] {
        match self {
            SectionKind::Snapshot => &["snapshot", "overview", "summary", "概览", "摘要", "核心数据"],
            SectionKind::Insight => &["insight", "analysis", "洞察", "分析"],
            SectionKind::Recommendation => &["recommendation", "action", "建议", "操作"],
            SectionKind::Risk => &["risk", "risks", "风险"],
        }
    }
}

/// A marker-delimited section of a narrative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    /// Index of the heading line among all lines.
    pub line: usize,
    /// Heading line followed by the section body.
    pub text: String,
}

impl Section {
    /// Section content without its heading. A first line that carries a full
    /// sentence after the marker counts as content.
    pub fn body(&self) -> String {
        let mut lines = self.text.lines();
        let first = lines.next().unwrap_or_default();
        let after_marker = first
            .trim_start()
            .trim_start_matches(['#', ' ', '*'])
            .trim_start_matches(self.kind.marker())
            .trim_start_matches(['\u{FE0F}', ' ', ':', '：', '*']);
        let rest: Vec<&str> = lines.collect();
        let heading_only = word_count(after_marker) <= 4
            && !after_marker
                .trim_end()
                .ends_with(['.', '。', '!', '！', '?', '？']);
        if heading_only {
            rest.join("\n")
        } else {
            std::iter::once(after_marker)
                .chain(rest)
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

/// Sections opened by marker glyphs, in document order.
pub fn marker_sections(text: &str) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut starts: Vec<(usize, SectionKind)> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start().trim_start_matches(['#', ' ', '*']);
        if let Some(kind) = SectionKind::ORDERED
            .iter()
            .find(|k| trimmed.starts_with(k.marker()))
        {
            starts.push((idx, *kind));
        }
    }
    starts
        .iter()
        .enumerate()
        .map(|(n, (line, kind))| {
            let end = starts.get(n + 1).map(|(l, _)| *l).unwrap_or(lines.len());
            Section {
                kind: *kind,
                line: *line,
                text: lines[*line..end].join("\n"),
            }
        })
        .collect()
}

/// True when a short heading-like line names the section by keyword.
pub fn has_keyword_heading(text: &str, kind: SectionKind) -> bool {
    text.lines().any(|line| {
        let lowered = line
            .trim()
            .trim_start_matches(['#', '*', ' '])
            .trim_end_matches([':', '：', '*', ' '])
            .to_lowercase();
        !lowered.is_empty()
            && word_count(&lowered) <= 4
            && kind.fallback_keywords().iter().any(|k| lowered.starts_with(k))
    })
}

/// Text outside any marker section, plus each section's text.
pub fn segments(text: &str) -> Vec<String> {
    let sections = marker_sections(text);
    if sections.is_empty() {
        return vec![text.to_string()];
    }
    let first = sections[0].line;
    let mut out: Vec<String> = Vec::with_capacity(sections.len() + 1);
    let preamble: String = text.lines().take(first).collect::<Vec<_>>().join("\n");
    if !preamble.trim().is_empty() {
        out.push(preamble);
    }
    out.extend(sections.into_iter().map(|s| s.text));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_keeps_decimals() {
        let s = split_sentences("Price is 100.25 today. RSI sits at 55! Next?");
        assert_eq!(s, vec!["Price is 100.25 today.", "RSI sits at 55!", "Next?"]);
    }

    #[test]
    fn test_split_sentences_cjk() {
        let s = split_sentences("股价上涨。波动率较高！");
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_word_count_mixed() {
        assert_eq!(word_count("The stock rose 2.5% today"), 5);
        assert_eq!(word_count("股价上涨"), 4);
        assert_eq!(word_count("AAPL 股价"), 3);
    }

    #[test]
    fn test_language_ratio() {
        assert!((language_ratio("abc", TargetLanguage::English) - 1.0).abs() < 1e-9);
        assert!((language_ratio("ab股价", TargetLanguage::Chinese) - 0.5).abs() < 1e-9);
        assert_eq!(language_ratio("123 !!", TargetLanguage::English), 0.0);
    }

    #[test]
    fn test_count_term_word_boundaries() {
        assert_eq!(count_term("the seller will sell", "sell"), 1);
        assert_eq!(count_term("风险较高，风险可控", "风险"), 2);
    }

    #[test]
    fn test_mentions_name() {
        assert!(mentions_name("apple inc. beat estimates", "Apple Inc."));
        assert!(mentions_name("apple shares rose", "Apple Inc."));
        assert!(!mentions_name("pineapple shares rose", "Apple Inc."));
        assert!(!mentions_name("the stock traded flat", "T"));
        assert!(mentions_name("贵州茅台收盘上涨", "贵州茅台"));
    }

    #[test]
    fn test_extract_citations() {
        assert_eq!(extract_citations("see [1] and [2, 3], not [x]"), vec![1, 2, 3]);
    }

    #[test]
    fn test_recommendation_verbs() {
        let verbs = recommendation_verbs("We rate it BUY. Holders may HOLD. 建议买入");
        assert_eq!(
            verbs,
            vec![
                RecommendationVerb::Buy,
                RecommendationVerb::Hold,
                RecommendationVerb::Buy
            ]
        );
        assert!(recommendation_verbs("buyers and sellers").is_empty());
        assert_eq!(
            recommendation_verbs("Our recommendation: sell"),
            vec![RecommendationVerb::Sell]
        );
    }

    #[test]
    fn test_marker_sections() {
        let text = "intro\n📊 Snapshot\nline a\n💡 Insight\nline b\n⚠️ Risk\nline c";
        let sections = marker_sections(text);
        let kinds: Vec<_> = sections.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SectionKind::Snapshot, SectionKind::Insight, SectionKind::Risk]
        );
        assert_eq!(sections[0].text, "📊 Snapshot\nline a");
        assert_eq!(sections[0].body(), "line a");
        assert_eq!(segments(text).len(), 4);
    }

    #[test]
    fn test_section_body_keeps_inline_content() {
        let sections = marker_sections("⚠️ Rates could rise and hurt margins.\nMore detail.");
        assert_eq!(
            sections[0].body(),
            "Rates could rise and hurt margins.\nMore detail."
        );
    }

    #[test]
    fn test_keyword_heading_fallback() {
        assert!(has_keyword_heading("## Risks:\nrates may rise", SectionKind::Risk));
        assert!(!has_keyword_heading(
            "The risk of a drawdown is meaningful for holders this quarter",
            SectionKind::Risk
        ));
    }

    #[test]
    fn test_list_line_detection() {
        assert!(is_list_or_table_line("- first point"));
        assert!(is_list_or_table_line("2) second point"));
        assert!(is_list_or_table_line("| a | b |"));
        assert!(!is_list_or_table_line("Momentum improved after 3 sessions."));
    }
}
