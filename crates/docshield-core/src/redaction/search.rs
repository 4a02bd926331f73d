//! Term matching and span location on extracted page text.

use super::adapter::PageText;
use super::geometry::Rect;
use crate::settings::HeuristicMetrics;
use serde::Serialize;
use std::ops::Range;

/// How the boxes of a page's matches were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateMode {
    /// From per-character glyph boxes reported by the adapter.
    Exact,
    /// From fixed line height and character width. May miss or over-cover.
    Heuristic,
}

/// Matches found on one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactionTarget {
    pub page_index: usize,
    pub match_count: usize,
    pub mode: LocateMode,
    pub matched_spans: Vec<Rect>,
}

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn is_line_break(c: char) -> bool {
    c == '\n' || c == '\r'
}

/// Every case-insensitive occurrence of `term` in `text`, overlapping ones
/// included, as char-index ranges. Occurrences spanning a line break are not
/// matches.
pub fn find_matches(text: &str, term: &str) -> Vec<Range<usize>> {
    let hay: Vec<char> = text.chars().map(fold).collect();
    let needle: Vec<char> = term.chars().map(fold).collect();
    if needle.is_empty() || needle.len() > hay.len() {
        return Vec::new();
    }
    (0..=hay.len() - needle.len())
        .map(|i| i..i + needle.len())
        .filter(|r| hay[r.clone()] == needle[..])
        .filter(|r| !hay[r.clone()].iter().any(|&c| is_line_break(c)))
        .collect()
}

pub(crate) fn locate_spans(
    page: &PageText,
    matches: &[Range<usize>],
    metrics: &HeuristicMetrics,
) -> (LocateMode, Vec<Rect>) {
    let chars: Vec<char> = page.text.chars().collect();
    match &page.glyphs {
        Some(glyphs) if glyphs.len() == chars.len() => {
            (LocateMode::Exact, exact_spans(glyphs, matches))
        }
        Some(glyphs) => {
            tracing::warn!(
                chars = chars.len(),
                glyphs = glyphs.len(),
                "glyph count does not match text; using heuristic layout"
            );
            (LocateMode::Heuristic, heuristic_spans(&chars, matches, metrics))
        }
        None => (LocateMode::Heuristic, heuristic_spans(&chars, matches, metrics)),
    }
}

fn exact_spans(glyphs: &[Rect], matches: &[Range<usize>]) -> Vec<Rect> {
    let mut spans = Vec::new();
    for m in matches {
        let mut current: Option<Rect> = None;
        for g in m.clone().map(|i| glyphs[i]).filter(|g| !g.is_empty()) {
            current = match current {
                // soft-wrapped line: start a new box
                Some(c) if !c.overlaps_vertically(&g) => {
                    spans.push(c);
                    Some(g)
                }
                Some(c) => Some(c.union(&g)),
                None => Some(g),
            };
        }
        spans.extend(current);
    }
    spans
}

fn heuristic_spans(
    chars: &[char],
    matches: &[Range<usize>],
    metrics: &HeuristicMetrics,
) -> Vec<Rect> {
    // (line, column) of every char; '\r' takes no column
    let mut positions = Vec::with_capacity(chars.len());
    let (mut line, mut col) = (0usize, 0usize);
    for &c in chars {
        positions.push((line, col));
        match c {
            '\n' => {
                line += 1;
                col = 0;
            }
            '\r' => {}
            _ => col += 1,
        }
    }

    matches
        .iter()
        .map(|m| {
            let (line, col) = positions[m.start];
            Rect::new(
                metrics.margin_left + col as f32 * metrics.char_width,
                metrics.margin_top + line as f32 * metrics.line_height,
                m.len() as f32 * metrics.char_width,
                metrics.line_height,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_are_case_insensitive() {
        assert_eq!(find_matches("Secret and SECRET", "secret"), vec![0..6, 11..17]);
    }

    #[test]
    fn overlapping_matches_are_reported() {
        assert_eq!(find_matches("aaaa", "aa"), vec![0..2, 1..3, 2..4]);
    }

    #[test]
    fn no_match_or_long_term_is_empty() {
        assert!(find_matches("abc", "x").is_empty());
        assert!(find_matches("ab", "abc").is_empty());
        assert!(find_matches("abc", "").is_empty());
    }

    #[test]
    fn ranges_are_char_indexed() {
        assert_eq!(find_matches("ÉtÉ été", "été"), vec![0..3, 4..7]);
    }

    #[test]
    fn heuristic_spans_follow_line_and_column() {
        let page = PageText::plain("ab\ncd secret");
        let m = find_matches(&page.text, "secret");
        let metrics = HeuristicMetrics {
            line_height: 10.0,
            char_width: 5.0,
            margin_left: 0.0,
            margin_top: 0.0,
        };
        let (mode, spans) = locate_spans(&page, &m, &metrics);
        assert_eq!(mode, LocateMode::Heuristic);
        assert_eq!(spans, vec![Rect::new(15.0, 10.0, 30.0, 10.0)]);
    }

    #[test]
    fn exact_spans_union_glyph_boxes() {
        let text = "xsecret";
        let glyphs: Vec<Rect> = (0..7)
            .map(|i| Rect::new(i as f32 * 4.0, 2.0, 4.0, 8.0))
            .collect();
        let page = PageText {
            text: text.into(),
            glyphs: Some(glyphs),
        };
        let m = find_matches(text, "SECRET");
        let (mode, spans) = locate_spans(&page, &m, &HeuristicMetrics::default());
        assert_eq!(mode, LocateMode::Exact);
        assert_eq!(spans, vec![Rect::new(4.0, 2.0, 24.0, 8.0)]);
    }

    #[test]
    fn glyph_mismatch_falls_back_to_heuristic() {
        let page = PageText {
            text: "secret".into(),
            glyphs: Some(vec![Rect::new(0.0, 0.0, 1.0, 1.0)]),
        };
        let m = find_matches(&page.text, "secret");
        let (mode, spans) = locate_spans(&page, &m, &HeuristicMetrics::default());
        assert_eq!(mode, LocateMode::Heuristic);
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn term_spanning_line_break_is_not_matched() {
        assert!(find_matches("top\nbottom", "p\nb").is_empty());
        assert!(find_matches("a\r\nb", "a\r\nb").is_empty());
        assert_eq!(find_matches("top\nbottom", "bottom"), vec![4..10]);
    }

    #[test]
    fn soft_wrapped_glyphs_split_into_boxes() {
        let glyphs = vec![
            Rect::new(100.0, 0.0, 5.0, 10.0),
            Rect::new(105.0, 0.0, 5.0, 10.0),
            Rect::new(0.0, 12.0, 5.0, 10.0),
        ];
        let page = PageText {
            text: "abc".into(),
            glyphs: Some(glyphs),
        };
        let m = find_matches(&page.text, "abc");
        let (_, spans) = locate_spans(&page, &m, &HeuristicMetrics::default());
        assert_eq!(
            spans,
            vec![Rect::new(100.0, 0.0, 10.0, 10.0), Rect::new(0.0, 12.0, 5.0, 10.0)]
        );
    }
}
