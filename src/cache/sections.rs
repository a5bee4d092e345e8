//! Section lookup inside cached artifacts
//!
//! Two strategies, tried in order by the cache:
//! - labelled sections taken from Markdown ATX headings (`# Title`), matched
//!   case-insensitively on the heading text and capped in length
//! - a keyword window around the first ASCII case-insensitive match

use indexmap::IndexMap;
use std::ops::Range;

/// Heading label -> byte range of the heading and its body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionIndex {
    sections: IndexMap<String, Range<usize>>,
}

struct Heading {
    start: usize,
    level: usize,
    label: String,
}

impl SectionIndex {
    /// Index the Markdown headings of `text`
    ///
    /// A section runs until the next heading of the same or a higher level.
    /// Lines inside fenced code blocks are never headings. The first
    /// occurrence of a duplicated label wins.
    pub fn build(text: &str) -> Self {
        let mut headings = Vec::new();
        let mut offset = 0;
        let mut in_fence = false;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim();
            if trimmed.starts_with("```") {
                in_fence = !in_fence;
            } else if !in_fence {
                if let Some((level, label)) = parse_heading(trimmed) {
                    headings.push(Heading {
                        start: offset,
                        level,
                        label,
                    });
                }
            }
            offset += line.len();
        }

        let mut sections = IndexMap::new();
        for (i, heading) in headings.iter().enumerate() {
            let end = headings[i + 1..]
                .iter()
                .find(|next| next.level <= heading.level)
                .map(|next| next.start)
                .unwrap_or(text.len());
            sections
                .entry(heading.label.clone())
                .or_insert(heading.start..end);
        }

        Self { sections }
    }

    /// Range of the section whose heading matches `label`
    pub fn lookup(&self, label: &str) -> Option<Range<usize>> {
        self.sections.get(&label.trim().to_lowercase()).cloned()
    }

    /// Heading labels in document order (lowercased)
    pub fn labels(&self) -> Vec<String> {
        self.sections.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let level = line.bytes().take_while(|b| *b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    let label = rest.trim().trim_end_matches('#').trim().to_lowercase();
    if label.is_empty() {
        return None;
    }
    Some((level, label))
}

/// Byte range of `window` bytes on each side of the first match of `needle`
///
/// Matching folds ASCII case only. The range is widened outward to char
/// boundaries so it always slices `text` cleanly.
pub fn keyword_window(text: &str, needle: &str, window: usize) -> Option<Range<usize>> {
    let hay = text.as_bytes();
    let pattern = needle.as_bytes();
    if pattern.is_empty() || pattern.len() > hay.len() {
        return None;
    }

    let pos = (0..=hay.len() - pattern.len())
        .find(|&i| hay[i..i + pattern.len()].eq_ignore_ascii_case(pattern))?;

    let start = floor_char_boundary(text, pos.saturating_sub(window));
    let end = ceil_char_boundary(text, (pos + pattern.len() + window).min(text.len()));
    Some(start..end)
}

/// Cut `range` to at most `limit` bytes from its start
///
/// The end is widened to the next char boundary, so the result may exceed
/// `limit` by up to three bytes.
pub fn cap_range(text: &str, range: Range<usize>, limit: usize) -> Range<usize> {
    if range.end - range.start <= limit {
        return range;
    }
    let end = ceil_char_boundary(text, (range.start + limit).min(text.len()));
    range.start..end.min(range.end)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Intro\nhello\n## Install\nrun cargo\n## Usage\ncall it\n# Appendix\nend\n";

    #[test]
    fn test_build_indexes_headings() {
        let index = SectionIndex::build(DOC);
        assert_eq!(index.labels(), vec!["intro", "install", "usage", "appendix"]);
    }

    #[test]
    fn test_section_runs_to_next_peer_heading() {
        let index = SectionIndex::build(DOC);

        let install = index.lookup("Install").unwrap();
        assert_eq!(&DOC[install], "## Install\nrun cargo\n");

        let intro = index.lookup("intro").unwrap();
        assert_eq!(&DOC[intro], "# Intro\nhello\n## Install\nrun cargo\n## Usage\ncall it\n");

        let appendix = index.lookup("APPENDIX").unwrap();
        assert_eq!(&DOC[appendix], "# Appendix\nend\n");
    }

    #[test]
    fn test_fenced_code_is_not_a_heading() {
        let text = "# Real\n```\n# not a heading\n```\n";
        let index = SectionIndex::build(text);
        assert_eq!(index.labels(), vec!["real"]);
    }

    #[test]
    fn test_hashtag_without_space_is_not_a_heading() {
        let index = SectionIndex::build("#hashtag\n####### too deep\n");
        assert!(index.is_empty());
    }

    #[test]
    fn test_keyword_window_is_case_insensitive() {
        let text = "aaaa NEEDLE bbbb";
        let range = keyword_window(text, "needle", 2).unwrap();
        assert_eq!(&text[range], "a NEEDLE b");
    }

    #[test]
    fn test_keyword_window_clamps_to_text() {
        let text = "needle";
        let range = keyword_window(text, "NeEdLe", 500).unwrap();
        assert_eq!(range, 0..6);
    }

    #[test]
    fn test_keyword_window_respects_char_boundaries() {
        let text = "ééé key ééé";
        let range = keyword_window(text, "key", 2).unwrap();
        let slice = &text[range];
        assert!(slice.contains("key"));
        assert!(text.contains(slice));
    }

    #[test]
    fn test_cap_range_limits_top_level_section() {
        let mut text = String::from("# Overview\n");
        for i in 0..100 {
            text.push_str(&format!("line {}\n", i));
        }
        let index = SectionIndex::build(&text);
        let full = index.lookup("overview").unwrap();
        assert_eq!(full, 0..text.len());

        let capped = cap_range(&text, full, 40);
        assert_eq!(capped, 0..40);
        assert!(text[capped].starts_with("# Overview\n"));
    }

    #[test]
    fn test_cap_range_keeps_short_sections_and_char_boundaries() {
        assert_eq!(cap_range("abc", 0..3, 10), 0..3);

        let text = "# é\nééééé";
        let capped = cap_range(text, 0..text.len(), 6);
        assert!(text.is_char_boundary(capped.end));
        assert!(capped.end <= 6 + 3);
    }

    #[test]
    fn test_keyword_window_misses() {
        assert!(keyword_window("abc", "xyz", 10).is_none());
        assert!(keyword_window("abc", "", 10).is_none());
        assert!(keyword_window("ab", "abc", 10).is_none());
    }
}
