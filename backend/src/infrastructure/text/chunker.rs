/// Deterministic character-based chunking with section and sentence-aware boundaries
use crate::config::{ChunkingConfig, ConfigError};
use crate::domain::entities::{Chunk, Document};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// Longest line still considered a heading
const MAX_HEADING_CHARS: usize = 100;

fn heading_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Markdown: "## Monetary policy"
            r"^#{1,4}\s+(?P<title>\S.*)$",
            // Numbered: "3.", "3.1", "3.1.2" followed by a capitalised title
            r"^(?P<title>\d+(?:\.\d+)*\.?\s+\p{Lu}.*)$",
            // Roman: "IV. Outlook"
            r"^(?P<title>[IVXL]+\.\s+\p{Lu}.*)$",
            // ALL CAPS line
            r"^(?P<title>\p{Lu}[\p{Lu}\d\s&,'()/-]{5,})$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

fn table_row_pattern() -> &'static Regex {
    static ROW: OnceLock<Regex> = OnceLock::new();
    ROW.get_or_init(|| {
        Regex::new(
            // Rendered rows ("Tenor: 91-day; Rate: 15.97%") or pipe-delimited cells
            r"^(?:[^:;]{1,60}: [^;]+(?:; [^:;]{1,60}: [^;]+)+|\|.*\||[^|]+(?:\|[^|]+){2,})$",
        )
        .unwrap()
    })
}

fn heading_title(line: &str) -> Option<String> {
    if line.chars().count() > MAX_HEADING_CHARS
        || line.ends_with(&['.', ';', ':', ','][..])
        || line.chars().filter(|c| c.is_alphabetic()).count() < 4
    {
        return None;
    }
    heading_patterns().iter().find_map(|re| {
        re.captures(line)
            .and_then(|caps| caps.name("title"))
            .map(|m| m.as_str().trim().to_string())
    })
}

/// Headings and table blocks of a text, as character offsets
#[derive(Debug, Default)]
struct Layout {
    /// Start of each heading line and its title, in text order
    headings: Vec<(usize, String)>,
    /// Runs of consecutive table rows: start of the first row to end of the last
    tables: Vec<Range<usize>>,
}

impl Layout {
    fn scan(chars: &[char]) -> Self {
        let mut layout = Layout::default();
        let mut table: Option<Range<usize>> = None;
        let mut line_start = 0;

        let line_ends = chars
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == '\n')
            .map(|(i, _)| i)
            .chain(std::iter::once(chars.len()));
        for line_end in line_ends {
            let line: String = chars[line_start..line_end].iter().collect();
            let indent = line.chars().take_while(|c| c.is_whitespace()).count();
            let trimmed = line.trim();

            if !trimmed.is_empty() && table_row_pattern().is_match(trimmed) {
                let row_end = line_start + line.trim_end().chars().count();
                table = Some(match table {
                    Some(block) => block.start..row_end,
                    None => line_start + indent..row_end,
                });
            } else {
                if let Some(block) = table.take() {
                    layout.tables.push(block);
                }
                if let Some(title) = heading_title(trimmed) {
                    layout.headings.push((line_start + indent, title));
                }
            }
            line_start = line_end + 1;
        }
        layout.tables.extend(table);
        layout
    }

    /// Title of the section `pos` falls in
    fn section_at(&self, pos: usize) -> Option<&str> {
        let after = self.headings.partition_point(|(start, _)| *start <= pos);
        after.checked_sub(1).map(|i| self.headings[i].1.as_str())
    }

    fn is_heading_start(&self, pos: usize) -> bool {
        self.headings
            .binary_search_by_key(&pos, |(start, _)| *start)
            .is_ok()
    }

    /// The table block `pos` falls strictly inside
    fn table_around(&self, pos: usize) -> Option<&Range<usize>> {
        self.tables.iter().find(|block| block.start < pos && pos < block.end)
    }
}

/// Splits documents into overlapping, size-bounded chunks.
///
/// Offsets are in characters, so multi-byte text never splits inside a code point.
/// Identical (text, config) pairs always produce identical boundaries. Breaks
/// land before section headings where the window allows, table rows are never
/// cut, and a table that fits in one chunk starts a new chunk rather than
/// straddling two.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

/// A chunk boundary before it is bound to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    /// Characters shared with the previous span
    pub overlap: usize,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Chunker { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let chars: Vec<char> = document.text().chars().collect();
        let layout = Layout::scan(&chars);
        self.layout_spans(&chars, &layout)
            .into_iter()
            .enumerate()
            .map(|(ordinal, span)| {
                let text: String = chars[span.start..span.end].iter().collect();
                // The section is decided by where the chunk's own text begins, past the overlap
                let own_start = (span.start + span.overlap..span.end)
                    .find(|&p| !chars[p].is_whitespace())
                    .unwrap_or(span.start);
                Chunk::new(
                    document.content_hash(),
                    ordinal,
                    text,
                    span.start,
                    span.end,
                    span.overlap,
                )
                .with_section_title(layout.section_at(own_start).map(str::to_string))
            })
            .collect()
    }

    /// Compute chunk spans over `chars`
    pub fn spans(&self, chars: &[char]) -> Vec<Span> {
        self.layout_spans(chars, &Layout::scan(chars))
    }

    fn layout_spans(&self, chars: &[char], layout: &Layout) -> Vec<Span> {
        let ChunkingConfig {
            max_chunk_chars: max,
            min_chunk_chars: min,
            overlap_chars: overlap,
            boundary_window_chars: window,
        } = self.config;

        // Leading and trailing whitespace never belongs to a chunk
        let Some(first) = chars.iter().position(|c| !c.is_whitespace()) else {
            return Vec::new();
        };
        let last = chars
            .iter()
            .rposition(|c| !c.is_whitespace())
            .map_or(first, |p| p + 1);

        let mut spans = Vec::new();
        let mut start = first;
        let mut overlap_with_previous = 0;

        loop {
            if last - start <= max {
                spans.push(Span {
                    start,
                    end: last,
                    overlap: overlap_with_previous,
                });
                break;
            }

            // The next chunk starts at most `overlap` before this end, so capping
            // the end here keeps the remaining tail at least `min` long
            let limit = (start + max).min(last + overlap - min);
            let end = match table_cut(chars, layout, start, limit, max - overlap) {
                Some(end) if end >= start + min => end,
                _ => {
                    let floor = (start + min).max(limit.saturating_sub(window));
                    find_break(chars, floor, limit, layout)
                }
            };

            spans.push(Span {
                start,
                end,
                overlap: overlap_with_previous,
            });

            let candidate = end - overlap;
            let next = next_start(chars, candidate, (start + 1).max(candidate.saturating_sub(window)));
            overlap_with_previous = end - next;
            start = next;
        }

        spans
    }
}

/// Break just before a table that would straddle `limit`, provided the whole
/// table plus the overlap fits in the next chunk
fn table_cut(chars: &[char], layout: &Layout, start: usize, limit: usize, room: usize) -> Option<usize> {
    let table = layout.table_around(limit)?;
    if table.start <= start || table.len() > room {
        return None;
    }
    (start..table.start)
        .rev()
        .find(|&p| !chars[p].is_whitespace())
        .map(|p| p + 1)
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ';')
}

/// Best break position in `[floor, limit]`: before a section heading, after a
/// sentence end or before a newline, then at any whitespace, otherwise a hard
/// cut at `limit`. Inside a table only row ends qualify.
fn find_break(chars: &[char], floor: usize, limit: usize, layout: &Layout) -> usize {
    let mut sentence_break = None;
    let mut whitespace_break = None;

    for p in (floor.max(1)..=limit).rev() {
        let current = chars[p];
        let previous = chars[p - 1];
        if !current.is_whitespace() || previous.is_whitespace() {
            continue;
        }
        if current != '\n' && layout.table_around(p).is_some() {
            continue;
        }
        if opens_section(chars, p, layout) {
            return p;
        }
        if sentence_break.is_none() && (is_sentence_end(previous) || current == '\n') {
            sentence_break = Some(p);
        }
        if whitespace_break.is_none() {
            whitespace_break = Some(p);
        }
    }

    sentence_break.or(whitespace_break).unwrap_or(limit)
}

/// Whether the first text after `p` is a heading
fn opens_section(chars: &[char], p: usize, layout: &Layout) -> bool {
    (p..chars.len())
        .find(|&i| !chars[i].is_whitespace())
        .is_some_and(|i| layout.is_heading_start(i))
}

/// Nearest word start at or before `candidate`, no lower than `floor`.
/// Falls back to `candidate` itself inside very long words.
fn next_start(chars: &[char], candidate: usize, floor: usize) -> usize {
    (floor.max(1)..=candidate)
        .rev()
        .find(|&p| !chars[p].is_whitespace() && chars[p - 1].is_whitespace())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::base::Entity;
    use crate::domain::entities::{DocumentFormat, SourceMetadata};
    use crate::domain::value_objects::{Institution, SourceUrl};
    use chrono::Utc;

    fn config(max: usize, min: usize, overlap: usize, window: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chunk_chars: max,
            min_chunk_chars: min,
            overlap_chars: overlap,
            boundary_window_chars: window,
        }
    }

    fn document(text: &str) -> Document {
        let metadata = SourceMetadata::new(
            SourceUrl::new("https://www.centralbank.go.ke/mpc").unwrap(),
            Institution::new("cbk").unwrap(),
            Utc::now(),
        );
        Document::new(&metadata, "MPC", DocumentFormat::Text, 1, text, None)
    }

    fn sample_text() -> String {
        let sentences = [
            "The Monetary Policy Committee met on 5 February 2026.",
            "It lowered the Central Bank Rate to 9.75 percent.",
            "Overall inflation remained within the target range.",
            "Private sector credit growth improved in January!",
            "Are foreign exchange reserves adequate?",
            "Reserves stood at 4.6 months of import cover; this is above the statutory requirement.",
        ];
        let mut text = String::new();
        for i in 0..12 {
            text.push_str(sentences[i % sentences.len()]);
            text.push(if i % 4 == 3 { '\n' } else { ' ' });
        }
        text.trim_end().to_string()
    }

    #[test]
    fn test_whitespace_only_yields_nothing() {
        let chunker = Chunker::new(ChunkingConfig::default()).unwrap();
        assert!(chunker.chunk(&document(" \n\t  ")).is_empty());
        assert!(chunker.chunk(&document("")).is_empty());
    }

    #[test]
    fn test_short_document_is_single_chunk() {
        let chunker = Chunker::new(ChunkingConfig::default()).unwrap();
        let doc = document("CBK holds rate.");
        let chunks = chunker.chunk(&doc);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text(), "CBK holds rate.");
        assert_eq!(chunks[0].char_start(), 0);
        assert_eq!(chunks[0].overlap_chars(), 0);
    }

    #[test]
    fn test_chunks_respect_size_bounds_and_overlap() {
        let cfg = config(200, 80, 30, 60);
        let chunker = Chunker::new(cfg).unwrap();
        let text = sample_text();
        let doc = document(&text);
        let chunks = chunker.chunk(&doc);

        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert!(chunk.char_len() >= cfg.min_chunk_chars, "{:?}", chunk);
            assert!(chunk.char_len() <= cfg.max_chunk_chars, "{:?}", chunk);
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start() < pair[0].char_end());
            assert!(pair[0].char_end() - pair[1].char_start() >= cfg.overlap_chars);
            assert_eq!(pair[1].overlap_chars(), pair[0].char_end() - pair[1].char_start());
        }

        let total = text.chars().count();
        assert_eq!(chunks.first().unwrap().char_start(), 0);
        assert_eq!(chunks.last().unwrap().char_end(), total);
    }

    #[test]
    fn test_prefers_sentence_boundaries() {
        let chunker = Chunker::new(config(200, 80, 30, 60)).unwrap();
        let chunks = chunker.chunk(&document(&sample_text()));

        for chunk in &chunks[..chunks.len() - 1] {
            let last = chunk.text().chars().last().unwrap();
            assert!(
                is_sentence_end(last) || last.is_alphanumeric(),
                "chunk ended mid-whitespace: {:?}",
                chunk.text()
            );
        }
        assert!(chunks[..chunks.len() - 1]
            .iter()
            .any(|c| c.text().ends_with('.') || c.text().ends_with('!') || c.text().ends_with('?')));
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let chunker = Chunker::new(config(200, 80, 30, 60)).unwrap();
        let doc = document(&sample_text());

        let first = chunker.chunk(&doc);
        let second = chunker.chunk(&doc);

        assert_eq!(first, second);
        let ids: Vec<_> = first.iter().map(|c| c.id().clone()).collect();
        let ids_again: Vec<_> = second.iter().map(|c| c.id().clone()).collect();
        assert_eq!(ids, ids_again);
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let chunker = Chunker::new(config(100, 40, 10, 20)).unwrap();
        let text = "x".repeat(250);
        let chunks = chunker.chunk(&document(&text));

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.char_len() >= 40 && chunk.char_len() <= 100);
        }
        assert_eq!(chunks.last().unwrap().char_end(), 250);
    }

    #[test]
    fn test_tail_is_never_below_minimum() {
        let chunker = Chunker::new(config(100, 40, 10, 20)).unwrap();
        // Just over one chunk: a naive split would leave a tiny tail
        let text = "word ".repeat(21);
        let chunks = chunker.chunk(&document(text.trim_end()));

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].char_len() >= 40);
    }

    fn sectioned_text() -> String {
        [
            "1. Introduction",
            "The Committee reviewed recent economic developments. ".repeat(6).trim_end(),
            "",
            "2. Monetary Policy Stance",
            "Inflation eased to 4.5 percent in January. ".repeat(6).trim_end(),
            "",
            "OUTLOOK AND RISKS",
            "Risks to the outlook remain balanced overall. ".repeat(6).trim_end(),
        ]
        .join("\n")
    }

    #[test]
    fn test_heading_detection() {
        assert_eq!(heading_title("3.1 Inflation Outlook").as_deref(), Some("3.1 Inflation Outlook"));
        assert_eq!(heading_title("## Key rates").as_deref(), Some("Key rates"));
        assert_eq!(heading_title("IV. Financial Stability").as_deref(), Some("IV. Financial Stability"));
        assert_eq!(heading_title("MONETARY POLICY STATEMENT").as_deref(), Some("MONETARY POLICY STATEMENT"));

        assert_eq!(heading_title("1. Employers remit PAYE by the ninth."), None);
        assert_eq!(heading_title("KES 500,000"), None);
        assert_eq!(heading_title("The rate was held."), None);
    }

    #[test]
    fn test_breaks_before_headings_and_records_sections() {
        let chunker = Chunker::new(config(400, 150, 50, 150)).unwrap();
        let text = sectioned_text();
        let chunks = chunker.chunk(&document(&text));

        let sections: Vec<Option<&str>> = chunks.iter().map(|c| c.section_title()).collect();
        assert_eq!(
            sections,
            vec![
                Some("1. Introduction"),
                Some("2. Monetary Policy Stance"),
                Some("OUTLOOK AND RISKS")
            ]
        );

        // Each chunk ends right where the next section begins
        assert!(chunks[0].text().ends_with("economic developments."));
        assert!(chunks[1].text().ends_with("percent in January."));
        assert!(chunks[1].text().contains("2. Monetary Policy Stance\nInflation"));
    }

    #[test]
    fn test_text_without_headings_has_no_section() {
        let chunker = Chunker::new(config(200, 80, 30, 60)).unwrap();
        let chunks = chunker.chunk(&document(&sample_text()));
        assert!(chunks.iter().all(|c| c.section_title().is_none()));
    }

    #[test]
    fn test_table_block_is_kept_whole() {
        let rows = [
            "Tenor: 91-day; Rate: 15.97%; Change: -0.02",
            "Tenor: 182-day; Rate: 16.45%; Change: 0.01",
            "Tenor: 364-day; Rate: 16.99%; Change: 0.03",
            "Tenor: 2-year; Rate: 17.10%; Change: 0.05",
            "Tenor: 5-year; Rate: 17.40%; Change: 0.08",
        ];
        let table = rows.join("\n");
        let text = format!(
            "{}\n{}\n{}",
            "Treasury bill rates rose across all tenors this week. ".repeat(6).trim_end(),
            table,
            "Demand was strongest for the shortest paper on offer. ".repeat(6).trim_end()
        );
        let chunker = Chunker::new(config(400, 150, 50, 150)).unwrap();
        let chunks = chunker.chunk(&document(&text));

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().any(|c| c.text().contains(&table)));

        // No chunk boundary falls inside a row
        let chars: Vec<char> = text.chars().collect();
        for chunk in &chunks {
            for boundary in [chunk.char_start(), chunk.char_end()] {
                let line_start = chars[..boundary]
                    .iter()
                    .rposition(|c| *c == '\n')
                    .map_or(0, |p| p + 1);
                let line_end = chars[boundary..]
                    .iter()
                    .position(|c| *c == '\n')
                    .map_or(chars.len(), |p| boundary + p);
                let line: String = chars[line_start..line_end].iter().collect();
                if rows.contains(&line.as_str()) {
                    assert!(
                        boundary == line_start || boundary == line_end,
                        "cut inside row {:?}",
                        line
                    );
                }
            }
        }
    }

    #[test]
    fn test_multibyte_offsets_are_characters() {
        let chunker = Chunker::new(config(100, 40, 10, 20)).unwrap();
        let text = "Riba ya KES — ümlaut ñ ".repeat(10);
        let doc = document(&text);
        let chunks = chunker.chunk(&doc);

        let chars: Vec<char> = doc.text().chars().collect();
        for chunk in &chunks {
            let expected: String = chars[chunk.char_start()..chunk.char_end()].iter().collect();
            assert_eq!(chunk.text(), expected);
        }
    }
}
