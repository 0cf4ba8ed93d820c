/// PDF text extraction with lopdf
use super::ParseError;
use chrono::NaiveDate;
use lopdf::content::Operation;
use lopdf::{Document as PdfDocument, Object, ObjectId};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

/// Raw per-page text plus Info dictionary fields
#[derive(Debug, Clone, Default)]
pub struct PdfExtraction {
    pub title: Option<String>,
    pub created_on: Option<NaiveDate>,
    pub pages: Vec<String>,
}

fn header_footer_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)^page\s+\d+(\s+of\s+\d+)?$",
            r"^\d+$",
            r"^-\s*\d+\s*-$",
            r"(?i)^(https?://|www\.)\S+$",
            r"(?i)^(©|\(c\)|copyright)\s*\d{4}",
            r"(?i)^(confidential|restricted)$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

pub fn is_header_or_footer(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && header_footer_patterns().iter().any(|re| re.is_match(line))
}

/// Load `bytes` and pull text page by page, in page order
pub fn extract(bytes: &[u8]) -> Result<PdfExtraction, ParseError> {
    let document =
        PdfDocument::load_mem(bytes).map_err(|e| ParseError::Unreadable(e.to_string()))?;

    if document.is_encrypted() {
        return Err(ParseError::Encrypted);
    }

    let mut pages = Vec::new();
    for (page_number, page_id) in document.get_pages() {
        let laid_out = layout_text(&document, page_id);
        if !laid_out.trim().is_empty() {
            pages.push(laid_out);
            continue;
        }
        // Composite fonts decode only through the font's ToUnicode map
        match document.extract_text(&[page_number]) {
            Ok(text) => pages.push(text),
            Err(e) => {
                debug!("Skipping unextractable page {}: {}", page_number, e);
                pages.push(String::new());
            }
        }
    }

    let info = info_dictionary(&document);
    Ok(PdfExtraction {
        title: info
            .as_ref()
            .and_then(|d| d.get("Title").cloned())
            .filter(|t| !t.trim().is_empty()),
        created_on: info
            .as_ref()
            .and_then(|d| d.get("CreationDate"))
            .and_then(|raw| parse_pdf_date(raw)),
        pages,
    })
}

/// Average glyph width as a fraction of the font size, for fonts we have no metrics for
const GLYPH_WIDTH: f32 = 0.5;
/// Horizontal gap, in font sizes, that separates two table columns
const COLUMN_GAP: f32 = 1.5;

/// A string drawn at one text position
#[derive(Debug, Clone)]
struct TextRun {
    x: f32,
    y: f32,
    width: f32,
    size: f32,
    text: String,
}

/// Text state across one content stream
#[derive(Debug)]
struct TextCursor {
    /// Text matrix `[a b c d e f]`
    matrix: [f32; 6],
    /// Start of the current line, as the translation part of the line matrix
    line: (f32, f32),
    font_size: f32,
    leading: f32,
    runs: Vec<TextRun>,
}

impl TextCursor {
    fn new() -> Self {
        TextCursor {
            matrix: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            line: (0.0, 0.0),
            font_size: 12.0,
            leading: 0.0,
            runs: Vec::new(),
        }
    }

    fn scale(&self) -> f32 {
        let [a, b, ..] = self.matrix;
        (a * a + b * b).sqrt().max(f32::EPSILON)
    }

    fn effective_size(&self) -> f32 {
        self.font_size * self.scale()
    }

    fn begin_text(&mut self) {
        self.matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        self.line = (0.0, 0.0);
    }

    fn set_matrix(&mut self, m: [f32; 6]) {
        self.matrix = m;
        self.line = (m[4], m[5]);
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        let [a, b, c, d, ..] = self.matrix;
        let x = self.line.0 + tx * a + ty * c;
        let y = self.line.1 + tx * b + ty * d;
        self.line = (x, y);
        self.matrix[4] = x;
        self.matrix[5] = y;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn advance(&mut self, distance: f32) {
        self.matrix[4] += distance;
    }

    fn show(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        let size = self.effective_size();
        let width = text.chars().count() as f32 * size * GLYPH_WIDTH;
        self.runs.push(TextRun {
            x: self.matrix[4],
            y: self.matrix[5],
            width,
            size,
            text,
        });
        self.advance(width);
    }

    /// `TJ`: strings interleaved with kerning adjustments in thousandths of an em
    fn show_array(&mut self, items: &[Object]) {
        let size = self.effective_size();
        for item in items {
            match item {
                Object::String(bytes, _) => self.show(decode_pdf_string(bytes)),
                other => {
                    if let Some(kern) = number(other) {
                        self.advance(-kern / 1000.0 * size);
                    }
                }
            }
        }
    }

    fn apply(&mut self, op: &Operation) {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => self.begin_text(),
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    self.font_size = size.abs();
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    self.leading = leading;
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(number),
                    operands.get(1).and_then(number),
                ) {
                    if op.operator == "TD" {
                        self.leading = -ty;
                    }
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                let values: Vec<f32> = operands.iter().filter_map(number).collect();
                if let Ok(m) = <[f32; 6]>::try_from(values.as_slice()) {
                    self.set_matrix(m);
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(decode_pdf_string(bytes));
                }
            }
            "'" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(decode_pdf_string(bytes));
                }
            }
            "\"" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    self.show(decode_pdf_string(bytes));
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_array(items);
                }
            }
            _ => {}
        }
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Rebuild a page's reading layout from its content stream. Runs sharing a
/// baseline form one line, top to bottom. Runs far apart on a line are joined
/// with a column gap so `render_tables` can split them again.
fn layout_text(document: &PdfDocument, page_id: ObjectId) -> String {
    let content = match document.get_and_decode_page_content(page_id) {
        Ok(content) => content,
        Err(e) => {
            debug!("No decodable content stream on page {:?}: {}", page_id, e);
            return String::new();
        }
    };

    let mut cursor = TextCursor::new();
    for op in &content.operations {
        cursor.apply(op);
    }
    lay_out(cursor.runs)
}

fn lay_out(mut runs: Vec<TextRun>) -> String {
    runs.retain(|run| !run.text.trim().is_empty());
    runs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut lines: Vec<(f32, f32, Vec<TextRun>)> = Vec::new();
    for run in runs {
        match lines.last_mut() {
            Some((y, _, line)) if (*y - run.y).abs() <= run.size * 0.5 => line.push(run),
            _ => lines.push((run.y, run.size, vec![run])),
        }
    }

    let mut out: Vec<String> = Vec::new();
    let mut previous: Option<(f32, f32)> = None;
    for (y, size, mut line) in lines {
        if let Some((last_y, last_size)) = previous {
            // A blank line where the vertical drop is wider than normal leading
            if last_y - y > last_size.max(size) * 2.0 {
                out.push(String::new());
            }
        }
        previous = Some((y, size));

        line.sort_by(|a, b| a.x.total_cmp(&b.x));
        let mut text = String::new();
        let mut end: Option<f32> = None;
        for run in &line {
            if let Some(end) = end {
                let gap = run.x - end;
                if gap > run.size * COLUMN_GAP {
                    text.truncate(text.trim_end().len());
                    text.push_str("   ");
                } else if gap > run.size * 0.15 && !text.ends_with(' ') {
                    text.push(' ');
                }
            }
            text.push_str(&run.text);
            end = Some(run.x + run.width);
        }
        out.push(text.trim().to_string());
    }
    out.join("\n")
}

/// Drop page-furniture lines from each page. Besides the fixed patterns, a
/// first or last line repeated on at least half of the pages (and at least
/// three of them) is treated as a running header or footer.
pub fn strip_headers_and_footers(pages: &[String]) -> Vec<String> {
    let mut edge_counts: HashMap<&str, usize> = HashMap::new();
    for page in pages {
        let lines: Vec<&str> = page.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if let Some(first) = lines.first() {
            *edge_counts.entry(first).or_default() += 1;
        }
        if lines.len() > 1 {
            if let Some(last) = lines.last() {
                *edge_counts.entry(last).or_default() += 1;
            }
        }
    }

    let threshold = (pages.len() / 2).max(3);
    let running: Vec<&str> = edge_counts
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|(line, _)| line)
        .collect();

    pages
        .iter()
        .map(|page| {
            page.lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !is_header_or_footer(trimmed) && !running.contains(&trimmed)
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

fn info_dictionary(document: &PdfDocument) -> Option<HashMap<&'static str, String>> {
    let info = match document.trailer.get(b"Info").ok()? {
        Object::Reference(id) => document.get_object(*id).ok()?,
        other => other,
    };
    let dict = info.as_dict().ok()?;

    let mut fields = HashMap::new();
    for key in ["Title", "CreationDate"] {
        if let Ok(Object::String(bytes, _)) = dict.get(key.as_bytes()) {
            fields.insert(key, decode_pdf_string(bytes));
        }
    }
    Some(fields)
}

/// PDF text strings are UTF-16BE with a BOM or a Latin-1 superset
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Parse the date part of `D:YYYYMMDDHHmmSS...`
fn parse_pdf_date(raw: &str) -> Option<NaiveDate> {
    let digits = raw.trim().trim_start_matches("D:");
    let date = digits.get(..8)?;
    NaiveDate::parse_from_str(date, "%Y%m%d").ok()
}


#[cfg(test)]
mod tests {
    use super::fixtures::{pdf_with_operations, rate_table_pdf};
    use super::*;
    use lopdf::content::Operation;

    #[test]
    fn test_header_footer_patterns() {
        assert!(is_header_or_footer("Page 3 of 12"));
        assert!(is_header_or_footer("  7 "));
        assert!(is_header_or_footer("www.centralbank.go.ke"));
        assert!(is_header_or_footer("© 2025 Capital Markets Authority"));
        assert!(is_header_or_footer("CONFIDENTIAL"));

        assert!(!is_header_or_footer("The rate was 7 percent."));
        assert!(!is_header_or_footer("Page views rose sharply"));
    }

    #[test]
    fn test_running_headers_are_removed() {
        let pages: Vec<String> = (1..=4)
            .map(|n| {
                format!(
                    "Quarterly Economic Review\nBody text for page {}.\nMore body.\nPage {} of 4",
                    n, n
                )
            })
            .collect();

        let cleaned = strip_headers_and_footers(&pages);
        assert_eq!(cleaned[0], "Body text for page 1.\nMore body.");
        assert_eq!(cleaned[3], "Body text for page 4.\nMore body.");
    }

    #[test]
    fn test_pdf_string_decoding() {
        assert_eq!(decode_pdf_string(b"Annual Report"), "Annual Report");
        let utf16 = [0xFE, 0xFF, 0x00, 0x4B, 0x00, 0x45, 0x00, 0x53];
        assert_eq!(decode_pdf_string(&utf16), "KES");
    }

    #[test]
    fn test_pdf_date_parsing() {
        assert_eq!(
            parse_pdf_date("D:20250630120000+03'00'"),
            NaiveDate::from_ymd_opt(2025, 6, 30)
        );
        assert_eq!(parse_pdf_date("garbage"), None);
    }

    #[test]
    fn test_cells_on_one_baseline_form_a_spaced_row() {
        let extraction = extract(&rate_table_pdf()).unwrap();
        assert_eq!(extraction.pages.len(), 1);

        let lines: Vec<&str> = extraction.pages[0].lines().collect();
        assert_eq!(lines[0], "Treasury bill auction results");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "Tenor   Rate   Change");
        assert_eq!(lines[3], "91-day   15.97%   -0.02");
        assert_eq!(lines[4], "182-day   16.45%   0.01");
        assert_eq!(lines[6], "Rates are annualised and quoted before withholding tax.");
    }

    #[test]
    fn test_text_positioning_operators() {
        // One text object: Tm, then TD setting the leading, then T* and '
        let bytes = pdf_with_operations(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new(
                "Tm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), 72.into(), 700.into()],
            ),
            Operation::new("Tj", vec![Object::string_literal("Bank")]),
            Operation::new("Td", vec![150.into(), 0.into()]),
            Operation::new("Tj", vec![Object::string_literal("Base rate")]),
            Operation::new("TD", vec![(-150).into(), (-14).into()]),
            Operation::new("Tj", vec![Object::string_literal("KCB")]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::Integer(-15000),
                    Object::string_literal("13.2%"),
                ])],
            ),
            Operation::new("T*", vec![]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Eq"),
                    Object::Integer(-40),
                    Object::string_literal("uity"),
                ])],
            ),
            Operation::new("Td", vec![150.into(), 0.into()]),
            Operation::new("Tj", vec![Object::string_literal("12.9%")]),
            Operation::new("'", vec![Object::string_literal("Rates as at June 2025")]),
            Operation::new("ET", vec![]),
        ]);

        let page = &extract(&bytes).unwrap().pages[0];
        assert_eq!(
            page,
            "Bank   Base rate\nKCB   13.2%\nEquity   12.9%\nRates as at June 2025"
        );
    }

    #[test]
    fn test_garbage_bytes_are_unreadable() {
        assert!(matches!(
            extract(b"%PDF-1.4 truncated"),
            Err(ParseError::Unreadable(_))
        ));
    }
}
