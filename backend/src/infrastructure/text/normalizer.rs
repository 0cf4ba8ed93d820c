/// Text normalization applied to extracted document text before hashing and chunking
use regex::Regex;
use std::sync::OnceLock;

/// Cleans extraction artifacts while keeping paragraph structure
#[derive(Debug)]
pub struct TextNormalizer {
    inline_space_regex: Regex,
    currency_regex: Regex,
    spaced_digits_regex: Regex,
}

impl TextNormalizer {
    pub fn new() -> Self {
        TextNormalizer {
            // Runs of horizontal whitespace inside a line
            inline_space_regex: Regex::new(r"[ \t\x0B\x0C]+").unwrap(),
            // KSh 1,000 / Kshs.500 / KES1,000 / Ksh. 20
            currency_regex: Regex::new(r"(?i)\b(?:kshs?|kes)\.?\s*(\d)").unwrap(),
            // Thousands separators split by PDF extraction: "1 , 000"
            spaced_digits_regex: Regex::new(r"(\d) , (\d{3})\b").unwrap(),
        }
    }

    /// Get a singleton instance (for efficiency in batch processing)
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<TextNormalizer> = OnceLock::new();
        INSTANCE.get_or_init(TextNormalizer::new)
    }

    /// Fix typographic artifacts, collapse whitespace inside lines and keep
    /// at most one blank line between paragraphs
    pub fn normalize(&self, text: &str) -> String {
        let mut mapped = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\r' => {
                    if chars.peek() != Some(&'\n') {
                        mapped.push('\n');
                    }
                }
                _ => match replacement(c) {
                    Some(s) => mapped.push_str(s),
                    None => mapped.push(c),
                },
            }
        }

        let mut out = String::with_capacity(mapped.len());
        let mut pending_blank = false;
        for line in mapped.lines() {
            let line = self.inline_space_regex.replace_all(line, " ");
            let line = line.trim();
            if line.is_empty() {
                pending_blank = !out.is_empty();
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
                if pending_blank {
                    out.push('\n');
                }
            }
            pending_blank = false;
            out.push_str(line);
        }

        self.spaced_digits_regex.replace_all(&out, "$1,$2").into_owned()
    }

    /// Rewrite Kenyan shilling prefixes to the ISO code
    pub fn normalize_currency(&self, text: &str) -> String {
        self.currency_regex.replace_all(text, "KES $1").into_owned()
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn replacement(c: char) -> Option<&'static str> {
    let s = match c {
        '\u{FB00}' => "ff",
        '\u{FB01}' => "fi",
        '\u{FB02}' => "fl",
        '\u{FB03}' => "ffi",
        '\u{FB04}' => "ffl",
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => "'",
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => "\"",
        '\u{2013}' | '\u{2014}' | '\u{2212}' => "-",
        '\u{2026}' => "...",
        '\u{2022}' | '\u{25AA}' | '\u{25CF}' => "-",
        '\u{00A0}' | '\u{2007}' | '\u{2009}' | '\u{202F}' | '\u{3000}' => " ",
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}' => "",
        _ => return None,
    };
    Some(s)
}
