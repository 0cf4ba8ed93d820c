/// Layout-based table detection and row-oriented rendering
use regex::Regex;
use std::sync::OnceLock;

/// Minimum consecutive column-aligned lines before a run counts as a table
const MIN_TABLE_ROWS: usize = 3;

fn column_gap() -> &'static Regex {
    static GAP: OnceLock<Regex> = OnceLock::new();
    GAP.get_or_init(|| Regex::new(r"\s{2,}|\t").unwrap())
}

/// A table with the first row taken as the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn from_rows(mut rows: Vec<Vec<String>>) -> Option<Self> {
        rows.retain(|row| row.iter().any(|cell| !cell.is_empty()));
        if rows.is_empty() {
            return None;
        }
        let headers = rows.remove(0);
        Some(TextTable { headers, rows })
    }

    /// One line per data row: `Header: value; Header: value`.
    /// A header-only table renders its header cells.
    pub fn render(&self) -> String {
        if self.rows.is_empty() {
            return self.headers.join("; ");
        }

        self.rows
            .iter()
            .filter_map(|row| {
                let pairs: Vec<String> = row
                    .iter()
                    .enumerate()
                    .filter(|(_, value)| !value.is_empty())
                    .map(|(i, value)| match self.headers.get(i) {
                        Some(header) if !header.is_empty() => format!("{}: {}", header, value),
                        _ => format!("Column {}: {}", i + 1, value),
                    })
                    .collect();
                (!pairs.is_empty()).then(|| pairs.join("; "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn split_columns(line: &str) -> Option<Vec<String>> {
    let cells: Vec<String> = column_gap()
        .split(line.trim())
        .map(|c| c.trim().to_string())
        .collect();
    (cells.len() >= 2 && cells.iter().all(|c| !c.is_empty())).then_some(cells)
}

/// Replace every run of column-aligned lines in `text` with its rendered table
pub fn render_tables(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut run: Vec<(&str, Vec<String>)> = Vec::new();

    fn flush<'a>(run: &mut Vec<(&'a str, Vec<String>)>, out: &mut Vec<String>) {
        if run.len() >= MIN_TABLE_ROWS {
            let rows = run.drain(..).map(|(_, cells)| cells).collect();
            if let Some(table) = TextTable::from_rows(rows) {
                out.push(table.render());
            }
        } else {
            out.extend(run.drain(..).map(|(line, _)| line.to_string()));
        }
    }

    for line in text.lines() {
        match split_columns(line) {
            Some(cells) => run.push((line, cells)),
            None => {
                flush(&mut run, &mut out);
                out.push(line.to_string());
            }
        }
    }
    flush(&mut run, &mut out);

    out.join("\n")
}
