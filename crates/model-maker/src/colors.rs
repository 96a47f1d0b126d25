//! Label color tables.
//!
//! A table maps label values to a name and an RGBA color. Two file forms
//! are read and written:
//!
//! - text: `index name r g b a` per line, components 0–255, `#` comments.
//!   Spaces in names are written as `%20` and `%` as `%25`; an empty name
//!   is written as `(none)` and read back as empty.
//! - CSV (`.csv`): header `LabelValue,Name,Color_R,Color_G,Color_B,Color_A`
//!   with RFC 4180 quoting.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ModelError, ModelResult};

/// Placeholder written for empty names.
pub const NO_NAME: &str = "(none)";

const CSV_HEADER: [&str; 6] = ["LabelValue", "Name", "Color_R", "Color_G", "Color_B", "Color_A"];

/// One color table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorEntry {
    /// Display name, may be empty.
    pub name: String,
    /// Color components in `[0, 1]`.
    pub rgba: [f64; 4],
}

/// Ordered label to `(name, color)` mapping. Label 0 is background.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelColorTable {
    entries: BTreeMap<i32, ColorEntry>,
}

impl LabelColorTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `label`.
    pub fn insert(&mut self, label: i32, name: impl Into<String>, rgba: [f64; 4]) {
        self.entries.insert(
            label,
            ColorEntry {
                name: name.into(),
                rgba,
            },
        );
    }

    /// Entry for `label`.
    pub fn get(&self, label: i32) -> Option<&ColorEntry> {
        self.entries.get(&label)
    }

    /// Entries in label order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &ColorEntry)> {
        self.entries.iter().map(|(&k, v)| (k, v))
    }

    /// Number of defined entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of color slots: largest label plus one.
    pub fn number_of_colors(&self) -> usize {
        self.entries
            .keys()
            .next_back()
            .map(|&max| (max.max(-1) + 1) as usize)
            .unwrap_or(0)
    }

    /// Name of `label`, if the table defines it.
    pub fn color_name(&self, label: i32) -> Option<&str> {
        self.get(label).map(|e| e.name.as_str())
    }

    /// Name of `label` usable in a file name: spaces become `_`.
    ///
    /// Empty names come back as the `(none)` placeholder.
    pub fn color_name_as_file_name(&self, label: i32) -> Option<String> {
        self.color_name(label).map(|name| {
            if name.is_empty() {
                NO_NAME.to_string()
            } else {
                name.replace(' ', "_")
            }
        })
    }

    /// RGBA of `label`.
    pub fn rgba(&self, label: i32) -> Option<[f64; 4]> {
        self.get(label).map(|e| e.rgba)
    }

    /// Load a table, choosing the form from the extension.
    pub fn load(path: &Path) -> ModelResult<Self> {
        info!("Loading color table from {:?}", path);
        let text = std::fs::read_to_string(path).map_err(|e| ModelError::io_read(path, e))?;
        let table = if is_csv(path) {
            Self::parse_csv(&text, path)?
        } else {
            Self::parse_text(&text, path)?
        };
        debug!(entries = table.len(), colors = table.number_of_colors(), "Loaded color table");
        Ok(table)
    }

    /// Save a table, choosing the form from the extension.
    pub fn save(&self, path: &Path) -> ModelResult<()> {
        info!("Saving color table to {:?}", path);
        let contents = if is_csv(path) {
            self.to_csv()
        } else {
            self.to_text()
        };
        let werr = |e| ModelError::io_write(path, e);
        let file = File::create(path).map_err(werr)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(contents.as_bytes()).map_err(werr)?;
        writer.flush().map_err(werr)
    }

    /// Parse the text form.
    ///
    /// A name field of `(none)` reads back as an empty name, so a label
    /// literally named `(none)` is treated as unnamed.
    pub fn parse_text(text: &str, path: &Path) -> ModelResult<Self> {
        let mut table = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return Err(ModelError::parse_at(
                    path,
                    line_no,
                    format!("expected `index name r g b [a]`, got {:?}", line),
                ));
            }
            let label = parse_label(fields[0], path, line_no)?;
            let name = decode_name(fields[1]);
            let alpha = fields.get(5).copied().unwrap_or("255");
            let rgba = [
                parse_component(fields[2], path, line_no)?,
                parse_component(fields[3], path, line_no)?,
                parse_component(fields[4], path, line_no)?,
                parse_component(alpha, path, line_no)?,
            ];
            table.insert(label, name, rgba);
        }
        Ok(table)
    }

    /// Render the text form.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("# Color table file\n");
        out.push_str(&format!("# {} values\n", self.number_of_colors()));
        for (label, entry) in self.iter() {
            let [r, g, b, a] = entry.rgba.map(to_byte);
            out.push_str(&format!(
                "{} {} {} {} {} {}\n",
                label,
                encode_name(&entry.name),
                r,
                g,
                b,
                a
            ));
        }
        out
    }

    /// Parse the CSV form.
    pub fn parse_csv(text: &str, path: &Path) -> ModelResult<Self> {
        let records = parse_csv_records(text).map_err(|(line, details)| {
            ModelError::parse_at(path, line, details)
        })?;
        let mut table = Self::new();
        let mut rows = records.into_iter();

        let Some((_, header)) = rows.next() else {
            return Ok(table);
        };
        let column = |name: &str| header.iter().position(|h| h.trim() == name);
        let columns: Vec<Option<usize>> = CSV_HEADER.iter().map(|h| column(*h)).collect();
        let (Some(label_col), Some(name_col)) = (columns[0], columns[1]) else {
            return Err(ModelError::parse_at(
                path,
                1,
                "CSV header needs LabelValue and Name columns",
            ));
        };

        for (line_no, row) in rows {
            if row.iter().all(|f| f.is_empty()) {
                continue;
            }
            let field = |col: Option<usize>| col.and_then(|c| row.get(c)).map(String::as_str);
            let label = parse_label(field(Some(label_col)).unwrap_or(""), path, line_no)?;
            let name = field(Some(name_col)).unwrap_or("").to_string();
            let mut rgba = [0.0, 0.0, 0.0, 1.0];
            for (slot, col) in rgba.iter_mut().zip(&columns[2..]) {
                if let Some(value) = field(*col).filter(|v| !v.is_empty()) {
                    *slot = parse_component(value, path, line_no)?;
                }
            }
            table.insert(label, name, rgba);
        }
        Ok(table)
    }

    /// Render the CSV form.
    pub fn to_csv(&self) -> String {
        let mut out = CSV_HEADER.join(",");
        out.push('\n');
        for (label, entry) in self.iter() {
            let [r, g, b, a] = entry.rgba.map(to_byte);
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                label,
                quote_csv(&entry.name),
                r,
                g,
                b,
                a
            ));
        }
        out
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

fn parse_label(field: &str, path: &Path, line: usize) -> ModelResult<i32> {
    field
        .trim()
        .parse::<i32>()
        .map_err(|_| ModelError::parse_at(path, line, format!("bad label value {:?}", field)))
}

fn parse_component(field: &str, path: &Path, line: usize) -> ModelResult<f64> {
    let value = field
        .trim()
        .parse::<f64>()
        .map_err(|_| ModelError::parse_at(path, line, format!("bad color component {:?}", field)))?;
    if !(0.0..=255.0).contains(&value) {
        return Err(ModelError::parse_at(
            path,
            line,
            format!("color component {} outside 0-255", value),
        ));
    }
    Ok(value / 255.0)
}

fn to_byte(component: f64) -> u8 {
    (component.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn encode_name(name: &str) -> String {
    if name.is_empty() {
        return NO_NAME.to_string();
    }
    name.replace('%', "%25").replace(' ', "%20")
}

fn decode_name(field: &str) -> String {
    if field == NO_NAME {
        return String::new();
    }
    field.replace("%20", " ").replace("%25", "%")
}

fn quote_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split CSV text into records, each tagged with its 1-based start line.
fn parse_csv_records(text: &str) -> Result<Vec<(usize, Vec<String>)>, (usize, String)> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push((record_line, std::mem::take(&mut record)));
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err((record_line, "unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push((record_line, record));
    }
    Ok(records)
}
