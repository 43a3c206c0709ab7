use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use serde::Serialize;

use crate::error::PipelineError;

pub const CSV_MEDIA_TYPE: &str = "text/csv";
pub const XLSX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Xlsx,
}

impl SheetFormat {
    pub fn from_content_type(content_type: &str) -> Result<Self, PipelineError> {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match media_type.as_str() {
            CSV_MEDIA_TYPE | "application/csv" | "text/plain" => Ok(SheetFormat::Csv),
            XLSX_MEDIA_TYPE => Ok(SheetFormat::Xlsx),
            other => Err(PipelineError::InvalidArgument(format!(
                "unsupported import content type '{other}'"
            ))),
        }
    }
}

/// One data row, mapped onto guest fields by header name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    /// 1-based position among the data rows
    pub row: usize,
    pub name: Option<String>,
    pub table_no: Option<String>,
    pub others: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ImportRecord {
    pub fn is_blank(&self) -> bool {
        self.name.is_none()
            && self.table_no.is_none()
            && self.others.is_none()
            && self.email.is_none()
            && self.phone.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    TableNo,
    Others,
    Email,
    Phone,
}

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '-' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn field_for(header: &str) -> Option<Field> {
    match normalize_header(header).as_str() {
        "name" | "guestname" | "fullname" => Some(Field::Name),
        "tableno" | "table" | "tablenumber" => Some(Field::TableNo),
        "others" | "plusones" | "guests" => Some(Field::Others),
        "email" | "emailaddress" => Some(Field::Email),
        "phone" | "phonenumber" | "mobile" | "whatsapp" => Some(Field::Phone),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Map header + rows onto records. Unknown columns are ignored; the first
/// column matching a field wins.
fn records_from_rows(
    header: &[String],
    rows: impl Iterator<Item = Vec<String>>,
) -> Result<Vec<ImportRecord>, PipelineError> {
    let mut columns: Vec<(usize, Field)> = Vec::new();
    for (index, name) in header.iter().enumerate() {
        if let Some(field) = field_for(name) {
            if !columns.iter().any(|(_, f)| *f == field) {
                columns.push((index, field));
            }
        }
    }
    if !columns.iter().any(|(_, f)| *f == Field::Name) {
        return Err(PipelineError::InvalidArgument(
            "import has no name column".to_string(),
        ));
    }

    let records = rows
        .enumerate()
        .map(|(i, row)| {
            let mut record = ImportRecord {
                row: i + 1,
                ..Default::default()
            };
            for (index, field) in &columns {
                let value = row.get(*index).and_then(|v| non_empty(v));
                match field {
                    Field::Name => record.name = value,
                    Field::TableNo => record.table_no = value,
                    Field::Others => record.others = value,
                    Field::Email => record.email = value,
                    Field::Phone => record.phone = value,
                }
            }
            record
        })
        .collect();
    Ok(records)
}

/// The csv reader drops empty lines without a trace, so each empty line
/// between the header and the last row is rewritten as a row of empty fields.
/// Line breaks inside quoted fields are left alone. Empty lines before the
/// header or after the last row are not rows.
fn keep_blank_lines(bytes: &[u8]) -> Vec<u8> {
    let start = bytes
        .iter()
        .position(|b| !matches!(b, b'\r' | b'\n'))
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n'))
        .map_or(start, |i| i + 1);
    let bytes = &bytes[start..end];

    let mut out = Vec::with_capacity(bytes.len() + 16);
    let mut quoted = false;
    let mut line_start = true;
    for &b in bytes {
        if line_start && !quoted && matches!(b, b'\r' | b'\n') {
            out.push(b',');
        }
        if b == b'"' {
            quoted = !quoted;
        }
        line_start = b == b'\n' && !quoted;
        out.push(b);
    }
    out
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<ImportRecord>, PipelineError> {
    let bytes = keep_blank_lines(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes.as_slice());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::InvalidArgument(format!("unreadable csv header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();
    if header.iter().all(|h| h.is_empty()) {
        return Err(PipelineError::InvalidArgument(
            "import is empty".to_string(),
        ));
    }

    let rows = reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect::<Vec<_>>())
                .map_err(|e| PipelineError::InvalidArgument(format!("unreadable csv row: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    records_from_rows(&header, rows.into_iter())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        // Spreadsheets store table numbers as floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
        other => other.to_string(),
    }
}

fn parse_xlsx(bytes: &[u8]) -> Result<Vec<ImportRecord>, PipelineError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::InvalidArgument(format!("unreadable workbook: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| PipelineError::InvalidArgument("workbook has no sheets".to_string()))?
        .map_err(|e| PipelineError::InvalidArgument(format!("unreadable worksheet: {e}")))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>());
    let header = rows
        .next()
        .ok_or_else(|| PipelineError::InvalidArgument("import is empty".to_string()))?;

    records_from_rows(&header, rows)
}

/// Parse an uploaded guest list into records, blank rows included
pub fn parse_records(format: SheetFormat, bytes: &[u8]) -> Result<Vec<ImportRecord>, PipelineError> {
    match format {
        SheetFormat::Csv => parse_csv(bytes),
        SheetFormat::Xlsx => parse_xlsx(bytes),
    }
}
