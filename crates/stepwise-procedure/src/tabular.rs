//! Sheet codecs.
//!
//! A procedure sheet is a grid of text cells. It is stored either as delimited
//! text (records end in CRLF, cells holding the delimiter, a quote or a line
//! break are quoted) or as the first worksheet of an xlsx workbook.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use csv::{ByteRecord, QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use rust_xlsxwriter::Workbook;

use crate::error::{ProcedureError, Result};
use crate::field::parse_number;
use crate::step::format_number;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Storage form of a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetKind {
    /// Delimited text with the given single-byte delimiter.
    Delimited { delimiter: u8 },
    /// xlsx workbook; the sheet is its first worksheet.
    Workbook,
}

impl SheetKind {
    /// Workbook for `.xlsx` paths, delimited text otherwise.
    pub fn for_path(path: &Path, delimiter: u8) -> Self {
        let is_workbook = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
        if is_workbook {
            SheetKind::Workbook
        } else {
            SheetKind::Delimited { delimiter }
        }
    }
}

/// Encode `rows` in the given form.
pub fn write_table(rows: &[Vec<String>], kind: SheetKind) -> Result<Vec<u8>> {
    match kind {
        SheetKind::Delimited { delimiter } => write_delimited(rows, delimiter),
        SheetKind::Workbook => write_workbook(rows),
    }
}

/// Decode a sheet stored in the given form.
pub fn read_table(bytes: &[u8], kind: SheetKind) -> Result<Vec<Vec<String>>> {
    match kind {
        SheetKind::Delimited { delimiter } => read_delimited(bytes, delimiter),
        SheetKind::Workbook => read_workbook(bytes),
    }
}

// ---------------------------------------------------------------------------
//  Delimited text
// ---------------------------------------------------------------------------

fn write_delimited(rows: &[Vec<String>], delimiter: u8) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .terminator(Terminator::CRLF)
        .quote_style(QuoteStyle::Necessary)
        .flexible(true)
        .from_writer(Vec::new());
    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| ProcedureError::format(None, e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ProcedureError::format(None, e.error().to_string()))
}

/// A leading byte-order mark is skipped; blank lines carry no record.
fn read_delimited(bytes: &[u8], delimiter: u8) -> Result<Vec<Vec<String>>> {
    let (body, base) = match bytes.strip_prefix(BOM) {
        Some(rest) => (rest, BOM.len()),
        None => (bytes, 0),
    };
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(body);

    let mut rows = Vec::new();
    let mut last_start = None;
    let mut record = ByteRecord::new();
    loop {
        let more = reader.read_byte_record(&mut record).map_err(|e| {
            let (row, offset) = e.position().map_or((None, None), |pos| {
                (Some(pos.line() as usize), Some(base + pos.byte() as usize))
            });
            ProcedureError::SerializationFormat {
                row,
                offset,
                detail: e.to_string(),
            }
        })?;
        if !more {
            break;
        }
        let (line, start) = record
            .position()
            .map_or((rows.len() + 1, 0), |pos| (pos.line() as usize, pos.byte() as usize));
        last_start = Some((line, start));
        rows.push(decode_record(&record, line, base + start)?);
    }

    // The reader runs an unclosed quote to the end of the input.
    if let Some((line, start)) = last_start {
        if let Some(open) = unclosed_quote(body, start) {
            return Err(ProcedureError::SerializationFormat {
                row: Some(line),
                offset: Some(base + open),
                detail: "unterminated quoted field".to_string(),
            });
        }
    }
    Ok(rows)
}

fn decode_record(record: &ByteRecord, line: usize, start: usize) -> Result<Vec<String>> {
    record
        .iter()
        .map(|cell| {
            std::str::from_utf8(cell)
                .map(str::to_string)
                .map_err(|_| ProcedureError::SerializationFormat {
                    row: Some(line),
                    offset: Some(start),
                    detail: "record is not valid UTF-8".to_string(),
                })
        })
        .collect()
}

/// Offset of a quote opened after `start` and never closed.
fn unclosed_quote(bytes: &[u8], start: usize) -> Option<usize> {
    let mut open = None;
    for (i, byte) in bytes.iter().enumerate().skip(start) {
        if *byte == b'"' {
            open = match open {
                Some(_) => None,
                None => Some(i),
            };
        }
    }
    open
}

// ---------------------------------------------------------------------------
//  Workbook
// ---------------------------------------------------------------------------

/// Cells that read back unchanged as numbers are written as numbers.
fn write_workbook(rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let xlsx = |e: rust_xlsxwriter::XlsxError| ProcedureError::format(None, e.to_string());
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        let r = u32::try_from(r).map_err(|_| ProcedureError::format(None, "too many rows"))?;
        for (c, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            let c = u16::try_from(c).map_err(|_| ProcedureError::format(None, "too many columns"))?;
            match parse_number(cell).filter(|n| format_number(*n) == *cell) {
                Some(number) => worksheet.write_number(r, c, number).map_err(xlsx)?,
                None => worksheet.write_string(r, c, cell.as_str()).map_err(xlsx)?,
            };
        }
    }
    workbook.save_to_buffer().map_err(xlsx)
}

fn read_workbook(bytes: &[u8]) -> Result<Vec<Vec<String>>> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e| ProcedureError::format(None, format!("not an xlsx workbook: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ProcedureError::format(None, "workbook has no worksheet"))?
        .map_err(|e| ProcedureError::format(None, e.to_string()))?;

    let Some((first_row, first_col)) = range.start() else {
        return Ok(Vec::new());
    };
    let mut rows = vec![Vec::new(); first_row as usize];
    for cells in range.rows() {
        let mut row = vec![String::new(); first_col as usize];
        row.extend(cells.iter().map(cell_text));
        rows.push(row);
    }
    Ok(rows)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Float(value) => format_number(*value),
        Data::Int(value) => value.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMA: SheetKind = SheetKind::Delimited { delimiter: b',' };

    fn cells(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_write_quotes_only_when_needed() {
        let rows = cells(&[&["Step", "Note"], &["1", "a, b"], &["2", "say \"hi\""]]);
        let text = String::from_utf8(write_table(&rows, COMMA).unwrap()).unwrap();
        assert_eq!(
            text,
            "Step,Note\r\n1,\"a, b\"\r\n2,\"say \"\"hi\"\"\"\r\n"
        );
    }

    #[test]
    fn test_read_quoted_and_multiline_cells() {
        let input = b"a,\"x\r\ny\",\"q\"\"t\"\nb,,\r\n";
        let rows = read_table(input, COMMA).unwrap();
        assert_eq!(rows, cells(&[&["a", "x\r\ny", "q\"t"], &["b", "", ""]]));
    }

    #[test]
    fn test_read_without_final_newline() {
        let rows = read_table(b"a;b\nc;d", SheetKind::Delimited { delimiter: b';' }).unwrap();
        assert_eq!(rows, cells(&[&["a", "b"], &["c", "d"]]));
    }

    #[test]
    fn test_read_strips_bom() {
        let rows = read_table("\u{feff}Step,Type\r\n".as_bytes(), COMMA).unwrap();
        assert_eq!(rows[0][0], "Step");
    }

    #[test]
    fn test_unterminated_quote_reports_location() {
        let err = read_table(b"a,b\nc,\"open\n", COMMA).unwrap_err();
        match err {
            ProcedureError::SerializationFormat { row, offset, .. } => {
                assert_eq!(row, Some(2));
                assert_eq!(offset, Some(6));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_utf8_reports_record() {
        let err = read_table(b"Step\nab\xffc", COMMA).unwrap_err();
        match err {
            ProcedureError::SerializationFormat { row, offset, .. } => {
                assert_eq!(row, Some(2));
                assert_eq!(offset, Some(5));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cells_with_spaces_survive() {
        let tab = SheetKind::Delimited { delimiter: b'\t' };
        let rows = cells(&[&[" padded ", "tab\there"]]);
        let bytes = write_table(&rows, tab).unwrap();
        assert_eq!(read_table(&bytes, tab).unwrap(), rows);
    }

    #[test]
    fn test_kind_follows_extension() {
        assert_eq!(
            SheetKind::for_path(Path::new("runs/formation.XLSX"), b','),
            SheetKind::Workbook
        );
        assert_eq!(
            SheetKind::for_path(Path::new("formation.csv"), b';'),
            SheetKind::Delimited { delimiter: b';' }
        );
    }

    #[test]
    fn test_workbook_keeps_cells() {
        let rows = cells(&[
            &["Step", "Type", "", "Note"],
            &["1", "Rest", "", "007"],
            &["2", "End", "4.2", ""],
        ]);
        let bytes = write_table(&rows, SheetKind::Workbook).unwrap();
        assert!(bytes.starts_with(b"PK"));
        let read = read_table(&bytes, SheetKind::Workbook).unwrap();
        assert_eq!(read[0][..2], rows[0][..2]);
        assert_eq!(read[0][3], "Note");
        assert_eq!(read[1][3], "007");
        assert_eq!(read[2][..3], rows[2][..3]);
    }

    #[test]
    fn test_garbage_is_not_a_workbook() {
        let err = read_table(b"Step,Type\r\n", SheetKind::Workbook).unwrap_err();
        assert!(matches!(err, ProcedureError::SerializationFormat { .. }));
    }
}
