//! Data file parser
//!
//! A data file is CRLF-separated text: one header line, then rows of
//! space-separated numbers. Only the first two columns of each row are used.
//! Files may be read while another process is still writing them, so any row
//! that does not parse is dropped instead of failing the whole file.

use super::events::FileData;

/// Parse raw file bytes into an ordered list of `(x, y)` points.
///
/// Never fails: the header line is always skipped, blank rows are skipped,
/// rows with fewer than two columns or a non-numeric first/second column are
/// skipped. Non-finite values are skipped too since JSON cannot carry them.
pub fn parse_file(bytes: &[u8]) -> FileData {
    let text = String::from_utf8_lossy(bytes);

    let points = text
        .split("\r\n")
        .skip(1)
        .filter(|row| !row.trim().is_empty())
        .filter_map(parse_row)
        .collect();

    FileData::new(points)
}

fn parse_row(row: &str) -> Option<[f64; 2]> {
    let mut columns = row.split(' ');
    let x = parse_value(columns.next()?)?;
    let y = parse_value(columns.next()?)?;
    Some([x, y])
}

fn parse_value(column: &str) -> Option<f64> {
    column.parse::<f64>().ok().filter(|v| v.is_finite())
}
