//! File formats for administrative batches
//!
//! - identifier lists: one identifier per line
//! - identifier maps: CSV with header `id,record`
//! - corrections: CSV with header `current_id,corrected_id`
//! - record updates: CSV with header `id,record`
//!
//! A header mismatch is always a validation error.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::errors::{IdPoolError, Result};
use crate::records::RecordUpdate;
use crate::remap::CorrectionEntry;
use crate::store::IdentifierRecord;

pub const MAP_HEADER: [&str; 2] = ["id", "record"];
pub const CORRECTION_HEADER: [&str; 2] = ["current_id", "corrected_id"];

const BOM: char = '\u{feff}';

pub fn open_file(path: &Path) -> Result<File> {
    File::open(path)
        .map_err(|e| IdPoolError::io_with_source(format!("failed to open {}", path.display()), e))
}

/// Newline-delimited identifiers. Whitespace is trimmed and blank lines are
/// ignored; duplicates are left for the store to reject.
pub fn read_identifier_list(reader: impl Read) -> Result<Vec<String>> {
    let mut identifiers = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let raw = line.map_err(|e| IdPoolError::io_with_source("failed to read identifier list", e))?;
        // Spreadsheet exports often start with a byte order mark.
        let line = if index == 0 {
            raw.strip_prefix(BOM).unwrap_or(&raw)
        } else {
            &raw
        };
        let trimmed = line.trim();
        if trimmed.contains(BOM) {
            return Err(IdPoolError::validation(format!(
                "line {}: identifier contains a byte order mark",
                index + 1
            )));
        }
        if !trimmed.is_empty() {
            identifiers.push(trimmed.to_string());
        }
    }
    Ok(identifiers)
}

/// `id,record` rows for import; every row must carry a record.
pub fn read_id_map(reader: impl Read) -> Result<Vec<(String, String)>> {
    read_pairs(reader, &MAP_HEADER)?
        .into_iter()
        .map(|(line, id, record)| {
            if record.is_empty() {
                Err(IdPoolError::validation(format!(
                    "line {line}: import rows must have a non-empty record"
                )))
            } else {
                Ok((id, record))
            }
        })
        .collect()
}

pub fn read_corrections(reader: impl Read) -> Result<Vec<CorrectionEntry>> {
    Ok(read_pairs(reader, &CORRECTION_HEADER)?
        .into_iter()
        .map(|(_, current_id, corrected_id)| CorrectionEntry {
            current_id,
            corrected_id,
        })
        .collect())
}

pub fn read_record_updates(reader: impl Read) -> Result<Vec<RecordUpdate>> {
    Ok(read_pairs(reader, &MAP_HEADER)?
        .into_iter()
        .map(|(_, identifier, record)| RecordUpdate { identifier, record })
        .collect())
}

/// Write an `id,record` export. Unbound rows get an empty record unless
/// `bound_only` drops them. Returns the number of data rows written.
pub fn write_id_map(
    writer: impl Write,
    rows: &[IdentifierRecord],
    bound_only: bool,
) -> Result<usize> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(MAP_HEADER).map_err(csv_error)?;
    let mut written = 0;
    for row in rows {
        if bound_only && row.is_available() {
            continue;
        }
        out.write_record([
            row.identifier.as_str(),
            row.record_key.as_deref().unwrap_or(""),
        ])
        .map_err(csv_error)?;
        written += 1;
    }
    out.flush()
        .map_err(|e| IdPoolError::io_with_source("failed to flush export", e))?;
    Ok(written)
}

/// Two-column rows as `(line, first, second)` after checking the header.
fn read_pairs(reader: impl Read, expected: &[&str; 2]) -> Result<Vec<(u64, String, String)>> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let header = csv_reader.headers().map_err(csv_error)?.clone();
    if !header_matches(&header, expected) {
        return Err(IdPoolError::validation(format!(
            "invalid header {:?}, expected {:?}",
            header.iter().collect::<Vec<_>>(),
            expected
        )));
    }

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(csv_error)?;
        let line = record.position().map_or(0, csv::Position::line);
        if record.len() != 2 {
            return Err(IdPoolError::validation(format!(
                "line {line}: expected 2 fields, found {}",
                record.len()
            )));
        }
        rows.push((line, record[0].to_string(), record[1].to_string()));
    }
    Ok(rows)
}

fn header_matches(header: &StringRecord, expected: &[&str; 2]) -> bool {
    header.len() == expected.len() && header.iter().zip(expected).all(|(h, e)| h == *e)
}

fn csv_error(e: csv::Error) -> IdPoolError {
    if e.is_io_error() {
        IdPoolError::io_with_source("failed to read csv", e)
    } else {
        IdPoolError::Validation {
            message: format!("malformed csv: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identifier_list_trims_and_skips_blank_lines() {
        let input = "A\n  B  \n\r\n\nC\r\n";
        assert_eq!(
            read_identifier_list(input.as_bytes()).unwrap(),
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn identifier_list_strips_leading_byte_order_mark() {
        let input = "\u{feff}A001\nA002\n";
        assert_eq!(
            read_identifier_list(input.as_bytes()).unwrap(),
            vec!["A001".to_string(), "A002".to_string()]
        );
    }

    #[test]
    fn byte_order_mark_inside_the_list_is_rejected() {
        let err = read_identifier_list("A001\n\u{feff}A002\n".as_bytes()).unwrap_err();
        assert!(matches!(err, IdPoolError::Validation { .. }));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn correction_header_must_match_exactly() {
        let err = read_corrections("current,corrected\nA,B\n".as_bytes()).unwrap_err();
        assert!(matches!(err, IdPoolError::Validation { .. }));

        let err = read_corrections("corrected_id,current_id\nA,B\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("invalid header"));

        let entries = read_corrections("current_id,corrected_id\nA,B\nB,A\n".as_bytes()).unwrap();
        assert_eq!(
            entries,
            vec![CorrectionEntry::new("A", "B"), CorrectionEntry::new("B", "A")]
        );
    }

    #[test]
    fn malformed_row_is_fatal() {
        let err = read_corrections("current_id,corrected_id\nA,B,C\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2: expected 2 fields, found 3"));
    }

    #[test]
    fn import_requires_records() {
        let err = read_id_map("id,record\nA,1\nB,\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn export_writes_empty_record_for_unbound() {
        let rows = vec![
            IdentifierRecord {
                sequence: 1,
                identifier: "A".to_string(),
                record_key: Some("r1".to_string()),
            },
            IdentifierRecord {
                sequence: 2,
                identifier: "B".to_string(),
                record_key: None,
            },
        ];

        let mut all = Vec::new();
        assert_eq!(write_id_map(&mut all, &rows, false).unwrap(), 2);
        assert_eq!(String::from_utf8(all).unwrap(), "id,record\nA,r1\nB,\n");

        let mut bound = Vec::new();
        assert_eq!(write_id_map(&mut bound, &rows, true).unwrap(), 1);
        assert_eq!(String::from_utf8(bound).unwrap(), "id,record\nA,r1\n");
    }

    #[test]
    fn export_then_read_map_round_trips_bound_rows() {
        let rows = vec![IdentifierRecord {
            sequence: 1,
            identifier: "X,1".to_string(),
            record_key: Some("rec \"q\"".to_string()),
        }];
        let mut buf = Vec::new();
        write_id_map(&mut buf, &rows, true).unwrap();
        assert_eq!(
            read_id_map(buf.as_slice()).unwrap(),
            vec![("X,1".to_string(), "rec \"q\"".to_string())]
        );
    }
}
