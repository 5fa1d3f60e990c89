//! Manifest file format.
//!
//! ```text
//! Path,ModifiedTime,Size,Hash[,NtfsFileId]
//! <relative/path>,<unix-seconds>,<bytes>,<hex-md5>[,<uint64-id>]
//! ```
//!
//! UTF-8 delimited text. A field is quoted only when it contains the
//! delimiter, a quote or a line break, with inner quotes doubled. Rows are
//! always written in path order. An absent hash or identifier is an empty
//! field.

use super::{FileRecord, Manifest};
use crate::utils::errors::{ManifestError, Result};
use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

const BASE_COLUMNS: [&str; 4] = ["Path", "ModifiedTime", "Size", "Hash"];

/// Name of the optional identifier column
pub const STABLE_ID_COLUMN: &str = "NtfsFileId";

/// Alternative identifier column name accepted on read
const STABLE_ID_COLUMN_ALIAS: &str = "FileId";

const DELIMITER: char = ',';
const QUOTE: char = '"';
const BOM: char = '\u{feff}';

/// Serialize `manifest` to `writer`.
pub fn write<W: Write>(manifest: &Manifest, mut writer: W) -> io::Result<()> {
    let with_ids = manifest.has_stable_ids();

    let mut header = BASE_COLUMNS.join(",");
    if with_ids {
        header.push(DELIMITER);
        header.push_str(STABLE_ID_COLUMN);
    }
    writeln!(writer, "{}", header)?;

    for record in manifest {
        write!(
            writer,
            "{},{},{},{}",
            quote_field(&record.relative_path),
            record.modified_time,
            record.size_bytes,
            quote_field(record.content_hash.as_deref().unwrap_or("")),
        )?;
        if with_ids {
            match record.stable_id {
                Some(id) => write!(writer, ",{}", id)?,
                None => write!(writer, ",")?,
            }
        }
        writeln!(writer)?;
    }

    Ok(())
}

pub fn to_bytes(manifest: &Manifest) -> Vec<u8> {
    let mut bytes = Vec::new();
    // Writing into a Vec cannot fail
    let _ = write(manifest, &mut bytes);
    bytes
}

/// Parse a manifest from `reader`.
pub fn read<R: Read>(mut reader: R) -> Result<Manifest> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    from_bytes(&bytes)
}

pub fn from_bytes(bytes: &[u8]) -> Result<Manifest> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ManifestError::parse(1, format!("manifest is not valid UTF-8: {}", e)))?;
    let text = text.strip_prefix(BOM).unwrap_or(text);

    let rows = split_rows(text)?;
    let mut rows = rows.into_iter();

    let Some((header_line, header)) = rows.next() else {
        return Err(ManifestError::parse(1, "missing header row"));
    };
    let columns = check_header(header_line, &header)?;

    let mut records = Vec::new();
    for (line, fields) in rows {
        if fields.len() != columns {
            return Err(ManifestError::parse(
                line,
                format!("expected {} fields, found {}", columns, fields.len()),
            ));
        }
        records.push(parse_record(line, fields)?);
    }

    debug!("Parsed manifest with {} records", records.len());
    Manifest::new(records)
}

/// Load a manifest file
pub fn load(path: &Path) -> Result<Manifest> {
    let file = fs::File::open(path).map_err(|e| ManifestError::file_io(path, e))?;
    read(io::BufReader::new(file))
}

/// Fail unless `path` may be written: it must not exist, or `overwrite` must be set.
pub fn ensure_destination(path: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && fs::symlink_metadata(path).is_ok() {
        return Err(ManifestError::DestinationExists(path.to_path_buf()));
    }
    Ok(())
}

/// Write `manifest` to `path`, creating parent directories.
///
/// Without `overwrite` the file is created exclusively, so an existing
/// destination is never replaced.
pub fn save(manifest: &Manifest, path: &Path, overwrite: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ManifestError::file_io(parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let file = options.open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            ManifestError::DestinationExists(path.to_path_buf())
        } else {
            ManifestError::file_io(path, e)
        }
    })?;

    let mut writer = BufWriter::new(file);
    write(manifest, &mut writer).map_err(|e| ManifestError::file_io(path, e))?;
    writer.flush().map_err(|e| ManifestError::file_io(path, e))?;
    Ok(())
}

fn quote_field(field: &str) -> Cow<'_, str> {
    let needs_quotes = field
        .chars()
        .any(|c| c == DELIMITER || c == QUOTE || c == '\n' || c == '\r');
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Returns the column count
fn check_header(line: usize, header: &[String]) -> Result<usize> {
    let base_matches = header.len() >= BASE_COLUMNS.len()
        && header.iter().zip(BASE_COLUMNS).all(|(got, want)| got == want);
    let valid = base_matches
        && match header.len() {
            4 => true,
            5 => header[4] == STABLE_ID_COLUMN || header[4] == STABLE_ID_COLUMN_ALIAS,
            _ => false,
        };

    if valid {
        Ok(header.len())
    } else {
        Err(ManifestError::parse(
            line,
            format!("unexpected header: {}", header.join(",")),
        ))
    }
}

fn parse_record(line: usize, mut fields: Vec<String>) -> Result<FileRecord> {
    let stable_id = if fields.len() == 5 {
        let raw = fields.pop().unwrap_or_default();
        if raw.is_empty() {
            None
        } else {
            Some(raw.parse::<u64>().map_err(|e| {
                ManifestError::parse(line, format!("invalid file id {:?}: {}", raw, e))
            })?)
        }
    } else {
        None
    };

    let mut fields = fields.into_iter();
    let relative_path = fields.next().unwrap_or_default();
    let modified = fields.next().unwrap_or_default();
    let size = fields.next().unwrap_or_default();
    let hash = fields.next().unwrap_or_default();

    if relative_path.is_empty() {
        return Err(ManifestError::parse(line, "empty path"));
    }

    let modified_time = modified.parse::<i64>().map_err(|e| {
        ManifestError::parse(line, format!("invalid modified time {:?}: {}", modified, e))
    })?;
    let size_bytes = size
        .parse::<u64>()
        .map_err(|e| ManifestError::parse(line, format!("invalid size {:?}: {}", size, e)))?;

    let content_hash = if hash.is_empty() {
        None
    } else if hash.len() == 32 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hash.to_ascii_lowercase())
    } else {
        return Err(ManifestError::parse(line, format!("invalid hash {:?}", hash)));
    };

    Ok(FileRecord {
        relative_path,
        modified_time,
        size_bytes,
        content_hash,
        stable_id,
    })
}

/// Split `text` into rows of fields, each tagged with the 1-based line it starts on.
/// Blank lines are dropped.
fn split_rows(text: &str) -> Result<Vec<(usize, Vec<String>)>> {
    let mut rows = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut was_quoted = false;
    let mut line = 1;
    let mut row_line = 1;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                QUOTE if chars.peek() == Some(&QUOTE) => {
                    chars.next();
                    field.push(QUOTE);
                }
                QUOTE => {
                    in_quotes = false;
                    match chars.peek() {
                        None | Some(&DELIMITER) | Some(&'\n') | Some(&'\r') => {}
                        Some(other) => {
                            return Err(ManifestError::parse(
                                line,
                                format!("unexpected {:?} after closing quote", other),
                            ));
                        }
                    }
                }
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            DELIMITER => fields.push(std::mem::take(&mut field)),
            QUOTE if field.is_empty() && !was_quoted => {
                in_quotes = true;
                was_quoted = true;
            }
            QUOTE => {
                return Err(ManifestError::parse(line, "quote inside an unquoted field"));
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                end_row(&mut rows, &mut fields, &mut field, was_quoted, row_line);
                was_quoted = false;
                line += 1;
                row_line = line;
            }
            _ => field.push(c),
        }
        if c == DELIMITER {
            was_quoted = false;
        }
    }

    if in_quotes {
        return Err(ManifestError::parse(row_line, "unterminated quoted field"));
    }
    end_row(&mut rows, &mut fields, &mut field, was_quoted, row_line);

    Ok(rows)
}

fn end_row(
    rows: &mut Vec<(usize, Vec<String>)>,
    fields: &mut Vec<String>,
    field: &mut String,
    was_quoted: bool,
    row_line: usize,
) {
    if fields.is_empty() && field.is_empty() && !was_quoted {
        return;
    }
    fields.push(std::mem::take(field));
    rows.push((row_line, std::mem::take(fields)));
}
