use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::{EtlError, Result};

// Raw source formats the extractor can stage
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SourceFormat {
    Csv,
    Parquet,
    ZippedCsv,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceFormat::Csv => write!(f, "CSV"),
            SourceFormat::Parquet => write!(f, "Parquet"),
            SourceFormat::ZippedCsv => write!(f, "Zipped CSV"),
        }
    }
}

// Bytes read from the start of a file to sniff its format
const SNIFF_BYTES: u64 = 64 * 1024;

// Determine the source format from magic numbers, falling back to content sniffing
pub fn determine_source_format(path: &Path) -> Result<SourceFormat> {
    let file = File::open(path)?;
    let mut prefix = Vec::new();
    file.take(SNIFF_BYTES).read_to_end(&mut prefix)?;

    if let Some(format) = match_magic_numbers(&prefix) {
        return Ok(format);
    }

    if looks_like_csv(&prefix) {
        Ok(SourceFormat::Csv)
    } else {
        Err(EtlError::UnsupportedSource {
            path: path.to_path_buf(),
            reason: "content is neither CSV, Parquet nor a zip archive".to_string(),
        })
    }
}

fn match_magic_numbers(header: &[u8]) -> Option<SourceFormat> {
    match header {
        // PKZip
        [0x50, 0x4B, 0x03, 0x04, ..] => Some(SourceFormat::ZippedCsv),
        // PAR1
        [0x50, 0x41, 0x52, 0x31, ..] => Some(SourceFormat::Parquet),
        _ => None,
    }
}

// Text without NUL bytes whose header record has at least two fields.
// Only the header is inspected: data rows may hold quoted newlines and
// are left to DuckDB's reader.
fn looks_like_csv(prefix: &[u8]) -> bool {
    let text = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        // the prefix may end in the middle of a character
        Err(e) if e.error_len().is_none() => match std::str::from_utf8(&prefix[..e.valid_up_to()]) {
            Ok(text) => text,
            Err(_) => return false,
        },
        Err(_) => return false,
    };
    if text.contains('\0') {
        return false;
    }

    let text = text.trim_start_matches('\u{feff}');
    header_field_count(text) >= 2
}

// Number of comma separated fields in the first record, honouring quotes
fn header_field_count(text: &str) -> usize {
    let mut fields = 1;
    let mut in_quotes = false;
    let mut seen_content = false;

    for c in text.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields += 1,
            '\n' | '\r' if !in_quotes => {
                if seen_content {
                    break;
                }
                continue;
            }
            _ => {}
        }
        seen_content = true;
    }

    if seen_content {
        fields
    } else {
        0
    }
}

// Find the first CSV member of a zip archive
pub fn find_csv_in_zip(zip_path: &Path) -> Result<String> {
    let file = File::open(zip_path)?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name();
        if !entry.is_dir() && name.to_lowercase().ends_with(".csv") && !name.starts_with("__MACOSX") {
            return Ok(name.to_string());
        }
    }

    Err(EtlError::UnsupportedSource {
        path: zip_path.to_path_buf(),
        reason: "no .csv file found in zip archive".to_string(),
    })
}

// Unpack the first CSV member of a zip archive into `target_dir`
pub fn unpack_csv_from_zip(zip_path: &Path, target_dir: &Path) -> Result<PathBuf> {
    let member = find_csv_in_zip(zip_path)?;
    let file = File::open(zip_path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut entry = archive.by_name(&member)?;

    let file_name = Path::new(&member)
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "source.csv".into());
    let target = target_dir.join(file_name);

    let mut output = File::create(&target)?;
    io::copy(&mut entry, &mut output)?;
    Ok(target)
}
