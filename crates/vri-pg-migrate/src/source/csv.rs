//! Delimited file source.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::debug;

use super::{RecordStream, CHANNEL_CAPACITY};
use crate::core::{SourceRecord, SqlValue};
use crate::error::{MigrateError, Result};

/// Stream a CSV file with a header row. Every field is read as text; the
/// normalizer types it later.
pub fn read_csv(path: PathBuf, delimiter: u8) -> RecordStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = stream_file(&path, delimiter, &tx) {
            let _ = tx.blocking_send(Err(e));
        }
    });
    rx
}

fn stream_file(path: &Path, delimiter: u8, tx: &mpsc::Sender<Result<SourceRecord>>) -> Result<()> {
    let source_name = path.display().to_string();
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| MigrateError::unavailable(source_name.as_str(), e))?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut count = 0u64;
    for result in reader.records() {
        let item = match result {
            Ok(rec) => {
                let line = rec.position().map(|p| p.line()).unwrap_or(0);
                if rec.len() != headers.len() {
                    Err(MigrateError::MalformedRecord {
                        source_name: source_name.clone(),
                        line,
                        message: format!(
                            "expected {} fields, found {}",
                            headers.len(),
                            rec.len()
                        ),
                    })
                } else {
                    let mut record = SourceRecord::new(line);
                    for (name, field) in headers.iter().zip(rec.iter()) {
                        record.push(name.as_str(), SqlValue::Text(field.to_string()));
                    }
                    Ok(record)
                }
            }
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => Err(MigrateError::MalformedRecord {
                source_name: source_name.clone(),
                line: e.position().map(|p| p.line()).unwrap_or(0),
                message: e.to_string(),
            }),
        };
        count += 1;
        if tx.blocking_send(item).is_err() {
            break;
        }
    }

    debug!("{}: read {} records", source_name, count);
    Ok(())
}
