//! Line-delimited JSON I/O for the three sources and the tidy output.
//!
//! RULE: A malformed input line aborts the run. No partial dataset is
//! meaningful without every record of every source.

use crate::error::{PipelineError, PipelineResult};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Read every record from a JSONL file. Blank lines are skipped.
pub fn read_records<T: DeserializeOwned>(path: &Path, source_name: &'static str) -> PipelineResult<Vec<T>> {
    Ok(read_numbered(path, source_name)?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// Like [`read_records`], keeping each record's 1-based line number for
/// errors raised after parsing.
pub fn read_numbered<T: DeserializeOwned>(path: &Path, source_name: &'static str) -> PipelineResult<Vec<(usize, T)>> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let records = parse_numbered(BufReader::new(file), source_name)?;
    log::info!("Read {} {source_name} records from {}", records.len(), path.display());
    Ok(records)
}

/// Parse JSONL from any reader. Errors carry the 1-based line number.
pub fn parse_records<T: DeserializeOwned, R: BufRead>(reader: R, source_name: &'static str) -> PipelineResult<Vec<T>> {
    Ok(parse_numbered(reader, source_name)?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

pub fn parse_numbered<T: DeserializeOwned, R: BufRead>(reader: R, source_name: &'static str) -> PipelineResult<Vec<(usize, T)>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| PipelineError::malformed(source_name, line_no, e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .map_err(|e| PipelineError::malformed(source_name, line_no, e.to_string()))?;
        records.push((line_no, record));
    }
    Ok(records)
}

/// Write rows as JSONL via temp file + rename, so readers never see a
/// truncated file.
pub fn write_records<T: Serialize>(path: &Path, rows: &[T]) -> PipelineResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path).map_err(|e| PipelineError::io(&temp_path, e))?;
    let mut writer = BufWriter::new(file);
    write_records_to(&mut writer, rows)?;
    writer.flush().map_err(|e| PipelineError::io(&temp_path, e))?;
    drop(writer);

    std::fs::rename(&temp_path, path).map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

pub fn write_records_to<T: Serialize, W: Write>(writer: &mut W, rows: &[T]) -> PipelineResult<()> {
    for row in rows {
        serde_json::to_writer(&mut *writer, row)?;
        writer
            .write_all(b"\n")
            .map_err(|e| PipelineError::io("<output>", e))?;
    }
    Ok(())
}
