//! JSONL logs and crash-safe file replacement
//!
//! Dispatch logs and batch results are JSONL: one record per line, appended
//! whole. Readers tolerate a torn final line left by a crashed writer.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Append one record as a line, creating parent dirs.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> std::io::Result<()> {
    append_jsonl_all(path, std::slice::from_ref(record))
}

/// Append every record with a single open. Nothing is written if any record
/// fails to serialize.
pub fn append_jsonl_all<T: Serialize>(path: &Path, records: &[T]) -> std::io::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }

    ensure_parent(path)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&buf)?;
    Ok(())
}

/// Every well-formed record in the file, oldest first. A missing file reads
/// as empty.
pub fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> std::io::Result<Vec<T>> {
    read_jsonl_tail(path, usize::MAX)
}

/// The last `limit` well-formed records, oldest first, holding at most
/// `limit` in memory while scanning.
pub fn read_jsonl_tail<T: for<'de> Deserialize<'de>>(
    path: &Path,
    limit: usize,
) -> std::io::Result<Vec<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut tail: VecDeque<T> = VecDeque::new();
    let mut skipped = 0usize;
    let mut first_bad = None;

    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => {
                if tail.len() == limit {
                    tail.pop_front();
                }
                tail.push_back(record);
            }
            Err(_) => {
                skipped += 1;
                if first_bad.is_none() {
                    first_bad = Some(number + 1);
                }
            }
        }
    }

    if skipped > 0 {
        tracing::warn!(
            path = %path.display(),
            skipped,
            first_line = first_bad.unwrap_or_default(),
            "skipped malformed JSONL lines"
        );
    }
    Ok(Vec::from(tail))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Replace `path` with `data` via a synced sibling temp file and a rename,
/// so readers see either the old or the new content.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    ensure_parent(path)?;

    let temp_path = temp_sibling(path);
    let written = File::create(&temp_path).and_then(|file| {
        let mut writer = BufWriter::new(file);
        writer.write_all(data)?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()
    });
    let result = written.and_then(|()| std::fs::rename(&temp_path, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}
