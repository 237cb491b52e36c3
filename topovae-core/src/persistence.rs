//! Shared persistence utilities — atomic file writes, JSON load/save, CSV tables.
//!
//! Every artifact a run leaves behind goes through the atomic write pattern
//! (write to a `.tmp` sibling, then rename) so a crash mid-sweep never leaves a
//! partial JSON or CSV on disk.

use std::io;
use std::path::Path;

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes to a `.tmp` sibling file,
/// then atomically renames to the target path.
///
/// Creates parent directories if they don't exist.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to a file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Atomically write a numeric table as CSV.
///
/// `columns` pairs a header with its values; all columns must have equal length.
pub fn atomic_write_csv(path: &Path, columns: &[(&str, &[f64])]) -> io::Result<()> {
    let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
    for (name, values) in columns {
        if values.len() != n_rows {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("column {name} has {} rows, expected {n_rows}", values.len()),
            ));
        }
    }

    let mut out = String::new();
    let headers: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    out.push_str(&headers.join(","));
    out.push('\n');
    for row in 0..n_rows {
        for (i, (_, values)) in columns.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!("{:.10}", values[row]));
        }
        out.push('\n');
    }
    atomic_write(path, out.as_bytes())
}
