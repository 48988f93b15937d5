use std::path::{Path, PathBuf};

use csv::StringRecord;

use crate::align::*;

/// Joins a path found in a configuration to the directory of that configuration.
pub fn resolve_path(root: &Path, file_path: &str) -> String {
    let p: PathBuf = [root, Path::new(file_path)].iter().collect();
    p.as_path().display().to_string()
}

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// A vote count. Spreadsheet exports sometimes write integers as `312.0`.
pub fn parse_count(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Ok(x) = s.parse::<u64>() {
        return Some(x);
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => Some(f as u64),
        _ => None,
    }
}

/// A registration count. Empty or unreadable cells are undefined.
pub fn parse_weight(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

pub fn find_column(header: &StringRecord, column: &str, path: &str) -> AlignResult<usize> {
    header
        .iter()
        .position(|h| h.trim() == column)
        .context(MissingColumnSnafu { column, path })
}
