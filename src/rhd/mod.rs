//! Intan RHD2000 amplifier files.

mod reader;
mod types;

pub use reader::{load_and_combine_files, load_file, load_header, verify_header_compatibility};
pub use types::*;

use std::path::{Path, PathBuf};

use crate::error::{require_dir, Result};

/// Every `.rhd` file in `dir`, sorted by name.
pub fn list_rhd_files(dir: &Path) -> Result<Vec<PathBuf>> {
    require_dir(dir)?;
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "rhd") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
