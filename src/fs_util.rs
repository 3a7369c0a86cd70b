use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use zip::ZipArchive;

use crate::error::KiraError;

/// Extracts the named entries of a zip archive into `target_dir`, failing if
/// any of them is absent.
pub fn extract_zip_entries(
    zip_path: &Path,
    target_dir: &Path,
    names: &[&str],
) -> Result<(), KiraError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| KiraError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| KiraError::Filesystem(err.to_string()))?;

    for name in names {
        let mut entry = archive
            .by_name(name)
            .map_err(|err| KiraError::Filesystem(format!("zip entry {name}: {err}")))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(KiraError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };
        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Line reader over a plain or gzip-compressed (`.gz`) text file.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>, KiraError> {
    let file = fs::File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);
    if is_gz {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Checks that a gzip file decodes to the end.
pub fn validate_gzip(path: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    io::copy(&mut MultiGzDecoder::new(file), &mut io::sink())
        .map_err(|err| KiraError::Filesystem(format!("corrupt gzip {}: {err}", path.display())))?;
    Ok(())
}
