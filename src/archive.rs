use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use unrar::Archive;
use zip::ZipArchive;

use crate::domain::{ArchiveMember, SourceFormat};
use crate::error::RepackError;

/// A source archive opened for listing or extraction, dispatched by
/// extension. Zip/cbz goes through the `zip` crate, rar/cbr through the
/// bundled unrar bindings.
#[derive(Debug)]
pub enum SourceArchive {
    Zip(PathBuf),
    Rar(PathBuf),
}

impl SourceArchive {
    pub fn open(path: &Path) -> Result<Self, RepackError> {
        match SourceFormat::from_path(path) {
            Some(SourceFormat::Zip) => Ok(SourceArchive::Zip(path.to_path_buf())),
            Some(SourceFormat::Rar) => Ok(SourceArchive::Rar(path.to_path_buf())),
            None => Err(RepackError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Enumerates non-directory members. Fails with `ArchiveOpen` when the
    /// container cannot be read (corrupt header, unsupported format).
    pub fn list_members(&self) -> Result<Vec<ArchiveMember>, RepackError> {
        match self {
            SourceArchive::Zip(path) => list_zip_members(path),
            SourceArchive::Rar(path) => list_rar_members(path),
        }
    }

    /// Extracts all members into `target_dir`, preserving relative paths.
    pub fn extract_to(&self, target_dir: &Path) -> Result<(), RepackError> {
        match self {
            SourceArchive::Zip(path) => extract_zip(path, target_dir),
            SourceArchive::Rar(path) => extract_rar(path, target_dir),
        }
    }
}

fn open_error(path: &Path, err: impl ToString) -> RepackError {
    RepackError::ArchiveOpen {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn list_zip_members(path: &Path) -> Result<Vec<ArchiveMember>, RepackError> {
    let file = fs::File::open(path).map_err(|err| open_error(path, err))?;
    let mut archive = ZipArchive::new(file).map_err(|err| open_error(path, err))?;

    let mut members = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|err| open_error(path, err))?;
        if entry.is_dir() {
            continue;
        }
        members.push(ArchiveMember::new(
            entry.name().to_string(),
            entry.size(),
            Some(entry.compressed_size()),
        ));
    }
    Ok(members)
}

fn list_rar_members(path: &Path) -> Result<Vec<ArchiveMember>, RepackError> {
    let archive = Archive::new(path)
        .open_for_listing()
        .map_err(|err| open_error(path, err))?;

    let mut members = Vec::new();
    for entry in archive {
        let entry = entry.map_err(|err| open_error(path, err))?;
        if entry.is_directory() {
            continue;
        }
        let name = entry.filename.to_string_lossy().replace('\\', "/");
        members.push(ArchiveMember::new(name, entry.unpacked_size as u64, None));
    }
    Ok(members)
}

/// Zip extraction with the path-traversal guard on every entry name.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), RepackError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        RepackError::Extraction(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive = ZipArchive::new(file).map_err(|err| open_error(zip_path, err))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| RepackError::Extraction(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(RepackError::Extraction(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| RepackError::Extraction(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| RepackError::Extraction(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| RepackError::Extraction(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| RepackError::Extraction(err.to_string()))?;
    }
    Ok(())
}

fn extract_rar(rar_path: &Path, target_dir: &Path) -> Result<(), RepackError> {
    let mut archive = Archive::new(rar_path)
        .open_for_processing()
        .map_err(|err| open_error(rar_path, err))?;

    loop {
        let Some(header) = archive
            .read_header()
            .map_err(|err| RepackError::Extraction(err.to_string()))?
        else {
            break;
        };
        archive = if header.entry().is_file() {
            header
                .extract_with_base(target_dir)
                .map_err(|err| RepackError::Extraction(err.to_string()))?
        } else {
            header
                .skip()
                .map_err(|err| RepackError::Extraction(err.to_string()))?
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_test_zip(path: &Path, names: &[&str]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for name in names {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"data").unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn lists_zip_members_with_sizes() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("source.zip");
        write_test_zip(&path, &["001.jpg", "inner.rar"]);

        let members = SourceArchive::open(&path).unwrap().list_members().unwrap();
        assert_eq!(members.len(), 2);
        assert!(!members[0].is_nested_archive);
        assert!(members[1].is_nested_archive);
        assert_eq!(members[0].uncompressed_size, 4);
        assert!(members[0].compressed_size.is_some());
    }

    #[test]
    fn open_rejects_unknown_extension() {
        let err = SourceArchive::open(Path::new("book.7z")).unwrap_err();
        assert_matches!(err, RepackError::UnsupportedFormat(_));
    }

    #[test]
    fn corrupt_zip_is_an_open_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.zip");
        fs::write(&path, b"not a zip at all").unwrap();

        let err = SourceArchive::open(&path).unwrap().list_members().unwrap_err();
        assert_matches!(err, RepackError::ArchiveOpen { .. });
    }

    #[test]
    fn extracts_zip_into_target() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("source.zip");
        write_test_zip(&path, &["a/001.jpg", "a/002.jpg"]);

        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        SourceArchive::open(&path).unwrap().extract_to(&out).unwrap();

        assert!(out.join("a/001.jpg").is_file());
        assert!(out.join("a/002.jpg").is_file());
    }
}
