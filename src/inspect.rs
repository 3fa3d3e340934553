use std::path::Path;

use serde::Serialize;

use crate::archive::SourceArchive;
use crate::domain::ArchiveMember;
use crate::error::RepackError;

/// Classification of one source archive: flat or nested, plus the ordered
/// names of its inner archive members.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub is_nested: bool,
    pub inner_archives: Vec<String>,
    pub members: Vec<ArchiveMember>,
}

/// Serializable per-archive structure report, for the `inspect` command.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub path: String,
    pub is_nested: bool,
    pub member_count: usize,
    pub inner_archive_count: usize,
    pub inner_archives: Vec<String>,
    pub total_uncompressed_size: u64,
    pub error: Option<String>,
}

/// Opens a source archive and classifies it by scanning member names for
/// archive-typed extensions.
pub fn inspect(path: &Path) -> Result<Inspection, RepackError> {
    let archive = SourceArchive::open(path)?;
    let members = archive.list_members()?;

    let inner_archives: Vec<String> = members
        .iter()
        .filter(|member| member.is_nested_archive)
        .map(|member| member.name.clone())
        .collect();

    Ok(Inspection {
        is_nested: !inner_archives.is_empty(),
        inner_archives,
        members,
    })
}

/// Inspection that never fails: open errors are folded into the report so a
/// directory scan can keep going past corrupt files.
pub fn inspect_report(path: &Path) -> InspectionReport {
    match inspect(path) {
        Ok(inspection) => InspectionReport {
            path: path.display().to_string(),
            is_nested: inspection.is_nested,
            member_count: inspection.members.len(),
            inner_archive_count: inspection.inner_archives.len(),
            inner_archives: inspection.inner_archives,
            total_uncompressed_size: inspection
                .members
                .iter()
                .map(|member| member.uncompressed_size)
                .sum(),
            error: None,
        },
        Err(err) => InspectionReport {
            path: path.display().to_string(),
            is_nested: false,
            member_count: 0,
            inner_archive_count: 0,
            inner_archives: Vec::new(),
            total_uncompressed_size: 0,
            error: Some(err.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_zip(path: &Path, names: &[&str]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for name in names {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"x").unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn flat_archive_is_not_nested() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("flat.zip");
        write_zip(&path, &["001.jpg", "002.jpg"]);

        let inspection = inspect(&path).unwrap();
        assert!(!inspection.is_nested);
        assert!(inspection.inner_archives.is_empty());
        assert_eq!(inspection.members.len(), 2);
    }

    #[test]
    fn archive_members_make_it_nested() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("outer.zip");
        write_zip(&path, &["inner_01.rar", "inner_02.rar", "cover.jpg"]);

        let inspection = inspect(&path).unwrap();
        assert!(inspection.is_nested);
        assert_eq!(
            inspection.inner_archives,
            vec!["inner_01.rar", "inner_02.rar"]
        );
    }

    #[test]
    fn corrupt_archive_reports_error_without_panicking() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("bad.cbz");
        fs::write(&path, b"definitely not a zip").unwrap();

        let report = inspect_report(&path);
        assert!(report.error.is_some());
        assert_eq!(report.member_count, 0);
    }
}
