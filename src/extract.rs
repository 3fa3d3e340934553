use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::archive::SourceArchive;
use crate::domain::is_archive_name;
use crate::error::RepackError;

/// An exclusively-owned extraction directory scoped to one unit of work.
/// Removal on every exit path (success, failure, panic) comes from the
/// `TempDir` drop; nothing else may hold the directory open.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Creates isolated workspaces under a fixed temp root and extracts source
/// archives into them.
pub struct ArchiveExtractor {
    temp_root: PathBuf,
}

impl ArchiveExtractor {
    pub fn new(temp_root: PathBuf) -> Result<Self, RepackError> {
        fs::create_dir_all(&temp_root).map_err(|err| RepackError::Filesystem(err.to_string()))?;
        Ok(Self { temp_root })
    }

    /// Extracts a flat archive into a fresh workspace.
    pub fn extract_flat(&self, archive_path: &Path) -> Result<Workspace, RepackError> {
        self.extract_with_prefix(archive_path, "repack-flat")
    }

    /// Extracts only the outer container of a nested archive. The caller
    /// keeps this workspace alive while inner archives are processed.
    pub fn extract_outer(&self, archive_path: &Path) -> Result<Workspace, RepackError> {
        self.extract_with_prefix(archive_path, "repack-outer")
    }

    /// Extracts one inner archive into its own workspace. Dropped by the
    /// caller as soon as its container has been packed, bounding peak
    /// scratch usage to one inner expansion plus the outer expansion.
    pub fn extract_inner(&self, inner_archive_path: &Path) -> Result<Workspace, RepackError> {
        self.extract_with_prefix(inner_archive_path, "repack-inner")
    }

    fn extract_with_prefix(&self, archive_path: &Path, prefix: &str) -> Result<Workspace, RepackError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.temp_root)
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;

        let archive = SourceArchive::open(archive_path)?;
        archive.extract_to(dir.path())?;
        Ok(Workspace { dir })
    }
}

/// Finds archive-typed files under an extracted outer workspace, in sorted
/// order so inner volumes are processed deterministically.
pub fn find_inner_archives(root: &Path) -> Result<Vec<PathBuf>, RepackError> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries =
            fs::read_dir(&dir).map_err(|err| RepackError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| RepackError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .and_then(|name| name.to_str())
                .map(is_archive_name)
                .unwrap_or(false)
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
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
    fn workspace_removed_on_drop() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("flat.zip");
        write_zip(&source, &["p1.jpg"]);

        let extractor = ArchiveExtractor::new(temp.path().join("scratch")).unwrap();
        let workspace_path;
        {
            let workspace = extractor.extract_flat(&source).unwrap();
            workspace_path = workspace.path().to_path_buf();
            assert!(workspace_path.join("p1.jpg").is_file());
        }
        assert!(!workspace_path.exists());
    }

    #[test]
    fn inner_archives_found_in_sorted_order() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("outer");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("b_02.rar"), b"").unwrap();
        fs::write(root.join("sub/a_01.cbr"), b"").unwrap();
        fs::write(root.join("readme.txt"), b"").unwrap();

        let inner = find_inner_archives(&root).unwrap();
        let names: Vec<_> = inner
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(inner.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(names.contains(&"b_02.rar"));
        assert!(names.contains(&"a_01.cbr"));
    }

    #[test]
    fn corrupt_source_fails_but_leaves_no_workspace() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("broken.zip");
        fs::write(&source, b"garbage").unwrap();

        let scratch = temp.path().join("scratch");
        let extractor = ArchiveExtractor::new(scratch.clone()).unwrap();
        assert!(extractor.extract_flat(&source).is_err());

        let leftovers: Vec<_> = fs::read_dir(&scratch).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
