use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::domain::is_image_name;
use crate::error::RepackError;

/// Result of packing one workspace. An empty workspace is a value, not an
/// error; the coordinator decides what zero output means for the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackOutcome {
    Packed { entries: usize },
    NoContent,
}

/// Collects image files from an extraction workspace and writes them into a
/// new deflate-compressed canonical container. Entry names are relative to
/// the workspace root and sorted ascending, because downstream readers
/// interpret entry order as page order.
pub fn pack_container(workspace: &Path, target: &Path) -> Result<PackOutcome, RepackError> {
    let mut images = collect_images(workspace)?;
    if images.is_empty() {
        return Ok(PackOutcome::NoContent);
    }
    images.sort();

    let file =
        fs::File::create(target).map_err(|err| RepackError::Filesystem(err.to_string()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for relative in &images {
        let entry_name = relative.to_string_lossy().replace('\\', "/");
        writer
            .start_file(entry_name, options)
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        let mut source = fs::File::open(workspace.join(relative))
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        io::copy(&mut source, &mut writer)
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
    }

    writer
        .finish()
        .map_err(|err| RepackError::Filesystem(err.to_string()))?;
    Ok(PackOutcome::Packed {
        entries: images.len(),
    })
}

/// Workspace-relative paths of all image-typed files, unordered.
fn collect_images(root: &Path) -> Result<Vec<PathBuf>, RepackError> {
    let mut images = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries =
            fs::read_dir(&dir).map_err(|err| RepackError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| RepackError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let is_image = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(is_image_name)
                .unwrap_or(false);
            if is_image {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|err| RepackError::Filesystem(err.to_string()))?;
                images.push(relative.to_path_buf());
            }
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_names(path: &Path) -> Vec<String> {
        let file = fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn packs_images_in_ascending_name_order() {
        let temp = tempfile::tempdir().unwrap();
        let workspace = temp.path().join("ws");
        fs::create_dir_all(workspace.join("pages")).unwrap();
        fs::write(workspace.join("pages/003.jpg"), b"c").unwrap();
        fs::write(workspace.join("pages/001.jpg"), b"a").unwrap();
        fs::write(workspace.join("pages/002.PNG"), b"b").unwrap();
        fs::write(workspace.join("pages/notes.txt"), b"skip").unwrap();

        let target = temp.path().join("out.cbz");
        let outcome = pack_container(&workspace, &target).unwrap();
        assert_eq!(outcome, PackOutcome::Packed { entries: 3 });

        let names = entry_names(&target);
        assert_eq!(names, vec!["pages/001.jpg", "pages/002.PNG", "pages/003.jpg"]);
    }

    #[test]
    fn empty_workspace_yields_no_content_and_no_container() {
        let temp = tempfile::tempdir().unwrap();
        let workspace = temp.path().join("ws");
        fs::create_dir_all(&workspace).unwrap();
        fs::write(workspace.join("info.nfo"), b"x").unwrap();

        let target = temp.path().join("out.cbz");
        let outcome = pack_container(&workspace, &target).unwrap();
        assert_eq!(outcome, PackOutcome::NoContent);
        assert!(!target.exists());
    }
}
