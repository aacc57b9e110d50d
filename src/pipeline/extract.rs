//! Archive extraction into the destination directory

use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

use crate::error::{DeployError, Result};

/// Reproduce the archive's tree under `destination`, in archive order.
///
/// The destination and any missing parents are created first, even for an
/// empty archive. Directories are created as needed and existing content is kept. Files
/// overwrite whatever is at the same relative path. The first failure aborts
/// extraction and leaves already written files in place.
/// Returns the number of entries written.
pub fn extract_archive<R: Read + Seek>(reader: R, destination: &Path) -> Result<usize> {
    let mut archive = ZipArchive::new(reader)?;
    create_dir_all(destination)?;
    let mut written = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = sanitize_entry_path(entry.name())?;
        let target = destination.join(&relative);

        if entry.is_dir() {
            create_dir_all(&target)?;
            written += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            create_dir_all(parent)?;
        }

        let mut out = File::create(&target).map_err(|e| at(&target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| at(&target, e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let mode = mode & 0o777;
            if mode != 0 {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                    .map_err(|e| at(&target, e))?;
            }
        }

        debug!("Extracted {}", target.display());
        written += 1;
    }

    Ok(written)
}

/// Turn a stored entry name into a path relative to the destination.
/// Parent-directory, root and drive components are refused.
fn sanitize_entry_path(name: &str) -> Result<PathBuf> {
    if name.contains('\0') {
        return Err(DeployError::UnsafeEntry(name.to_string()));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(DeployError::UnsafeEntry(name.to_string()));
            }
        }
    }
    Ok(relative)
}

fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| at(path, e))
}

fn at(path: &Path, source: io::Error) -> DeployError {
    DeployError::ExtractionFailed {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;
    use zip::ZipWriter;

    /// Builds a zip in memory. Names ending in '/' become directories.
    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().unix_permissions(0o644);
        for (name, contents) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(contents).unwrap();
            }
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn round_trip_reproduces_tree() {
        let archive = build_zip(&[
            ("public/", b""),
            ("public/assets/", b""),
            ("public/index.html", b"<h1>hi</h1>"),
            ("public/assets/app.js", b"console.log(1);"),
        ]);
        let dest = tempfile::tempdir().unwrap();

        let written = extract_archive(Cursor::new(archive), dest.path()).unwrap();

        assert_eq!(written, 4);
        assert_eq!(
            fs::read(dest.path().join("public/index.html")).unwrap(),
            b"<h1>hi</h1>"
        );
        assert_eq!(
            fs::read(dest.path().join("public/assets/app.js")).unwrap(),
            b"console.log(1);"
        );
    }

    #[test]
    fn files_without_directory_entries_get_parents() {
        let archive = build_zip(&[("a/b/c.txt", b"deep")]);
        let dest = tempfile::tempdir().unwrap();

        extract_archive(Cursor::new(archive), dest.path()).unwrap();

        assert_eq!(fs::read(dest.path().join("a/b/c.txt")).unwrap(), b"deep");
    }

    #[test]
    fn empty_archive_creates_missing_destination() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("srv/site");

        let written = extract_archive(Cursor::new(build_zip(&[])), &dest).unwrap();

        assert_eq!(written, 0);
        assert!(dest.is_dir());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn overwrites_files_and_keeps_existing_content() {
        let dest = tempfile::tempdir().unwrap();
        fs::write(dest.path().join("index.html"), b"old version, much longer").unwrap();
        fs::write(dest.path().join("keep.txt"), b"untouched").unwrap();

        let archive = build_zip(&[("index.html", b"new")]);
        extract_archive(Cursor::new(archive), dest.path()).unwrap();

        assert_eq!(fs::read(dest.path().join("index.html")).unwrap(), b"new");
        assert_eq!(fs::read(dest.path().join("keep.txt")).unwrap(), b"untouched");
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("dest");
        fs::create_dir(&dest).unwrap();

        let archive = build_zip(&[("../escaped.txt", b"pwned")]);
        let result = extract_archive(Cursor::new(archive), &dest);

        assert!(matches!(result, Err(DeployError::UnsafeEntry(_))));
        assert!(!root.path().join("escaped.txt").exists());
    }

    #[test]
    fn nested_traversal_is_rejected() {
        let archive = build_zip(&[("site/../../escaped.txt", b"pwned")]);
        let dest = tempfile::tempdir().unwrap();

        let result = extract_archive(Cursor::new(archive), dest.path());
        assert!(matches!(result, Err(DeployError::UnsafeEntry(_))));
    }

    #[test]
    fn sanitize_refuses_absolute_paths() {
        assert!(sanitize_entry_path("/etc/passwd").is_err());
        assert!(sanitize_entry_path("a/../b").is_err());
        assert_eq!(
            sanitize_entry_path("./a/./b.txt").unwrap(),
            PathBuf::from("a/b.txt")
        );
    }

    #[test]
    fn corrupted_archive_fails() {
        let dest = tempfile::tempdir().unwrap();
        let result = extract_archive(Cursor::new(b"definitely not a zip".to_vec()), dest.path());

        assert!(matches!(result, Err(DeployError::ArchiveError(_))));
        assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
    }

    #[test]
    fn failure_keeps_earlier_files() {
        let dest = tempfile::tempdir().unwrap();
        // a file where the next entry needs a directory
        let archive = build_zip(&[("first.txt", b"1"), ("first.txt/second.txt", b"2")]);

        let result = extract_archive(Cursor::new(archive), dest.path());

        assert!(matches!(result, Err(DeployError::ExtractionFailed { .. })));
        assert_eq!(fs::read(dest.path().join("first.txt")).unwrap(), b"1");
    }

    #[cfg(unix)]
    #[test]
    fn applies_unix_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(
            "run.sh",
            FileOptions::default().unix_permissions(0o755),
        )
        .unwrap();
        zip.write_all(b"#!/bin/sh\n").unwrap();
        let archive = zip.finish().unwrap().into_inner();

        let dest = tempfile::tempdir().unwrap();
        extract_archive(Cursor::new(archive), dest.path()).unwrap();

        let mode = fs::metadata(dest.path().join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
