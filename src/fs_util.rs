use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::error::KiraError;

/// Resolves `member` under `target_dir`, refusing anything that would land outside it.
pub fn contained_path(target_dir: &Path, member: &Path) -> Result<PathBuf, KiraError> {
    let mut resolved = PathBuf::new();
    for component in member.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(KiraError::PathTraversal(member.display().to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(KiraError::PathTraversal(member.display().to_string()));
            }
        }
    }
    Ok(target_dir.join(resolved))
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| KiraError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| KiraError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        if entry.enclosed_name().is_none() {
            return Err(KiraError::PathTraversal(entry.name().to_string()));
        }
    }

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => return Err(KiraError::PathTraversal(entry.name().to_string())),
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Extracts a (optionally gzipped) tar archive. Every member path is checked before
/// anything is written, so a hostile archive leaves the target untouched.
pub fn extract_tar(tar_path: &Path, target_dir: &Path, gzipped: bool) -> Result<(), KiraError> {
    for_each_tar_entry(tar_path, gzipped, |entry| {
        let member = entry
            .path()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?
            .into_owned();
        contained_path(target_dir, &member).map(|_| ())
    })?;

    fs::create_dir_all(target_dir).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    for_each_tar_entry(tar_path, gzipped, |entry| {
        let member = entry
            .path()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?
            .into_owned();
        let destination = contained_path(target_dir, &member)?;
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            return fs::create_dir_all(&destination)
                .map_err(|err| KiraError::Filesystem(err.to_string()));
        }
        if !kind.is_file() {
            return Ok(());
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&destination)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        io::copy(entry, &mut outfile).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    })
}

fn for_each_tar_entry<F>(tar_path: &Path, gzipped: bool, mut visit: F) -> Result<(), KiraError>
where
    F: FnMut(&mut tar::Entry<'_, Box<dyn io::Read>>) -> Result<(), KiraError>,
{
    let file = fs::File::open(tar_path)
        .map_err(|err| KiraError::Filesystem(format!("open tar {}: {err}", tar_path.display())))?;
    let reader: Box<dyn io::Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        visit(&mut entry)?;
    }
    Ok(())
}

pub fn gunzip_file(source: &Path, destination: &Path) -> Result<(), KiraError> {
    let input = fs::File::open(source)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", source.display())))?;
    let mut decoder = GzDecoder::new(input);
    let mut output =
        fs::File::create(destination).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    io::copy(&mut decoder, &mut output).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Decompresses `path` in place when it ends in `.gz`; returns the resulting path.
pub fn gunzip_in_place(path: &Path) -> Result<PathBuf, KiraError> {
    let is_gz = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if !is_gz {
        return Ok(path.to_path_buf());
    }
    let target = path.with_extension("");
    gunzip_file(path, &target)?;
    fs::remove_file(path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(target)
}

/// Keeps only files carrying `marker` in their name (e.g. `.idat`), gunzipping
/// compressed ones. Everything else under `root` is deleted. Returns the kept files.
pub fn retain_marked_files(root: &Path, marker: &str) -> Result<Vec<PathBuf>, KiraError> {
    let mut kept = Vec::new();
    for path in walk_files(root)? {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.contains(marker) {
            kept.push(gunzip_in_place(&path)?);
        } else {
            fs::remove_file(&path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
    }
    kept.sort();
    Ok(kept)
}

pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, KiraError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn contained_path_rejects_escapes() {
        let root = Path::new("/work");
        assert_eq!(
            contained_path(root, Path::new("a/./b.idat")).unwrap(),
            PathBuf::from("/work/a/b.idat")
        );
        assert_eq!(
            contained_path(root, Path::new("a/../b.idat")).unwrap(),
            PathBuf::from("/work/b.idat")
        );
        assert_matches!(
            contained_path(root, Path::new("../evil")),
            Err(KiraError::PathTraversal(_))
        );
        assert_matches!(
            contained_path(root, Path::new("/etc/passwd")),
            Err(KiraError::PathTraversal(_))
        );
    }

    #[test]
    fn retain_marked_files_drops_others_and_gunzips() {
        use std::io::Write;

        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("readme.txt"), b"x").unwrap();
        let gz_path = temp.path().join("GSM1_Grn.idat.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            fs::File::create(&gz_path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(b"idat").unwrap();
        encoder.finish().unwrap();

        let kept = retain_marked_files(temp.path(), ".idat").unwrap();
        assert_eq!(kept, vec![temp.path().join("GSM1_Grn.idat")]);
        assert!(!temp.path().join("readme.txt").exists());
        assert_eq!(fs::read(&kept[0]).unwrap(), b"idat");
    }
}
