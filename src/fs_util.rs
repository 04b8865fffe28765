use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::domain::ArchiveKind;
use crate::error::AssetError;

pub fn sniff_archive(path: &Path) -> Result<ArchiveKind, AssetError> {
    let mut file = fs::File::open(path)
        .map_err(|err| AssetError::Extraction(format!("open {}: {err}", path.display())))?;
    let mut header = [0u8; 4];
    let read = file
        .read(&mut header)
        .map_err(|err| AssetError::Extraction(err.to_string()))?;
    ArchiveKind::sniff(&header[..read]).ok_or_else(|| {
        AssetError::Extraction(format!("unrecognized archive format: {}", path.display()))
    })
}

pub fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<ArchiveKind, AssetError> {
    let kind = sniff_archive(archive_path)?;
    fs::create_dir_all(target_dir).map_err(|err| AssetError::Filesystem(err.to_string()))?;
    match kind {
        ArchiveKind::Zip => extract_zip(archive_path, target_dir)?,
        ArchiveKind::TarGz => extract_tar_gz(archive_path, target_dir)?,
    }
    Ok(kind)
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), AssetError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        AssetError::Extraction(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| AssetError::Extraction(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| AssetError::Extraction(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(AssetError::Extraction(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| AssetError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| AssetError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| AssetError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| AssetError::Extraction(err.to_string()))?;
        apply_mode(&entry_path, entry.unix_mode())?;
    }
    Ok(())
}

pub fn extract_tar_gz(tar_path: &Path, target_dir: &Path) -> Result<(), AssetError> {
    let file = fs::File::open(tar_path).map_err(|err| {
        AssetError::Extraction(format!("open tarball {}: {err}", tar_path.display()))
    })?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(target_dir)
        .map_err(|err| AssetError::Extraction(format!("{}: {err}", tar_path.display())))
}

pub fn first_file(dir: &Path) -> Result<Option<PathBuf>, AssetError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|err| AssetError::Filesystem(err.to_string()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| AssetError::Filesystem(err.to_string()))?;
    entries.sort();

    if let Some(file) = entries.iter().find(|path| path.is_file()) {
        return Ok(Some(file.clone()));
    }
    for sub in entries.iter().filter(|path| path.is_dir()) {
        if let Some(file) = first_file(sub)? {
            return Ok(Some(file));
        }
    }
    Ok(None)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<(), AssetError> {
    use std::os::unix::fs::PermissionsExt;

    match mode {
        Some(mode) if mode & 0o777 != 0 => fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
            .map_err(|err| AssetError::Filesystem(err.to_string())),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<(), AssetError> {
    Ok(())
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<(), AssetError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|err| AssetError::Filesystem(err.to_string()))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions).map_err(|err| AssetError::Filesystem(err.to_string()))
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<(), AssetError> {
    Ok(())
}
