use std::fs;
use std::io::{self, Write};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

use crate::error::AssetError;

pub const ASSETS_FILE: &str = "assets.zip";
pub const WIKI_PRICES_CSV: &str = "wiki_prices.csv";
pub const WIKI_STOCKS_CSV: &str = "wiki_stocks.csv";
pub const DRIVER_DIR: &str = "driver";
pub const LOCK_FILE: &str = ".assemble.lock";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: Utf8PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn assets_path(&self) -> Utf8PathBuf {
        self.root.join(ASSETS_FILE)
    }

    pub fn wiki_prices_path(&self) -> Utf8PathBuf {
        self.root.join(WIKI_PRICES_CSV)
    }

    pub fn wiki_stocks_path(&self) -> Utf8PathBuf {
        self.root.join(WIKI_STOCKS_CSV)
    }

    pub fn driver_dir(&self) -> Utf8PathBuf {
        self.root.join(DRIVER_DIR)
    }

    pub fn driver_path(&self) -> Utf8PathBuf {
        let name = if cfg!(windows) {
            "geckodriver.exe"
        } else {
            "geckodriver"
        };
        self.driver_dir().join(name)
    }

    pub fn lock_path(&self) -> Utf8PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn download_path(&self, file_name: &str) -> Utf8PathBuf {
        self.root.join(file_name)
    }

    pub fn ensure_root(&self) -> Result<(), AssetError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| AssetError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    pub fn lock(&self) -> Result<AssemblyLock, AssetError> {
        self.ensure_root()?;
        AssemblyLock::acquire(self.lock_path())
    }

    /// Creates an empty temporary file next to `path`, so a later rename stays
    /// on the same filesystem.
    pub fn temp_sibling(path: &Utf8Path) -> Result<NamedTempFile, AssetError> {
        let parent = path
            .parent()
            .ok_or_else(|| AssetError::Filesystem(format!("invalid destination path: {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| AssetError::Filesystem(err.to_string()))?;
        let prefix = format!(".{}", path.file_name().unwrap_or("download"));
        Builder::new()
            .prefix(&prefix)
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| AssetError::Filesystem(err.to_string()))
    }

    pub fn persist(temp: NamedTempFile, path: &Utf8Path) -> Result<(), AssetError> {
        temp.as_file()
            .sync_all()
            .map_err(|err| AssetError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| AssetError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn remove_file_if_exists(path: &Path) -> Result<(), AssetError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AssetError::Filesystem(format!(
                "remove {}: {err}",
                path.display()
            ))),
        }
    }

    pub fn remove_dir_if_exists(path: &Path) -> Result<(), AssetError> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AssetError::Filesystem(format!(
                "remove {}: {err}",
                path.display()
            ))),
        }
    }
}

#[derive(Debug)]
pub struct AssemblyLock {
    path: Utf8PathBuf,
}

impl AssemblyLock {
    fn acquire(path: Utf8PathBuf) -> Result<Self, AssetError> {
        if let Some(file) = Self::create(&path)? {
            return Ok(Self::hold(file, path));
        }

        if let Some(pid) = recorded_pid(&path).filter(|pid| !process_alive(*pid)) {
            warn!(%path, pid, "reclaiming assembly lock left by an exited process");
            DataDir::remove_file_if_exists(path.as_std_path())?;
            if let Some(file) = Self::create(&path)? {
                return Ok(Self::hold(file, path));
            }
        }

        let holder = match recorded_pid(&path) {
            Some(pid) => format!("pid {pid}"),
            None => "an unknown process".to_string(),
        };
        Err(AssetError::Locked {
            path: path.to_string(),
            holder,
        })
    }

    fn create(path: &Utf8Path) -> Result<Option<fs::File>, AssetError> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_std_path())
        {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(AssetError::Filesystem(err.to_string())),
        }
    }

    fn hold(mut file: fs::File, path: Utf8PathBuf) -> Self {
        let _ = writeln!(file, "{}", std::process::id());
        debug!(path = %path, "acquired assembly lock");
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

fn recorded_pid(path: &Utf8Path) -> Option<u32> {
    fs::read_to_string(path.as_std_path())
        .ok()
        .and_then(|content| content.trim().parse().ok())
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a portable liveness check the holder is assumed to be running.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for AssemblyLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            warn!(path = %self.path, "failed to release assembly lock: {err}");
        }
    }
}
