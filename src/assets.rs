use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use polars::prelude::{DataFrame, ParquetReader, ParquetWriter, PolarsError, SerReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::domain::TableKey;
use crate::error::AssetError;
use crate::normalize::NormalizedTable;
use crate::store::DataDir;

pub const MANIFEST_MEMBER: &str = "manifest.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub created_at: String,
    pub tool: String,
    pub tables: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: TableKey,
    pub member: String,
    pub index: Vec<String>,
    pub columns: Vec<String>,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct AssetStore {
    path: Utf8PathBuf,
    manifest: Manifest,
}

impl AssetStore {
    pub fn create(path: &Utf8Path, tables: &[NormalizedTable]) -> Result<Self, AssetError> {
        if path.as_std_path().exists() {
            return Err(AssetError::Store(format!("{path} already exists")));
        }

        let mut seen = HashSet::new();
        for table in tables {
            if !seen.insert(table.key) {
                return Err(AssetError::Store(format!("duplicate table key {}", table.key)));
            }
        }

        let mut temp = DataDir::temp_sibling(path)?;
        let mut entries = Vec::with_capacity(tables.len());
        {
            let mut writer = ZipWriter::new(temp.as_file_mut());
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

            for table in tables {
                let member = table.key.member_name();
                let bytes = encode_parquet(&table.frame)
                    .map_err(|err| AssetError::Store(format!("{}: {err}", table.key)))?;
                writer
                    .start_file(member.as_str(), options)
                    .map_err(|err| AssetError::Store(err.to_string()))?;
                writer
                    .write_all(&bytes)
                    .map_err(|err| AssetError::Store(err.to_string()))?;
                debug!(key = %table.key, rows = table.height(), bytes = bytes.len(), "encoded table");

                entries.push(ManifestEntry {
                    key: table.key,
                    member,
                    index: table.index.clone(),
                    columns: table.column_names(),
                    rows: table.height(),
                });
            }

            let manifest = Manifest {
                format_version: FORMAT_VERSION,
                created_at: chrono::Utc::now().to_rfc3339(),
                tool: format!("market-assets/{}", env!("CARGO_PKG_VERSION")),
                tables: entries.clone(),
            };
            let manifest_bytes = serde_json::to_vec_pretty(&manifest)
                .map_err(|err| AssetError::Store(err.to_string()))?;
            writer
                .start_file(MANIFEST_MEMBER, options)
                .map_err(|err| AssetError::Store(err.to_string()))?;
            writer
                .write_all(&manifest_bytes)
                .map_err(|err| AssetError::Store(err.to_string()))?;
            writer
                .finish()
                .map_err(|err| AssetError::Store(err.to_string()))?;
        }

        temp.as_file()
            .sync_all()
            .map_err(|err| AssetError::Filesystem(err.to_string()))?;
        temp.persist_noclobber(path.as_std_path())
            .map_err(|err| AssetError::Store(format!("persist {path}: {err}")))?;
        info!(%path, tables = entries.len(), "asset store written");

        Self::open(path)
    }

    pub fn open(path: &Utf8Path) -> Result<Self, AssetError> {
        let mut archive = open_archive(path)?;
        let mut member = archive
            .by_name(MANIFEST_MEMBER)
            .map_err(|err| AssetError::Store(format!("{path}: {MANIFEST_MEMBER}: {err}")))?;
        let mut content = String::new();
        member
            .read_to_string(&mut content)
            .map_err(|err| AssetError::Store(err.to_string()))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .map_err(|err| AssetError::Store(format!("invalid manifest: {err}")))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(AssetError::Store(format!(
                "unsupported store format version {}",
                manifest.format_version
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            manifest,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn keys(&self) -> Vec<TableKey> {
        self.manifest.tables.iter().map(|entry| entry.key).collect()
    }

    pub fn contains(&self, key: TableKey) -> bool {
        self.entry(key).is_some()
    }

    pub fn entry(&self, key: TableKey) -> Option<&ManifestEntry> {
        self.manifest.tables.iter().find(|entry| entry.key == key)
    }

    pub fn read(&self, key: TableKey) -> Result<DataFrame, AssetError> {
        let entry = self
            .entry(key)
            .ok_or_else(|| AssetError::Store(format!("table {key} not in store")))?;
        let mut archive = open_archive(&self.path)?;
        let mut member = archive
            .by_name(&entry.member)
            .map_err(|err| AssetError::Store(format!("{}: {err}", entry.member)))?;
        let mut bytes = Vec::new();
        member
            .read_to_end(&mut bytes)
            .map_err(|err| AssetError::Store(err.to_string()))?;
        ParquetReader::new(Cursor::new(bytes))
            .finish()
            .map_err(|err| AssetError::Store(format!("{key}: {err}")))
    }
}

fn open_archive(path: &Utf8Path) -> Result<ZipArchive<File>, AssetError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| AssetError::Store(format!("open {path}: {err}")))?;
    ZipArchive::new(file).map_err(|err| AssetError::Store(format!("{path}: {err}")))
}

fn encode_parquet(frame: &DataFrame) -> Result<Vec<u8>, PolarsError> {
    let mut buffer = Vec::new();
    ParquetWriter::new(&mut buffer).finish(&mut frame.clone())?;
    Ok(buffer)
}
