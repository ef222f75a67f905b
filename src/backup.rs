//! Backup archives of the WireGuard profile, NextDNS config, logs,
//! security material and application config.
//!
//! An archive holds a single top-level directory named after the backup,
//! with one subdirectory per category and a `metadata.json` listing every
//! file relative to that directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::{self, BackupConfig, Config};
use crate::error::WarpError;
use crate::platform::Platform;

pub const BACKUP_PREFIX: &str = "warp_nextdns_backup_";
pub const METADATA_FILE: &str = "metadata.json";

const TAR_GZ_EXT: &str = ".tar.gz";
const ZIP_EXT: &str = ".zip";

/// Top-level directories inside an archive.
pub const CATEGORIES: [&str; 5] = ["wireguard", "nextdns", "logs", "security", "config"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupMetadata {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub include_logs: bool,
    #[serde(default)]
    pub include_security: bool,
    /// Paths relative to the archive's top-level directory
    pub files: Vec<String>,
}

/// Where each category is collected from.
#[derive(Debug, Clone)]
pub struct BackupSources {
    /// Every regular file in this directory
    pub wireguard_dir: PathBuf,
    pub nextdns_files: Vec<PathBuf>,
    /// `*.log` files in these directories
    pub log_dirs: Vec<PathBuf>,
    pub security_dir: PathBuf,
    pub config_files: Vec<PathBuf>,
}

impl BackupSources {
    pub fn from_config(config: &Config, config_path: &Path) -> Self {
        Self {
            wireguard_dir: config.wgcf.wireguard_dir.clone(),
            nextdns_files: vec![PathBuf::from("/etc/nextdns.conf")],
            log_dirs: vec![config.log_dir()],
            security_dir: config.security.dir.clone(),
            config_files: vec![
                config_path.to_path_buf(),
                config.wgcf.account_file(),
                config.wgcf.profile_file(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub description: String,
    /// `None` uses the configured default
    pub include_logs: Option<bool>,
    pub include_security: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Local>,
    pub metadata: Option<BackupMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub target: PathBuf,
    pub restored_files: Vec<String>,
    pub metadata: BackupMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub error: Option<String>,
    pub file_count: usize,
    pub metadata: Option<BackupMetadata>,
}

impl VerifyReport {
    fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            file_count: 0,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupStats {
    pub total_backups: usize,
    pub total_size: u64,
    pub average_size: u64,
    pub oldest: Option<DateTime<Local>>,
    pub newest: Option<DateTime<Local>>,
    pub backup_dir: PathBuf,
    pub max_backups: usize,
}

pub struct BackupManager {
    config: BackupConfig,
    sources: BackupSources,
}

impl BackupManager {
    pub fn new(config: BackupConfig, sources: BackupSources) -> Self {
        Self { config, sources }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.config.dir
    }

    /// Accept either a path to an archive or a bare archive name inside
    /// the backup directory.
    pub fn resolve(&self, archive: &str) -> PathBuf {
        let as_path = PathBuf::from(archive);
        if as_path.exists() || as_path.components().count() > 1 {
            as_path
        } else {
            self.config.dir.join(archive)
        }
    }

    /// Stage, archive and prune. Returns the archive path and its metadata.
    pub fn create(&self, options: &CreateOptions) -> Result<(PathBuf, BackupMetadata)> {
        let include_logs = options.include_logs.unwrap_or(self.config.include_logs);
        let include_security = options.include_security.unwrap_or(self.config.include_security);

        fs::create_dir_all(&self.config.dir)
            .with_context(|| format!("Failed to create backup directory {:?}", self.config.dir))?;

        let (name, archive_path) = self.next_archive_name();
        let staging = TempDir::new_in(&self.config.dir).context("Failed to create staging dir")?;
        let root = staging.path().join(&name);
        fs::create_dir_all(&root)?;

        let mut files = Vec::new();
        self.stage_category(&root, "wireguard", dir_files(&self.sources.wireguard_dir), &mut files);
        self.stage_category(&root, "nextdns", self.sources.nextdns_files.clone(), &mut files);
        if include_logs {
            let logs = self
                .sources
                .log_dirs
                .iter()
                .flat_map(|d| dir_files(d))
                .filter(|p| p.extension().is_some_and(|e| e == "log"))
                .collect();
            self.stage_category(&root, "logs", logs, &mut files);
        }
        if include_security {
            self.stage_category(&root, "security", dir_files(&self.sources.security_dir), &mut files);
        }
        self.stage_category(&root, "config", self.sources.config_files.clone(), &mut files);

        let metadata = BackupMetadata {
            timestamp: Utc::now(),
            description: options.description.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: Platform::current().as_str().to_string(),
            include_logs,
            include_security,
            files,
        };
        fs::write(root.join(METADATA_FILE), serde_json::to_string_pretty(&metadata)?)?;

        write_archive(self.config.compression, &archive_path, &name, &root)?;
        drop(staging);

        info!(
            "Backup created: {:?} ({} files)",
            archive_path,
            metadata.files.len()
        );
        self.cleanup()?;
        Ok((archive_path, metadata))
    }

    fn next_archive_name(&self) -> (String, PathBuf) {
        let ext = if self.config.compression { TAR_GZ_EXT } else { ZIP_EXT };
        let base = format!("{}{}", BACKUP_PREFIX, Local::now().format("%Y%m%d_%H%M%S"));
        let mut name = base.clone();
        let mut n = 1;
        loop {
            let taken = [TAR_GZ_EXT, ZIP_EXT]
                .iter()
                .any(|e| self.config.dir.join(format!("{}{}", name, e)).exists());
            if !taken {
                let path = self.config.dir.join(format!("{}{}", name, ext));
                return (name, path);
            }
            name = format!("{}_{}", base, n);
            n += 1;
        }
    }

    fn stage_category(
        &self,
        root: &Path,
        category: &str,
        sources: Vec<PathBuf>,
        files: &mut Vec<String>,
    ) {
        let dest_dir = root.join(category);
        for src in sources.into_iter().filter(|p| p.is_file()) {
            let Some(file_name) = src.file_name() else {
                continue;
            };
            let result = fs::create_dir_all(&dest_dir)
                .and_then(|_| fs::copy(&src, dest_dir.join(file_name)));
            match result {
                Ok(_) => files.push(format!("{}/{}", category, file_name.to_string_lossy())),
                Err(e) => warn!("Skipping {:?} in {} backup: {}", src, category, e),
            }
        }
    }

    /// Archives in the backup directory, newest first.
    pub fn list(&self) -> Result<Vec<BackupInfo>> {
        if !self.config.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.config.dir)? {
            let path = entry?.path();
            let Some(filename) = archive_file_name(&path) else {
                continue;
            };
            let meta = match fs::metadata(&path) {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let metadata = match read_metadata(&path) {
                Ok(m) => Some(m),
                Err(e) => {
                    debug!("No metadata in {:?}: {:#}", path, e);
                    None
                }
            };
            entries.push((
                modified,
                collision_index(&filename),
                BackupInfo {
                    filename,
                    path,
                    size: meta.len(),
                    modified: DateTime::<Local>::from(modified),
                    metadata,
                },
            ));
        }
        entries.sort_by(|a, b| (b.0, b.1, &b.2.filename).cmp(&(a.0, a.1, &a.2.filename)));
        Ok(entries.into_iter().map(|(_, _, info)| info).collect())
    }

    /// Delete all but the newest `max_backups` archives. Returns the
    /// number removed.
    pub fn cleanup(&self) -> Result<usize> {
        let backups = self.list()?;
        let keep = self.config.max_backups.max(1);
        let mut removed = 0;
        for old in backups.iter().skip(keep) {
            if self.delete(&old.path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn delete(&self, archive: &Path) -> Result<bool> {
        if !archive.exists() {
            warn!("Backup not found: {:?}", archive);
            return Ok(false);
        }
        fs::remove_file(archive).with_context(|| format!("Failed to delete {:?}", archive))?;
        info!("Backup deleted: {:?}", archive);
        Ok(true)
    }

    /// Extract `archive` and copy each category into `target` (default
    /// `~/.warp`).
    pub fn restore(&self, archive: &Path, target: Option<&Path>) -> Result<RestoreResult> {
        if !archive.exists() {
            return Err(WarpError::Backup(format!("backup file not found: {:?}", archive)).into());
        }
        let extracted = TempDir::new().context("Failed to create extraction dir")?;
        extract(archive, extracted.path())?;
        let root = single_top_level_dir(extracted.path())?;

        let metadata: BackupMetadata = serde_json::from_str(
            &fs::read_to_string(root.join(METADATA_FILE))
                .map_err(|_| WarpError::Backup("backup metadata not found".to_string()))?,
        )
        .context("Invalid backup metadata")?;

        let target = target.map(Path::to_path_buf).unwrap_or_else(config::data_dir);
        fs::create_dir_all(&target).with_context(|| format!("Failed to create {:?}", target))?;

        let mut restored_files = Vec::new();
        for category in CATEGORIES {
            let src = root.join(category);
            if !src.is_dir() {
                continue;
            }
            let dest = target.join(category);
            fs::create_dir_all(&dest)?;
            for file in dir_files(&src) {
                if let Some(name) = file.file_name() {
                    fs::copy(&file, dest.join(name))
                        .with_context(|| format!("Failed to restore {:?}", file))?;
                    restored_files.push(format!("{}/{}", category, name.to_string_lossy()));
                }
            }
        }

        info!("Restored {} files to {:?}", restored_files.len(), target);
        Ok(RestoreResult {
            target,
            restored_files,
            metadata,
        })
    }

    /// Check that `archive` extracts, carries metadata and contains every
    /// file its metadata lists.
    pub fn verify(&self, archive: &Path) -> VerifyReport {
        let size = match fs::metadata(archive) {
            Ok(m) => m.len(),
            Err(_) => return VerifyReport::invalid("Backup file not found"),
        };
        if size == 0 {
            return VerifyReport::invalid("Backup file is empty");
        }
        let extracted = match TempDir::new() {
            Ok(d) => d,
            Err(e) => return VerifyReport::invalid(e.to_string()),
        };
        if let Err(e) = extract(archive, extracted.path()) {
            return VerifyReport::invalid(format!("{:#}", e));
        }
        let root = match single_top_level_dir(extracted.path()) {
            Ok(r) => r,
            Err(e) => return VerifyReport::invalid(e.to_string()),
        };
        let raw = match fs::read_to_string(root.join(METADATA_FILE)) {
            Ok(r) => r,
            Err(_) => return VerifyReport::invalid("Backup metadata not found"),
        };
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => return VerifyReport::invalid(format!("Invalid metadata: {}", e)),
        };
        for field in ["timestamp", "version", "files"] {
            if value.get(field).is_none() {
                return VerifyReport::invalid(format!("Missing required field: {}", field));
            }
        }
        let metadata: BackupMetadata = match serde_json::from_value(value) {
            Ok(m) => m,
            Err(e) => return VerifyReport::invalid(format!("Invalid metadata: {}", e)),
        };

        let missing: Vec<&String> = metadata
            .files
            .iter()
            .filter(|f| !root.join(f).is_file())
            .collect();
        if !missing.is_empty() {
            return VerifyReport::invalid(format!("Missing files in backup: {:?}", missing));
        }

        VerifyReport {
            valid: true,
            error: None,
            file_count: metadata.files.len(),
            metadata: Some(metadata),
        }
    }

    pub fn stats(&self) -> Result<BackupStats> {
        let backups = self.list()?;
        let total_size: u64 = backups.iter().map(|b| b.size).sum();
        let count = backups.len();
        Ok(BackupStats {
            total_backups: count,
            total_size,
            average_size: if count > 0 { total_size / count as u64 } else { 0 },
            oldest: backups.iter().map(|b| b.modified).min(),
            newest: backups.iter().map(|b| b.modified).max(),
            backup_dir: self.config.dir.clone(),
            max_backups: self.config.max_backups,
        })
    }
}

/// Archive file name if `path` looks like one of our backups.
fn archive_file_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    (name.starts_with(BACKUP_PREFIX) && (name.ends_with(TAR_GZ_EXT) || name.ends_with(ZIP_EXT)))
        .then(|| name.to_string())
}

/// Collision suffix of an archive name (`..._HHMMSS_3.tar.gz` -> 3).
fn collision_index(filename: &str) -> u32 {
    let stem = filename
        .trim_end_matches(TAR_GZ_EXT)
        .trim_end_matches(ZIP_EXT)
        .trim_start_matches(BACKUP_PREFIX);
    // stem is `YYYYmmdd_HHMMSS` or `YYYYmmdd_HHMMSS_N`
    stem.splitn(3, '_')
        .nth(2)
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Regular files directly under `dir`, sorted. Missing dirs yield nothing.
fn dir_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

/// All files below `root`, as (relative path, absolute path).
fn walk_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push((rel, path));
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Archive `root` as `name/` into `path`, removing `path` again on failure
/// so a partial archive never shows up in listings.
fn write_archive(compression: bool, path: &Path, name: &str, root: &Path) -> Result<()> {
    let result = if compression {
        write_tar_gz(path, name, root)
    } else {
        write_zip(path, name, root)
    };
    if result.is_err() && path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove partial backup {:?}: {}", path, e);
        }
    }
    result
}

fn write_tar_gz(path: &Path, name: &str, root: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder
        .append_dir_all(name, root)
        .context("Failed to write tar archive")?;
    builder.into_inner()?.finish()?;
    Ok(())
}

fn write_zip(path: &Path, name: &str, root: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (rel, abs) in walk_files(root)? {
        zip.start_file(format!("{}/{}", name, rel), options)?;
        let mut src = File::open(&abs)?;
        io::copy(&mut src, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}

fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let file = File::open(archive).with_context(|| format!("Failed to open {:?}", archive))?;
    if name.ends_with(TAR_GZ_EXT) {
        tar::Archive::new(GzDecoder::new(file))
            .unpack(dest)
            .context("Failed to extract tar.gz backup")?;
    } else if name.ends_with(ZIP_EXT) {
        ZipArchive::new(file)?
            .extract(dest)
            .context("Failed to extract zip backup")?;
    } else {
        return Err(WarpError::Backup(format!("unsupported backup format: {}", name)).into());
    }
    Ok(())
}

fn single_top_level_dir(dir: &Path) -> std::result::Result<PathBuf, WarpError> {
    let entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| WarpError::Backup(e.to_string()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        [] => Err(WarpError::Backup("backup is empty".to_string())),
        _ => Err(WarpError::Backup("invalid backup structure".to_string())),
    }
}

/// Read `metadata.json` straight out of an archive.
pub fn read_metadata(archive: &Path) -> Result<BackupMetadata> {
    let name = archive_file_name(archive).unwrap_or_default();
    let file = File::open(archive)?;
    let mut raw = String::new();

    if name.ends_with(TAR_GZ_EXT) {
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        for entry in tar.entries()? {
            let mut entry = entry?;
            if entry.path()?.ends_with(METADATA_FILE) {
                entry.read_to_string(&mut raw)?;
                break;
            }
        }
    } else {
        let mut zip = ZipArchive::new(file)?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if entry.name().ends_with(METADATA_FILE) {
                entry.read_to_string(&mut raw)?;
                break;
            }
        }
    }

    if raw.is_empty() {
        return Err(WarpError::Backup("backup metadata not found".to_string()).into());
    }
    Ok(serde_json::from_str(&raw)?)
}
