use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use tracing::{debug, info};

use crate::{
    config::RepairConfig,
    repair::{backup::Backup, material::Material},
    types::error::{DatabaseError, Result},
    utils::notifier,
};

const MATERIAL_EXTENSION: &str = "material";

/// Directory of timestamped materials for one database, kept at
/// `<database>.factory/`.
pub struct MaterialStore {
    database: PathBuf,
    directory: PathBuf,
}

impl MaterialStore {
    pub fn new<P: AsRef<Path>>(database: P) -> Self {
        let database = database.as_ref().to_path_buf();
        let mut directory = database.as_os_str().to_owned();
        directory.push(".factory");
        Self {
            database,
            directory: PathBuf::from(directory),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Material files, oldest first.
    pub fn materials(&self) -> Result<Vec<PathBuf>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|extension| extension == MATERIAL_EXTENSION) {
                paths.push(path);
            }
        }
        // names are timestamps, so lexical order is chronological
        paths.sort();
        Ok(paths)
    }

    pub fn save(&self, material: &Material, compression_level: i32) -> Result<PathBuf> {
        fs::create_dir_all(&self.directory)?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S%6f").to_string();
        let path = self.unused_path(&stamp);
        material.save(&path, compression_level)?;
        debug!(path = %path.display(), "Material saved");
        Ok(path)
    }

    /// A fresh file name for `stamp`. Suffixes are zero-padded so that
    /// names taken within one timestamp still sort in creation order.
    fn unused_path(&self, stamp: &str) -> PathBuf {
        let mut path = self.directory.join(format!("{}.{}", stamp, MATERIAL_EXTENSION));
        let mut suffix = 1;
        while path.exists() {
            path = self.directory.join(format!("{}_{:04}.{}", stamp, suffix, MATERIAL_EXTENSION));
            suffix += 1;
        }
        path
    }

    /// The newest material that still decodes. Damaged ones are reported
    /// and passed over.
    pub fn latest(&self) -> Result<Option<(PathBuf, Material)>> {
        for path in self.materials()?.into_iter().rev() {
            match Material::load(&path) {
                Ok(material) => return Ok(Some((path, material))),
                Err(error) if error.is_corruption() => notifier::notify(&error, &path),
                Err(error) => return Err(error),
            }
        }
        Ok(None)
    }

    /// Deletes all but the `keep` newest materials. Returns how many were removed.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let materials = self.materials()?;
        let excess = materials.len().saturating_sub(keep);
        for path in &materials[..excess] {
            fs::remove_file(path)?;
            debug!(path = %path.display(), "Material pruned");
        }
        Ok(excess)
    }

    /// Captures a fresh material of the database and keeps the configured
    /// number of the newest ones.
    pub fn backup(&self, config: &RepairConfig) -> Result<PathBuf> {
        let material = Backup::new(&self.database).with_config(config.clone()).work()?;
        if material.contents.is_empty() {
            info!(path = %self.database.display(), "Backup holds no tables");
        }
        let path = self.save(&material, config.compression_level)?;
        let pruned = self.prune(config.keep_materials.max(1))?;
        info!(path = %path.display(), pruned, "Backup stored");
        Ok(path)
    }

    /// Like [`MaterialStore::latest`], failing when no usable material exists.
    pub fn require_latest(&self) -> Result<Material> {
        self.latest()?
            .map(|(_, material)| material)
            .ok_or_else(|| DatabaseError::Misuse {
                details: format!("No usable material for {}", self.database.display()),
            })
    }
}
