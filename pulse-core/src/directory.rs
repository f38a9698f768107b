//! Tenant directory — registration records for syncable tenants.
//!
//! # Storage layout (file-backed impl)
//!
//! ```text
//! <data_root>/
//!   tenants.json          ({"tenants": [...]} — atomic .tmp + rename writes)
//! ```
//!
//! The sync core consumes this through the narrow [`TenantDirectory`]
//! trait: it only ever lists active tenants. Save/remove exist for the
//! registration front door, which lives outside this workspace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, DirectoryError};
use crate::types::Tenant;

/// Narrow read/write interface over persisted tenant registrations.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// All tenants currently flagged active, in stable order.
    async fn list_active(&self) -> Result<Vec<Tenant>, DirectoryError>;

    /// Insert or update a tenant, matched by case-insensitive identity
    /// `(scope_kind, scope_name, default_team)`. Returns `true` when an
    /// existing registration was updated.
    async fn save(&self, tenant: &Tenant) -> Result<bool, DirectoryError>;

    /// Remove a tenant by identity. Returns `true` when something was
    /// removed.
    async fn remove(&self, tenant: &Tenant) -> Result<bool, DirectoryError>;

    /// First tenant whose scope name matches case-insensitively.
    async fn find_by_scope_name(&self, name: &str) -> Result<Option<Tenant>, DirectoryError>;
}

// ---------------------------------------------------------------------------
// File-backed implementation
// ---------------------------------------------------------------------------

/// On-disk tenant file payload.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TenantFile {
    #[serde(default)]
    tenants: Vec<Tenant>,
}

/// Tenant directory persisted as a single JSON file under the data root.
#[derive(Debug, Clone)]
pub struct FileTenantDirectory {
    root: PathBuf,
}

impl FileTenantDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>/tenants.json` — pure, no I/O.
    pub fn file_path(&self) -> PathBuf {
        self.root.join("tenants.json")
    }

    fn load(&self) -> Result<TenantFile, DirectoryError> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(TenantFile::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| DirectoryError::Parse { path, source: e })
    }

    /// Save the tenant file atomically: write `<path>.tmp`, then rename.
    fn store(&self, file: &TenantFile) -> Result<(), DirectoryError> {
        let path = self.file_path();
        std::fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))?;

        let json = serde_json::to_string_pretty(file)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for FileTenantDirectory {
    async fn list_active(&self) -> Result<Vec<Tenant>, DirectoryError> {
        let file = self.load()?;
        Ok(file.tenants.into_iter().filter(|t| t.active).collect())
    }

    async fn save(&self, tenant: &Tenant) -> Result<bool, DirectoryError> {
        let mut file = self.load()?;
        let existing = file.tenants.iter_mut().find(|t| t.same_identity(tenant));
        let updated = match existing {
            Some(slot) => {
                *slot = tenant.clone();
                true
            }
            None => {
                file.tenants.push(tenant.clone());
                false
            }
        };
        self.store(&file)?;
        Ok(updated)
    }

    async fn remove(&self, tenant: &Tenant) -> Result<bool, DirectoryError> {
        let mut file = self.load()?;
        let before = file.tenants.len();
        file.tenants.retain(|t| !t.same_identity(tenant));
        let removed = file.tenants.len() < before;
        if removed {
            self.store(&file)?;
        }
        Ok(removed)
    }

    async fn find_by_scope_name(&self, name: &str) -> Result<Option<Tenant>, DirectoryError> {
        let file = self.load()?;
        Ok(file
            .tenants
            .into_iter()
            .find(|t| t.scope_name.eq_ignore_ascii_case(name)))
    }
}
