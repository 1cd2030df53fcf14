use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

/// working directories of a role
///
/// ```text
/// <root>/temp          uploads being received, before encryption
/// <root>/files         encrypted files
/// <root>/exchange      files and commitments received from the counterpart
/// <root>/verification  the role's own commitments
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleStorage {
    root: PathBuf,
}

impl RoleStorage {
    const TEMP: &'static str = "temp";
    const FILES: &'static str = "files";
    const EXCHANGE: &'static str = "exchange";
    const VERIFICATION: &'static str = "verification";

    /// name of the counterpart's commitment in the exchange directory
    pub const RECEIVED_COMMITMENT: &'static str = "received_commitment.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp(&self) -> PathBuf {
        self.root.join(Self::TEMP)
    }

    pub fn files(&self) -> PathBuf {
        self.root.join(Self::FILES)
    }

    pub fn exchange(&self) -> PathBuf {
        self.root.join(Self::EXCHANGE)
    }

    pub fn verification(&self) -> PathBuf {
        self.root.join(Self::VERIFICATION)
    }

    /// where a file received through an exchange is stored
    pub fn received(&self, name: &str) -> PathBuf {
        self.exchange().join(format!("received_{}", name))
    }

    pub fn received_commitment(&self) -> PathBuf {
        self.exchange().join(Self::RECEIVED_COMMITMENT)
    }

    /// a storage nested in this one, for a service running on behalf of
    /// this role
    pub fn scoped(&self, name: &str) -> Self {
        Self::new(self.root.join(name))
    }

    /// create all the working directories
    pub async fn prepare(&self) -> Result<()> {
        for dir in [self.temp(), self.files(), self.exchange(), self.verification()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Cannot create directory {}", dir.display()))?;
        }
        Ok(())
    }
}
