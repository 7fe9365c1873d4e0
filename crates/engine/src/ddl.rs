//! Agent capability descriptors.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PlaybookError, PlaybookResult};

/// Looks up the locally known version of an agent.
pub trait CapabilityLookup: Send + Sync {
    fn lookup_version(&self, agent: &str) -> PlaybookResult<String>;
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    metadata: DescriptorMetadata,
}

#[derive(Debug, Deserialize)]
struct DescriptorMetadata {
    version: String,
}

/// Reads `<agent>.json` descriptors from a list of directories.
///
/// Directories are searched in order and the first descriptor found wins.
#[derive(Debug, Clone, Default)]
pub struct DdlDirectory {
    paths: Vec<PathBuf>,
}

impl DdlDirectory {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    fn descriptor_path(&self, agent: &str) -> Option<PathBuf> {
        self.paths
            .iter()
            .map(|dir| dir.join(format!("{}.json", agent)))
            .find(|path| path.is_file())
    }

    fn read_version(path: &Path) -> PlaybookResult<String> {
        let content = std::fs::read_to_string(path)?;
        let descriptor: Descriptor = serde_json::from_str(&content).map_err(|e| {
            PlaybookError::Capability(format!("Invalid descriptor {}: {}", path.display(), e))
        })?;
        Ok(descriptor.metadata.version)
    }
}

impl CapabilityLookup for DdlDirectory {
    fn lookup_version(&self, agent: &str) -> PlaybookResult<String> {
        if agent.is_empty() || agent.contains(['/', '\\']) || agent.starts_with('.') {
            return Err(PlaybookError::Capability(format!("Invalid agent name '{}'", agent)));
        }

        let path = self.descriptor_path(agent).ok_or_else(|| {
            PlaybookError::Capability(format!("Could not find a descriptor for agent {}", agent))
        })?;

        tracing::debug!(agent = %agent, path = %path.display(), "Reading agent descriptor");
        Self::read_version(&path)
    }
}
