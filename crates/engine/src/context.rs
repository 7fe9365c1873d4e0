//! Playbook identity shared by every component of a run.

use std::sync::Arc;

/// Identity of the playbook being run.
///
/// Created once when a declaration is loaded and cloned into every component
/// so log lines carry the playbook name without process-wide state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybookContext {
    name: Arc<str>,
    version: Option<Arc<str>>,
}

impl PlaybookContext {
    /// Create a new playbook context.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            version: None,
        }
    }

    /// Set the playbook version.
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.map(Arc::from);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl std::fmt::Display for PlaybookContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display() {
        let ctx = PlaybookContext::new("deploy");
        assert_eq!(ctx.to_string(), "deploy");

        let ctx = ctx.with_version(Some("1.2.0".to_string()));
        assert_eq!(ctx.name(), "deploy");
        assert_eq!(ctx.version(), Some("1.2.0"));
        assert_eq!(ctx.to_string(), "deploy@1.2.0");
    }

    #[test]
    fn test_context_clone_shares_name() {
        let ctx = PlaybookContext::new("deploy");
        let other = ctx.clone();
        assert_eq!(ctx, other);
    }
}
