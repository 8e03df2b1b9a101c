//! System ports - process identity and installed packages

use anyhow::Result;

/// Resolves who is running this process
pub trait IdentityProvider: Send + Sync {
    /// Effective user name
    fn current_user(&self) -> Result<String>;
}

/// Looks up installed package versions
pub trait PackageQuery: Send + Sync {
    /// Installed version of `package`, `None` if it is not installed
    fn installed_version(&self, package: &str) -> Option<String>;
}
