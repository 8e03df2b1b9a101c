//! Process identity and package lookups backed by system commands

use std::process::Command;

use anyhow::{anyhow, Context, Result};

use crate::ports::{IdentityProvider, PackageQuery};

/// Effective user of this process, as reported by `id -un`
#[derive(Debug, Default)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn current_user(&self) -> Result<String> {
        match Command::new("id").arg("-un").output() {
            Ok(output) if output.status.success() => {
                let user = String::from_utf8(output.stdout)
                    .context("id printed a non UTF-8 user name")?;
                Ok(user.trim().to_string())
            }
            // No usable `id`; fall back to the login environment
            _ => std::env::var("USER")
                .or_else(|_| std::env::var("LOGNAME"))
                .map_err(|_| anyhow!("Could not determine the current user")),
        }
    }
}

/// Installed package versions from the RPM database
#[derive(Debug, Default)]
pub struct RpmPackageQuery;

impl PackageQuery for RpmPackageQuery {
    fn installed_version(&self, package: &str) -> Option<String> {
        let output = Command::new("rpm")
            .args(["-q", "--queryformat", "%{VERSION}-%{RELEASE}", package])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let version = String::from_utf8(output.stdout).ok()?;
        let version = version.trim();
        (!version.is_empty()).then(|| version.to_string())
    }
}

/// Fixed identity, for tests and for embedding the runner
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl StaticIdentity {
    pub fn new(user: impl Into<String>) -> Self {
        Self(user.into())
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Fixed package version (or none)
#[derive(Debug, Clone, Default)]
pub struct StaticPackageQuery(pub Option<String>);

impl PackageQuery for StaticPackageQuery {
    fn installed_version(&self, _package: &str) -> Option<String> {
        self.0.clone()
    }
}
