//! Owner registries: reverse lookup from a numeric identity to the names
//! bound to it

use privd_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Package registry maintained by the Android package manager.
pub const PACKAGES_LIST_PATH: &str = "/data/system/packages.list";

/// Privileged reverse lookup used by the impersonated-context builder.
pub trait IdentityRegistry: Send + Sync {
    /// Every owner name bound to `uid`, in registry order. An unknown uid is
    /// an empty list, not an error.
    fn owners_of(&self, uid: u32) -> Result<Vec<String>>;
}

/// Reads `packages.list`: one package per line,
/// `<package> <uid> <debuggable> <data-dir> <seinfo> <gids> ...`.
///
/// The file is re-read on every lookup, so packages installed after startup
/// are visible.
#[derive(Debug, Clone)]
pub struct PackagesList {
    path: PathBuf,
}

impl PackagesList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn system() -> Self {
        Self::new(PACKAGES_LIST_PATH)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

impl IdentityRegistry for PackagesList {
    fn owners_of(&self, uid: u32) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::lookup_failed(uid, format!("{}: {}", self.path.display(), e)))?;
        Ok(parse_packages_list(&content, uid))
    }
}

/// Package names whose uid column equals `uid`. Malformed lines are skipped.
pub fn parse_packages_list(content: &str, uid: u32) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let owner_uid: u32 = fields.next()?.parse().ok()?;
            (owner_uid == uid).then(|| name.to_string())
        })
        .collect()
}

/// Account database (`getpwuid_r`) lookup for plain Unix hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct PasswdRegistry;

impl IdentityRegistry for PasswdRegistry {
    fn owners_of(&self, uid: u32) -> Result<Vec<String>> {
        let user = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
            .map_err(|e| Error::lookup_failed(uid, e.to_string()))?;
        Ok(user.map(|u| vec![u.name]).unwrap_or_default())
    }
}

/// In-memory registry; the host for embedded and harness runs.
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    owners: HashMap<u32, Vec<String>>,
    failing: bool,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, uid: u32, owner: impl Into<String>) -> Self {
        self.owners.entry(uid).or_default().push(owner.into());
        self
    }

    /// A registry whose every lookup fails, as an unreachable service would.
    pub fn unavailable() -> Self {
        Self {
            owners: HashMap::new(),
            failing: true,
        }
    }
}

impl IdentityRegistry for StaticRegistry {
    fn owners_of(&self, uid: u32) -> Result<Vec<String>> {
        if self.failing {
            return Err(Error::lookup_failed(uid, "registry unavailable"));
        }
        Ok(self.owners.get(&uid).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
com.android.shell 2000 0 /data/user_de/0/com.android.shell platform:privapp:targetSdkVersion=30 3002,3003
com.example.app 10123 1 /data/user/0/com.example.app default:targetSdkVersion=33 3003
com.example.shared 10123 0 /data/user/0/com.example.shared default:targetSdkVersion=33 none
broken-line
com.example.bad notanumber 0 /data
";

    #[test]
    fn parse_returns_every_package_for_uid_in_order() {
        assert_eq!(
            parse_packages_list(SAMPLE, 10123),
            vec!["com.example.app".to_string(), "com.example.shared".to_string()]
        );
        assert_eq!(parse_packages_list(SAMPLE, 2000), vec!["com.android.shell"]);
    }

    #[test]
    fn parse_skips_malformed_lines() {
        assert!(parse_packages_list(SAMPLE, 0).is_empty());
        assert!(parse_packages_list("", 2000).is_empty());
    }

    #[test]
    fn packages_list_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("packages.list");
        std::fs::write(&path, SAMPLE).unwrap();

        let registry = PackagesList::new(&path);
        assert!(registry.exists());
        assert_eq!(registry.owners_of(2000).unwrap(), vec!["com.android.shell"]);
        assert!(registry.owners_of(99999).unwrap().is_empty());
    }

    #[test]
    fn missing_packages_list_is_a_lookup_failure() {
        let dir = TempDir::new().unwrap();
        let registry = PackagesList::new(dir.path().join("absent"));
        assert!(!registry.exists());
        let err = registry.owners_of(2000).unwrap_err();
        assert!(matches!(err, Error::LookupFailed { uid: 2000, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn static_registry() {
        let registry = StaticRegistry::new()
            .with_owner(2000, "com.android.shell")
            .with_owner(2000, "com.android.extra");
        assert_eq!(
            registry.owners_of(2000).unwrap(),
            vec!["com.android.shell", "com.android.extra"]
        );
        assert!(registry.owners_of(1).unwrap().is_empty());
        assert!(StaticRegistry::unavailable().owners_of(2000).is_err());
    }

    #[test]
    fn passwd_knows_root() {
        // uid 0 has an account entry on every Unix host the tests run on
        let owners = PasswdRegistry.owners_of(0).unwrap();
        assert_eq!(owners, vec!["root"]);
    }
}
