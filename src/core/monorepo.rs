//! Monorepo workspace index.
//!
//! Enumerates the sibling packages of the repository the plugin lives in.
//! The index is read once at export start and consulted to resolve
//! workspace-protocol dependencies and embedding candidates.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use semver::Version;
use serde_json::Value;

use crate::core::descriptor::{PackageDescriptor, DESCRIPTOR_FILE};
use crate::core::spec::{self, WorkspaceSpec};

/// One sibling package of the monorepo.
#[derive(Debug, Clone)]
pub struct MonorepoPackage {
    pub name: String,
    pub version: Version,
    /// Absolute directory containing the package descriptor.
    pub dir: PathBuf,
    /// Directory relative to the monorepo root, as workspace-protocol
    /// directory specifiers reference it.
    pub rel_dir: PathBuf,
}

impl MonorepoPackage {
    /// Whether this package satisfies a workspace-protocol specifier.
    pub fn satisfies(&self, workspace_spec: &WorkspaceSpec) -> bool {
        match workspace_spec {
            WorkspaceSpec::Star | WorkspaceSpec::CaretOnly | WorkspaceSpec::TildeOnly => true,
            WorkspaceSpec::Directory(dir) => {
                Path::new(dir) == self.rel_dir
                    || self.dir.file_name().is_some_and(|n| n == dir.as_str())
            }
            WorkspaceSpec::Range(range) => spec::range_matches(range, &self.version),
        }
    }
}

/// Index of monorepo packages by name.
///
/// Names are not guaranteed unique here; a duplicate name is a fatal error at
/// resolution time, where the offending dependency can be named.
#[derive(Debug, Clone, Default)]
pub struct MonorepoIndex {
    packages: Vec<MonorepoPackage>,
}

impl MonorepoIndex {
    /// An empty index, for plugins that live outside any monorepo.
    pub fn empty() -> Self {
        MonorepoIndex::default()
    }

    /// Walk up from `start` to the nearest directory whose descriptor declares
    /// workspaces.
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        start.ancestors().find_map(|dir| {
            let file = dir.join(DESCRIPTOR_FILE);
            if !file.is_file() {
                return None;
            }
            let desc = PackageDescriptor::load(&file).ok()?;
            desc.get("workspaces").map(|_| dir.to_path_buf())
        })
    }

    /// Load the index for the monorepo enclosing `plugin_dir`. Returns an
    /// empty index when the plugin is standalone.
    pub fn load_for(plugin_dir: &Path) -> Result<Self> {
        match Self::find_root(plugin_dir) {
            Some(root) => Self::load(&root),
            None => Ok(MonorepoIndex::empty()),
        }
    }

    /// Load the index from a monorepo root.
    pub fn load(root: &Path) -> Result<Self> {
        let root_desc = PackageDescriptor::load(root)
            .with_context(|| format!("failed to read monorepo root: {}", root.display()))?;
        let patterns = workspace_patterns(&root_desc);

        let mut packages = Vec::new();
        for pattern in &patterns {
            let full = root.join(pattern);
            for entry in glob::glob(&full.to_string_lossy())
                .with_context(|| format!("invalid workspace pattern: {}", pattern))?
            {
                let dir = match entry {
                    Ok(d) if d.is_dir() => d,
                    _ => continue,
                };
                let descriptor_file = dir.join(DESCRIPTOR_FILE);
                if !descriptor_file.is_file() {
                    continue;
                }
                let desc = PackageDescriptor::load(&descriptor_file)?;
                let name = desc.name()?.to_string();
                let version = desc.version().with_context(|| {
                    format!("workspace package `{}` has an invalid version", name)
                })?;
                let rel_dir = pathdiff::diff_paths(&dir, root).unwrap_or_else(|| dir.clone());
                packages.push(MonorepoPackage {
                    name,
                    version,
                    dir,
                    rel_dir,
                });
            }
        }

        tracing::debug!(
            "indexed {} workspace packages under {}",
            packages.len(),
            root.display()
        );
        Ok(MonorepoIndex { packages })
    }

    /// All packages matching `name`. More than one match is a configuration
    /// error the caller reports.
    pub fn lookup(&self, name: &str) -> Vec<&MonorepoPackage> {
        self.packages.iter().filter(|p| p.name == name).collect()
    }

    /// Number of indexed packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    #[cfg(test)]
    pub fn from_packages(packages: Vec<MonorepoPackage>) -> Self {
        MonorepoIndex { packages }
    }
}

/// Workspace member patterns from a root descriptor. Supports both the plain
/// array form and the `{ "packages": [...] }` object form.
fn workspace_patterns(root: &PackageDescriptor) -> Vec<String> {
    let Some(field) = root.get("workspaces") else {
        return Vec::new();
    };
    let list = match field {
        Value::Array(list) => Some(list),
        Value::Object(obj) => obj.get("packages").and_then(Value::as_array),
        _ => None,
    };
    list.map(|l| {
        l.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_package(dir: &Path, name: &str, version: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(DESCRIPTOR_FILE),
            format!(r#"{{ "name": "{}", "version": "{}" }}"#, name, version),
        )
        .unwrap();
    }

    fn write_root(root: &Path) {
        fs::write(
            root.join(DESCRIPTOR_FILE),
            r#"{ "name": "root", "version": "0.0.0", "private": true, "workspaces": ["packages/*"] }"#,
        )
        .unwrap();
    }

    #[test]
    fn test_load_and_lookup() {
        let tmp = TempDir::new().unwrap();
        write_root(tmp.path());
        write_package(&tmp.path().join("packages/foo-backend"), "@x/foo-backend", "1.0.0");
        write_package(&tmp.path().join("packages/foo-common"), "@x/foo-common", "1.2.3");

        let index = MonorepoIndex::load(tmp.path()).unwrap();
        assert_eq!(index.len(), 2);

        let matches = index.lookup("@x/foo-common");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].version, Version::new(1, 2, 3));
        assert_eq!(matches[0].rel_dir, Path::new("packages/foo-common"));
    }

    #[test]
    fn test_find_root_from_nested_package() {
        let tmp = TempDir::new().unwrap();
        write_root(tmp.path());
        let pkg = tmp.path().join("packages/foo-backend");
        write_package(&pkg, "@x/foo-backend", "1.0.0");

        let root = MonorepoIndex::find_root(&pkg).unwrap();
        assert_eq!(root, tmp.path());
    }

    #[test]
    fn test_standalone_plugin_gets_empty_index() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), "@x/standalone", "1.0.0");

        let index = MonorepoIndex::load_for(tmp.path()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_workspaces_object_form() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(DESCRIPTOR_FILE),
            r#"{ "name": "root", "version": "0.0.0", "workspaces": { "packages": ["libs/*"] } }"#,
        )
        .unwrap();
        write_package(&tmp.path().join("libs/util"), "@x/util", "2.0.0");

        let index = MonorepoIndex::load(tmp.path()).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_workspace_spec_satisfaction() {
        let pkg = MonorepoPackage {
            name: "@x/foo-common".to_string(),
            version: Version::new(1, 2, 3),
            dir: PathBuf::from("/repo/packages/foo-common"),
            rel_dir: PathBuf::from("packages/foo-common"),
        };

        assert!(pkg.satisfies(&WorkspaceSpec::Star));
        assert!(pkg.satisfies(&WorkspaceSpec::CaretOnly));
        assert!(pkg.satisfies(&WorkspaceSpec::Directory("packages/foo-common".to_string())));
        assert!(pkg.satisfies(&WorkspaceSpec::Directory("foo-common".to_string())));
        assert!(pkg.satisfies(&WorkspaceSpec::Range("^1.2.0".to_string())));
        assert!(!pkg.satisfies(&WorkspaceSpec::Range("^2.0.0".to_string())));
        assert!(!pkg.satisfies(&WorkspaceSpec::Directory("packages/other".to_string())));
    }

    #[test]
    fn test_find_root_when_plugin_has_no_workspaces() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), "@x/plain", "1.0.0");
        assert!(MonorepoIndex::find_root(tmp.path()).is_none());
    }
}
