//! Lock file parsing and the shared-leakage check.
//!
//! Both lock file generations are understood: the classic (v1) indented
//! format and the berry (v2+) YAML format. The pipeline only needs entry
//! enumeration and lookups by package name, never full fidelity.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::descriptor::PackageDescriptor;
use crate::core::shared::SharedPackagesRules;
use crate::ops::errors::ExportError;
use crate::util::fs;

/// The lock file name used by both yarn generations.
pub const LOCKFILE_NAME: &str = "yarn.lock";

/// Which yarn generation wrote the lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YarnFlavor {
    Classic,
    Berry,
}

impl YarnFlavor {
    pub fn is_v1(self) -> bool {
        self == YarnFlavor::Classic
    }
}

/// One lock file entry. A key line listing several specifiers produces one
/// entry per specifier, all sharing the resolved version.
#[derive(Debug, Clone)]
pub struct LockfileEntry {
    /// Full entry key, `<name>@<specifier>`.
    pub key: String,
    /// Package name extracted from the key.
    pub name: String,
    /// Requested specifier, with any `npm:` protocol prefix removed.
    pub specifier: String,
    /// Resolved version.
    pub version: String,
    /// Dependencies recorded for the resolved package.
    pub dependencies: BTreeMap<String, String>,
}

/// A parsed lock file.
#[derive(Debug)]
pub struct Lockfile {
    flavor: YarnFlavor,
    entries: Vec<LockfileEntry>,
}

impl Lockfile {
    /// Parse lock file content, auto-detecting the generation.
    pub fn parse(content: &str) -> Result<Self> {
        let flavor = detect_flavor(content);
        let entries = match flavor {
            YarnFlavor::Classic => parse_classic(content),
            YarnFlavor::Berry => parse_berry(content)?,
        };
        Ok(Lockfile { flavor, entries })
    }

    /// Load and parse a lock file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content).with_context(|| format!("invalid lock file: {}", path.display()))
    }

    pub fn flavor(&self) -> YarnFlavor {
        self.flavor
    }

    pub fn entries(&self) -> &[LockfileEntry] {
        &self.entries
    }

    /// All entries whose key starts with `<name>@`.
    pub fn entries_for(&self, name: &str) -> Vec<&LockfileEntry> {
        self.entries.iter().filter(|e| e.name == name).collect()
    }

    /// The entry recorded for a specific dependency edge.
    pub fn entry_for(&self, name: &str, specifier: &str) -> Option<&LockfileEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name && e.specifier == specifier)
    }
}

/// Detect which yarn generation wrote the content.
pub fn detect_flavor(content: &str) -> YarnFlavor {
    if content.contains("__metadata:") {
        YarnFlavor::Berry
    } else {
        YarnFlavor::Classic
    }
}

fn unquote(raw: &str) -> &str {
    raw.trim_matches('"')
}

/// Split an entry key into package name and specifier. The `@` separating
/// them is the first one past any scope prefix.
fn split_key(key: &str) -> (String, String) {
    let search_from = if key.starts_with('@') { 1 } else { 0 };
    match key[search_from..].find('@') {
        Some(i) => {
            let at = search_from + i;
            let name = key[..at].to_string();
            let specifier = key[at + 1..]
                .strip_prefix("npm:")
                .unwrap_or(&key[at + 1..])
                .to_string();
            (name, specifier)
        }
        None => (key.to_string(), String::new()),
    }
}

fn parse_classic(content: &str) -> Vec<LockfileEntry> {
    let mut entries = Vec::new();
    let mut keys: Vec<String> = Vec::new();
    let mut version = String::new();
    let mut dependencies: BTreeMap<String, String> = BTreeMap::new();
    let mut in_deps = false;

    let mut flush = |keys: &mut Vec<String>,
                     version: &mut String,
                     dependencies: &mut BTreeMap<String, String>| {
        for key in keys.drain(..) {
            let (name, specifier) = split_key(&key);
            entries.push(LockfileEntry {
                key,
                name,
                specifier,
                version: version.clone(),
                dependencies: dependencies.clone(),
            });
        }
        version.clear();
        dependencies.clear();
    };

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        if indent == 0 {
            flush(&mut keys, &mut version, &mut dependencies);
            in_deps = false;
            let key_line = trimmed.trim_end_matches(':');
            keys = key_line
                .split(", ")
                .map(|k| unquote(k).to_string())
                .collect();
        } else if indent == 2 {
            in_deps = trimmed == "dependencies:";
            if let Some(rest) = trimmed.strip_prefix("version ") {
                version = unquote(rest).to_string();
            }
        } else if indent >= 4 && in_deps {
            if let Some((name, spec)) = trimmed.split_once(' ') {
                dependencies.insert(unquote(name).to_string(), unquote(spec.trim()).to_string());
            }
        }
    }
    flush(&mut keys, &mut version, &mut dependencies);

    entries
}

#[derive(Debug, Deserialize)]
struct BerryEntry {
    #[serde(default)]
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    dependencies: Option<BTreeMap<String, serde_yaml::Value>>,
}

fn yaml_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

fn parse_berry(content: &str) -> Result<Vec<LockfileEntry>> {
    let raw: BTreeMap<String, serde_yaml::Value> =
        serde_yaml::from_str(content).context("failed to parse berry lock file")?;

    let mut entries = Vec::new();
    for (key_line, value) in raw {
        if key_line == "__metadata" {
            continue;
        }
        let entry: BerryEntry = serde_yaml::from_value(value)?;
        let version = entry
            .version
            .as_ref()
            .map(yaml_to_string)
            .unwrap_or_default();
        let dependencies: BTreeMap<String, String> = entry
            .dependencies
            .unwrap_or_default()
            .iter()
            .map(|(k, v)| (k.clone(), yaml_to_string(v)))
            .collect();

        for key in key_line.split(", ") {
            let key = unquote(key).to_string();
            let (name, specifier) = split_key(&key);
            entries.push(LockfileEntry {
                key,
                name,
                specifier,
                version: version.clone(),
                dependencies: dependencies.clone(),
            });
        }
    }
    Ok(entries)
}

/// Exhaustive shared-leakage check over an installed lock file.
///
/// Every entry other than the derived package itself and the embedded
/// packages must name a non-shared package. On failure, the direct
/// dependencies whose lock entries introduce shared packages are suggested as
/// embedding candidates.
pub fn check_shared_leakage(
    lockfile: &Lockfile,
    main: &PackageDescriptor,
    shared: &SharedPackagesRules,
    embedded_names: &[String],
    derived_name: &str,
) -> Result<(), ExportError> {
    let mut offenders: Vec<String> = Vec::new();
    for entry in lockfile.entries() {
        if entry.name == derived_name || embedded_names.iter().any(|n| n == &entry.name) {
            continue;
        }
        if shared.is_shared(&entry.name) && !offenders.contains(&entry.name) {
            offenders.push(entry.name.clone());
        }
    }

    if offenders.is_empty() {
        return Ok(());
    }
    offenders.sort();

    let mut suggestions: Vec<String> = Vec::new();
    for (dep, spec) in main.string_entries("dependencies") {
        let Some(entry) = lockfile.entry_for(&dep, &spec) else {
            continue;
        };
        let introduces_shared = entry
            .dependencies
            .keys()
            .any(|name| shared.is_shared(name));
        if introduces_shared && !suggestions.contains(&dep) {
            suggestions.push(dep);
        }
    }
    suggestions.sort();

    Err(ExportError::SharedPackageLeakage {
        offenders,
        suggestions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSIC: &str = r#"# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.
# yarn lockfile v1


"@backstage/core@^1.0.0":
  version "1.4.0"
  resolved "https://registry.yarnpkg.com/@backstage/core/-/core-1.4.0.tgz"
  integrity sha512-aaaa

lodash@^4.0.0, lodash@^4.17.0:
  version "4.17.21"
  resolved "https://registry.yarnpkg.com/lodash/-/lodash-4.17.21.tgz"
  dependencies:
    react "^18.0.0"

react@^18.0.0:
  version "18.2.0"
  resolved "https://registry.yarnpkg.com/react/-/react-18.2.0.tgz"
"#;

    const BERRY: &str = r#"__metadata:
  version: 8
  cacheKey: 10

"lodash@npm:^4.0.0":
  version: 4.17.21
  resolution: "lodash@npm:4.17.21"
  dependencies:
    react: "npm:^18.0.0"

"react@npm:^18.0.0":
  version: 18.2.0
  resolution: "react@npm:18.2.0"
"#;

    #[test]
    fn test_parse_classic_multi_key_entries() {
        let lock = Lockfile::parse(CLASSIC).unwrap();
        assert_eq!(lock.flavor(), YarnFlavor::Classic);

        let lodash = lock.entries_for("lodash");
        assert_eq!(lodash.len(), 2);
        assert_eq!(lodash[0].version, "4.17.21");
        assert_eq!(
            lodash[0].dependencies.get("react").map(String::as_str),
            Some("^18.0.0")
        );

        let scoped = lock.entry_for("@backstage/core", "^1.0.0").unwrap();
        assert_eq!(scoped.version, "1.4.0");
    }

    #[test]
    fn test_parse_berry() {
        let lock = Lockfile::parse(BERRY).unwrap();
        assert_eq!(lock.flavor(), YarnFlavor::Berry);

        let lodash = lock.entry_for("lodash", "^4.0.0").unwrap();
        assert_eq!(lodash.version, "4.17.21");
        assert!(lodash.dependencies.contains_key("react"));
    }

    #[test]
    fn test_leakage_detected_with_embedding_suggestion() {
        let lock = Lockfile::parse(CLASSIC).unwrap();
        let main = PackageDescriptor::parse(
            r#"{
              "name": "@x/foo-backend-dynamic",
              "version": "1.0.0",
              "dependencies": { "lodash": "^4.0.0" }
            }"#,
        )
        .unwrap();
        let shared = SharedPackagesRules::from_cli_values(&[
            "/@backstage\\//".to_string(),
            "react".to_string(),
        ])
        .unwrap();

        let err = check_shared_leakage(&lock, &main, &shared, &[], "@x/foo-backend-dynamic")
            .unwrap_err();

        match err {
            ExportError::SharedPackageLeakage {
                offenders,
                suggestions,
            } => {
                assert_eq!(offenders, vec!["@backstage/core", "react"]);
                assert_eq!(suggestions, vec!["lodash"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_no_leakage_when_shared_entries_absent() {
        let lock = Lockfile::parse(
            r#"lodash@^4.0.0:
  version "4.17.21"
"#,
        )
        .unwrap();
        let main = PackageDescriptor::parse(
            r#"{ "name": "@x/foo-backend-dynamic", "version": "1.0.0",
                 "dependencies": { "lodash": "^4.0.0" } }"#,
        )
        .unwrap();
        let shared = SharedPackagesRules::host_default();

        check_shared_leakage(&lock, &main, &shared, &[], "@x/foo-backend-dynamic").unwrap();
    }

    #[test]
    fn test_embedded_entries_are_exempt() {
        let lock = Lockfile::parse(
            r#""@x/foo-common@file:./embedded/x-foo-common":
  version "1.2.3"
"#,
        )
        .unwrap();
        let main = PackageDescriptor::parse(
            r#"{ "name": "@x/foo-backend-dynamic", "version": "1.0.0" }"#,
        )
        .unwrap();
        let shared = SharedPackagesRules::from_cli_values(&["/@x\\//".to_string()]).unwrap();

        check_shared_leakage(
            &lock,
            &main,
            &shared,
            &["@x/foo-common".to_string()],
            "@x/foo-backend-dynamic",
        )
        .unwrap();
    }
}
