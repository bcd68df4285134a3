//! Descriptor customization for dynamic use.
//!
//! Rewrites a packed descriptor in place: field overrides, workspace-protocol
//! resolution, hoisting of shared dependencies to peer dependencies,
//! embedded-package pinning, and override/resolution injection. The rewritten
//! descriptor is what the package manager installs against.

use std::path::Path;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::core::descriptor::PackageDescriptor;
use crate::core::monorepo::MonorepoIndex;
use crate::core::shared::SharedPackagesRules;
use crate::core::spec::VersionSpec;
use crate::core::ResolvedEmbedded;
use crate::ops::errors::ExportError;

/// Compatibility pin carried in every emitted descriptor: the retired AWS
/// UTF-8 helper is aliased to its Smithy successor so hosts on either side
/// resolve a single copy.
const UTF8_COMPAT_PIN: (&str, &str) = ("@aws-sdk/util-utf8-browser", "npm:@smithy/util-utf8");

/// Post-customization hook, invoked with the mutated descriptor before it is
/// written back.
pub type AfterHook<'a> = Box<dyn FnMut(&mut PackageDescriptor) -> Result<()> + 'a>;

/// Options for one customization pass.
pub struct CustomizeOptions<'a> {
    /// Embedded packages; workspace deps pointing at them resolve here first.
    pub embedded: &'a [ResolvedEmbedded],
    /// Classic yarn rewrites embedded deps in place; berry pins them through
    /// `resolutions` instead.
    pub is_yarn_v1: bool,
    /// Workspace index for workspace-protocol deps that are not embedded.
    pub monorepo: Option<&'a MonorepoIndex>,
    /// Shared-package rules; matching deps hoist to peer dependencies.
    pub shared: Option<&'a SharedPackagesRules>,
    /// Fields replaced outright on the descriptor.
    pub overriding: Map<String, Value>,
    /// Entries merged into the descriptor's `overrides`.
    pub additional_overrides: Map<String, Value>,
    /// Entries merged into the descriptor's `resolutions`.
    pub additional_resolutions: Map<String, Value>,
    /// Post-hook, e.g. peer-dependency aggregation.
    pub after: Option<AfterHook<'a>>,
}

impl Default for CustomizeOptions<'_> {
    fn default() -> Self {
        CustomizeOptions {
            embedded: &[],
            is_yarn_v1: false,
            monorepo: None,
            shared: None,
            overriding: Map::new(),
            additional_overrides: Map::new(),
            additional_resolutions: Map::new(),
            after: None,
        }
    }
}

/// Customize the descriptor at `path` (a directory or a descriptor file) and
/// write it back with stable formatting. Returns the rewritten descriptor.
pub fn customize_descriptor(
    path: &Path,
    mut opts: CustomizeOptions<'_>,
) -> Result<PackageDescriptor> {
    let mut desc = PackageDescriptor::load(path)?;

    for (key, value) in std::mem::take(&mut opts.overriding) {
        desc.set(key, value);
    }

    // A nested export output must never be publishable again.
    if let Some(files) = desc.files() {
        let filtered: Vec<String> = files
            .iter()
            .filter(|f| !f.starts_with("dist-dynamic/"))
            .cloned()
            .collect();
        if filtered.len() != files.len() {
            desc.set_files(filtered);
        }
    }

    for (dep, raw_spec) in desc.string_entries("dependencies") {
        let mut current = raw_spec.clone();

        if let VersionSpec::Workspace(ws) = VersionSpec::parse(&raw_spec) {
            current = resolve_workspace_dep(&dep, &raw_spec, &ws, &opts)?;
            desc.set_string_entry("dependencies", &dep, &current);
        }

        if opts.shared.is_some_and(|rules| rules.is_shared(&dep)) {
            desc.set_string_entry("peerDependencies", &dep, &current);
            desc.remove_string_entry("dependencies", &dep);
            continue;
        }

        if opts.is_yarn_v1 {
            if let Some(embedded) = opts.embedded.iter().find(|e| e.name == dep) {
                desc.set_string_entry("dependencies", &dep, &embedded.file_specifier());
            }
        }
    }

    desc.remove("devDependencies");

    merge_into_section(&mut desc, "overrides", &opts.additional_overrides);
    merge_into_section(&mut desc, "resolutions", &opts.additional_resolutions);
    desc.set_string_entry("overrides", UTF8_COMPAT_PIN.0, UTF8_COMPAT_PIN.1);
    desc.set_string_entry("resolutions", UTF8_COMPAT_PIN.0, UTF8_COMPAT_PIN.1);

    if let Some(after) = opts.after.as_mut() {
        after(&mut desc)?;
    }

    desc.save(path)?;
    Ok(desc)
}

fn resolve_workspace_dep(
    dep: &str,
    raw_spec: &str,
    ws: &crate::core::WorkspaceSpec,
    opts: &CustomizeOptions<'_>,
) -> Result<String> {
    if let Some(embedded) = opts.embedded.iter().find(|e| e.name == dep) {
        return Ok(ws.resolve(&embedded.version));
    }

    if let Some(monorepo) = opts.monorepo {
        let matches = monorepo.lookup(dep);
        if matches.len() > 1 {
            return Err(ExportError::DuplicateMonorepoPackage {
                package: dep.to_string(),
            }
            .into());
        }
        if let Some(pkg) = matches.first() {
            return Ok(ws.resolve(&pkg.version));
        }
    }

    Err(ExportError::UnresolvedWorkspaceDep {
        package: dep.to_string(),
        specifier: raw_spec.to_string(),
    }
    .into())
}

fn merge_into_section(desc: &mut PackageDescriptor, section: &str, entries: &Map<String, Value>) {
    if entries.is_empty() {
        return;
    }
    let existing = match desc.remove(section) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let mut merged = existing;
    for (key, value) in entries {
        merged.insert(key.clone(), value.clone());
    }
    desc.set(section, Value::Object(merged));
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn embedded(name: &str, version: &str) -> ResolvedEmbedded {
        ResolvedEmbedded {
            name: name.to_string(),
            version: Version::parse(version).unwrap(),
            dir: PathBuf::from("/unused"),
            parent_name: "@x/foo-backend".to_string(),
            already_packed: false,
        }
    }

    fn write_descriptor(tmp: &TempDir, content: &str) -> PathBuf {
        let path = tmp.path().join("package.json");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_shared_deps_hoist_to_peers() {
        let tmp = TempDir::new().unwrap();
        let path = write_descriptor(
            &tmp,
            r#"{
              "name": "@x/foo-backend",
              "version": "1.0.0",
              "dependencies": { "@backstage/core": "^1.0.0", "lodash": "^4.0.0" },
              "devDependencies": { "typescript": "^5.0.0" }
            }"#,
        );

        let rules = SharedPackagesRules::host_default();
        let desc = customize_descriptor(
            &path,
            CustomizeOptions {
                shared: Some(&rules),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            desc.string_entry("peerDependencies", "@backstage/core").as_deref(),
            Some("^1.0.0")
        );
        assert!(desc.string_entry("dependencies", "@backstage/core").is_none());
        assert_eq!(
            desc.string_entry("dependencies", "lodash").as_deref(),
            Some("^4.0.0")
        );
        assert!(desc.get("devDependencies").is_none());
        // Compatibility pin is always present.
        assert_eq!(
            desc.string_entry("resolutions", "@aws-sdk/util-utf8-browser").as_deref(),
            Some("npm:@smithy/util-utf8")
        );
    }

    #[test]
    fn test_workspace_dep_resolves_through_embedded() {
        let tmp = TempDir::new().unwrap();
        let path = write_descriptor(
            &tmp,
            r#"{
              "name": "@x/foo-backend",
              "version": "1.0.0",
              "dependencies": { "@x/foo-common": "workspace:^" }
            }"#,
        );

        let embedded = [embedded("@x/foo-common", "1.2.3")];
        let desc = customize_descriptor(
            &path,
            CustomizeOptions {
                embedded: &embedded,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            desc.string_entry("dependencies", "@x/foo-common").as_deref(),
            Some("^1.2.3")
        );
    }

    #[test]
    fn test_yarn_v1_rewrites_embedded_to_file_pointer() {
        let tmp = TempDir::new().unwrap();
        let path = write_descriptor(
            &tmp,
            r#"{
              "name": "@x/foo-backend",
              "version": "1.0.0",
              "dependencies": { "@x/foo-common": "workspace:~" }
            }"#,
        );

        let embedded = [embedded("@x/foo-common", "1.2.3")];
        let desc = customize_descriptor(
            &path,
            CustomizeOptions {
                embedded: &embedded,
                is_yarn_v1: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            desc.string_entry("dependencies", "@x/foo-common").as_deref(),
            Some("file:./embedded/x-foo-common")
        );
    }

    #[test]
    fn test_unresolved_workspace_dep_fails() {
        let tmp = TempDir::new().unwrap();
        let path = write_descriptor(
            &tmp,
            r#"{
              "name": "@x/foo-backend",
              "version": "1.0.0",
              "dependencies": { "@x/gone": "workspace:*" }
            }"#,
        );

        let err = customize_descriptor(&path, CustomizeOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExportError>(),
            Some(ExportError::UnresolvedWorkspaceDep { .. })
        ));
    }

    #[test]
    fn test_overriding_and_files_purge() {
        let tmp = TempDir::new().unwrap();
        let path = write_descriptor(
            &tmp,
            r#"{
              "name": "@x/foo-backend",
              "version": "1.0.0",
              "scripts": { "build": "tsc" },
              "files": ["dist/**", "dist-dynamic/package.json"]
            }"#,
        );

        let mut overriding = Map::new();
        overriding.insert("name".into(), json!("@x/foo-backend-dynamic"));
        overriding.insert("scripts".into(), json!({}));
        overriding.insert("bundleDependencies".into(), json!(true));

        let desc = customize_descriptor(
            &path,
            CustomizeOptions {
                overriding,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(desc.name().unwrap(), "@x/foo-backend-dynamic");
        assert_eq!(desc.get("scripts"), Some(&json!({})));
        assert_eq!(desc.get("bundleDependencies"), Some(&json!(true)));
        assert_eq!(desc.files().unwrap(), vec!["dist/**".to_string()]);
    }

    #[test]
    fn test_additional_resolutions_merge_and_after_hook() {
        let tmp = TempDir::new().unwrap();
        let path = write_descriptor(
            &tmp,
            r#"{
              "name": "@x/foo-backend",
              "version": "1.0.0",
              "resolutions": { "left-pad": "1.0.0" }
            }"#,
        );

        let mut additional = Map::new();
        additional.insert("@x/foo-common".into(), json!("file:./embedded/x-foo-common"));

        let mut hook_ran = false;
        let desc = customize_descriptor(
            &path,
            CustomizeOptions {
                additional_resolutions: additional,
                after: Some(Box::new(|d: &mut PackageDescriptor| {
                    d.set_string_entry("peerDependencies", "@backstage/core", "^1.0.0");
                    hook_ran = true;
                    Ok(())
                })),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(hook_ran);
        assert_eq!(
            desc.string_entry("resolutions", "left-pad").as_deref(),
            Some("1.0.0")
        );
        assert_eq!(
            desc.string_entry("resolutions", "@x/foo-common").as_deref(),
            Some("file:./embedded/x-foo-common")
        );
        assert_eq!(
            desc.string_entry("peerDependencies", "@backstage/core").as_deref(),
            Some("^1.0.0")
        );
    }

    #[test]
    fn test_customization_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = write_descriptor(
            &tmp,
            r#"{
              "name": "@x/foo-backend",
              "version": "1.0.0",
              "dependencies": { "@backstage/core": "^1.0.0", "lodash": "^4.0.0" }
            }"#,
        );

        let rules = SharedPackagesRules::host_default();
        customize_descriptor(
            &path,
            CustomizeOptions {
                shared: Some(&rules),
                ..Default::default()
            },
        )
        .unwrap();
        let first = fs::read_to_string(&path).unwrap();

        customize_descriptor(
            &path,
            CustomizeOptions {
                shared: Some(&rules),
                ..Default::default()
            },
        )
        .unwrap();
        let second = fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
    }
}
