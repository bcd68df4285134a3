//! Native-module gatekeeping.
//!
//! A dynamic plugin artifact must be loadable on any host; packages that
//! compile native code at install time are rejected unless explicitly
//! allowed, or replaced by throwing stubs when suppressed.

use std::path::Path;

use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use walkdir::WalkDir;

use crate::core::descriptor::{PackageDescriptor, DESCRIPTOR_FILE};
use crate::core::embedded_slug;
use crate::ops::errors::ExportError;
use crate::util::fs;

/// Install-time script fragments that betray a native build.
const NATIVE_SCRIPT_PATTERN: &str =
    r"(node-gyp|node-pre-gyp|prebuild-install|cmake-js|\bgcc\b|\bg\+\+\b|\bclang\b|\bmake\b)";

/// Whether a descriptor declares a native build.
fn is_native_descriptor(descriptor: &PackageDescriptor, dir: &Path, script_re: &Regex) -> bool {
    if descriptor
        .get("gypfile")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return true;
    }
    if dir.join("binding.gyp").is_file() {
        return true;
    }
    for script in ["install", "preinstall"] {
        if let Some(Value::Object(scripts)) = descriptor.get("scripts") {
            if let Some(cmd) = scripts.get(script).and_then(Value::as_str) {
                if script_re.is_match(cmd) {
                    return true;
                }
            }
        }
    }
    false
}

/// Scan an installed tree for native packages, returning their names sorted
/// and deduplicated.
pub fn scan_native_packages(target: &Path) -> Result<Vec<String>> {
    let script_re = Regex::new(NATIVE_SCRIPT_PATTERN).expect("native script pattern is valid");
    let node_modules = target.join("node_modules");
    if !node_modules.is_dir() {
        return Ok(Vec::new());
    }

    let mut natives = Vec::new();
    for entry in WalkDir::new(&node_modules)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_name() != DESCRIPTOR_FILE || !entry.file_type().is_file() {
            continue;
        }
        let Some(pkg_dir) = entry.path().parent() else {
            continue;
        };
        // Only descriptors at a package root, i.e. directly under a
        // node_modules level (or its scope directory).
        let Some(parent) = pkg_dir.parent() else {
            continue;
        };
        let at_package_root = parent.file_name().is_some_and(|n| n == "node_modules")
            || parent
                .parent()
                .and_then(|p| p.file_name())
                .is_some_and(|n| n == "node_modules");
        if !at_package_root {
            continue;
        }

        let Ok(descriptor) = PackageDescriptor::load(pkg_dir) else {
            continue;
        };
        if is_native_descriptor(&descriptor, pkg_dir, &script_re) {
            if let Ok(name) = descriptor.name() {
                natives.push(name.to_string());
            }
        }
    }

    natives.sort();
    natives.dedup();
    Ok(natives)
}

/// Fail the export when the installed tree carries native packages outside
/// the allowlist.
pub fn check_native_packages(target: &Path, allowed: &[String]) -> Result<()> {
    let natives = scan_native_packages(target)?;
    let forbidden: Vec<String> = natives
        .into_iter()
        .filter(|name| !allowed.iter().any(|a| a == name))
        .collect();

    if forbidden.is_empty() {
        return Ok(());
    }
    Err(ExportError::NativePackageForbidden {
        packages: forbidden,
    }
    .into())
}

/// Materialize a throwing stub for a suppressed native package under
/// `embedded/`. Returns the stub's directory name.
pub fn write_native_stub(target: &Path, name: &str) -> Result<String> {
    let slug = embedded_slug(name);
    let stub_dir = target.join("embedded").join(&slug);

    let mut descriptor = PackageDescriptor::new();
    descriptor.set("name", Value::String(name.to_string()));
    descriptor.set("main", Value::String("index.js".to_string()));
    descriptor.save(&stub_dir.join(DESCRIPTOR_FILE))?;

    let index = format!(
        "throw new Error(\n  'Native package {} is not available in this dynamic plugin; it was suppressed at export time.'\n);\n",
        name
    );
    fs::write_string(&stub_dir.join("index.js"), &index)?;

    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::TempDir;

    fn install_package(target: &Path, name: &str, descriptor: &str) -> std::path::PathBuf {
        let dir = target.join("node_modules").join(name);
        stdfs::create_dir_all(&dir).unwrap();
        stdfs::write(dir.join(DESCRIPTOR_FILE), descriptor).unwrap();
        dir
    }

    #[test]
    fn test_binding_gyp_marks_native() {
        let tmp = TempDir::new().unwrap();
        let dir = install_package(
            tmp.path(),
            "better-sqlite3",
            r#"{ "name": "better-sqlite3", "version": "9.0.0" }"#,
        );
        stdfs::write(dir.join("binding.gyp"), "{}").unwrap();

        assert_eq!(
            scan_native_packages(tmp.path()).unwrap(),
            vec!["better-sqlite3"]
        );
    }

    #[test]
    fn test_install_script_marks_native() {
        let tmp = TempDir::new().unwrap();
        install_package(
            tmp.path(),
            "cpu-features",
            r#"{ "name": "cpu-features", "version": "0.0.10",
                 "scripts": { "install": "node-gyp rebuild" } }"#,
        );
        install_package(
            tmp.path(),
            "lodash",
            r#"{ "name": "lodash", "version": "4.17.21" }"#,
        );

        assert_eq!(
            scan_native_packages(tmp.path()).unwrap(),
            vec!["cpu-features"]
        );
    }

    #[test]
    fn test_scoped_package_scan() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("node_modules/@org/native-lib");
        stdfs::create_dir_all(&dir).unwrap();
        stdfs::write(
            dir.join(DESCRIPTOR_FILE),
            r#"{ "name": "@org/native-lib", "version": "1.0.0", "gypfile": true }"#,
        )
        .unwrap();

        assert_eq!(
            scan_native_packages(tmp.path()).unwrap(),
            vec!["@org/native-lib"]
        );
    }

    #[test]
    fn test_allowlist_permits_native() {
        let tmp = TempDir::new().unwrap();
        let dir = install_package(
            tmp.path(),
            "better-sqlite3",
            r#"{ "name": "better-sqlite3", "version": "9.0.0" }"#,
        );
        stdfs::write(dir.join("binding.gyp"), "{}").unwrap();

        let err = check_native_packages(tmp.path(), &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExportError>(),
            Some(ExportError::NativePackageForbidden { packages }) if packages == &["better-sqlite3"]
        ));

        check_native_packages(tmp.path(), &["better-sqlite3".to_string()]).unwrap();
    }

    #[test]
    fn test_stub_throws_on_load() {
        let tmp = TempDir::new().unwrap();
        let slug = write_native_stub(tmp.path(), "better-sqlite3").unwrap();
        assert_eq!(slug, "better-sqlite3");

        let stub = tmp.path().join("embedded/better-sqlite3");
        let descriptor = PackageDescriptor::load(&stub).unwrap();
        assert_eq!(descriptor.main_module(), Some("index.js"));

        let index = stdfs::read_to_string(stub.join("index.js")).unwrap();
        assert!(index.starts_with("throw new Error"));
        assert!(index.contains("better-sqlite3"));
    }
}
