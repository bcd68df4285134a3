//! Backend entrypoint validation.
//!
//! The only step that executes plugin code: the exported package's entry
//! module is loaded and its exports inspected. Loading happens behind the
//! [`ModuleLoader`] trait so tests never spawn a runtime.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::descriptor::DESCRIPTOR_FILE;
use crate::ops::errors::ExportError;
use crate::util::process::ProcessBuilder;

/// Discriminators a plugin's default export may carry.
const KNOWN_PLUGIN_DISCRIMINATORS: &[&str] = &[
    "@backstage/BackendFeature",
    "@backstage/BackendFeatureFactory",
];

/// Named export recognized as a legacy plugin installer.
const INSTALLER_EXPORT: &str = "dynamicPluginInstaller";

/// TypeScript loaders, tried in order. The host transformer understands the
/// host's config conventions; plain ts-node is the generic fallback.
const TS_TRANSFORMERS: &[&str] = &["@backstage/cli/config/nodeTransform.cjs", "ts-node/register"];

/// What a module exported, as observed by the loader.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadedExports {
    /// Discriminator of the default export's tagged value, when present.
    #[serde(default)]
    pub default_discriminator: Option<String>,
    /// Names of the module's named exports.
    #[serde(default)]
    pub named_exports: Vec<String>,
    /// Load failure message, when the module could not be required.
    #[serde(default)]
    pub error: Option<String>,
}

impl LoadedExports {
    /// Whether these exports satisfy the dynamic plugin contract.
    pub fn is_plugin(&self) -> bool {
        if self.error.is_some() {
            return false;
        }
        let tagged = self
            .default_discriminator
            .as_deref()
            .is_some_and(|d| KNOWN_PLUGIN_DISCRIMINATORS.contains(&d));
        tagged || self.named_exports.iter().any(|n| n == INSTALLER_EXPORT)
    }
}

/// Loads a package's entry module and reports its exports.
pub trait ModuleLoader {
    /// Arrange for TypeScript sources to load on the next [`load`] call.
    /// Returns false when no transformer is available (a warning, not an
    /// error).
    fn register_ts_transformer(&mut self) -> Result<bool>;

    /// Load the package at `dir` and inspect its exports.
    fn load(&self, dir: &Path) -> Result<LoadedExports>;
}

/// Production loader: spawns the node runtime with an inline probe script.
#[derive(Debug)]
pub struct NodeModuleLoader {
    /// Directory require-specifiers resolve from.
    root: PathBuf,
    /// Modules preloaded with `-r`, e.g. a TypeScript transformer.
    preload: Vec<String>,
}

const PROBE_SCRIPT: &str = r#"
const target = process.argv[1];
const out = { named_exports: [] };
try {
  const mod = require(target);
  out.named_exports = Object.keys(mod || {});
  const def = mod && mod.default;
  if (def != null && typeof def.$$type === 'string') {
    out.default_discriminator = def.$$type;
  }
} catch (err) {
  out.error = String((err && err.message) || err);
}
console.log(JSON.stringify(out));
"#;

impl NodeModuleLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        NodeModuleLoader {
            root: root.into(),
            preload: Vec::new(),
        }
    }
}

impl ModuleLoader for NodeModuleLoader {
    fn register_ts_transformer(&mut self) -> Result<bool> {
        for candidate in TS_TRANSFORMERS {
            let probe = ProcessBuilder::new("node")
                .cwd(&self.root)
                .args(["-e", &format!("require.resolve('{}')", candidate)]);
            if probe.exec().map(|o| o.status.success()).unwrap_or(false) {
                tracing::debug!("using TypeScript transformer `{}`", candidate);
                self.preload.push(candidate.to_string());
                return Ok(true);
            }
        }
        tracing::warn!("no TypeScript transformer found; source entrypoints cannot be loaded");
        Ok(false)
    }

    fn load(&self, dir: &Path) -> Result<LoadedExports> {
        let mut process = ProcessBuilder::new("node").cwd(&self.root);
        for module in &self.preload {
            process = process.args(["-r", module]);
        }
        let dir = dir
            .canonicalize()
            .unwrap_or_else(|_| dir.to_path_buf());
        let output = process
            .args(["-e", PROBE_SCRIPT])
            .arg(&dir)
            .exec()
            .context("failed to run the node runtime for entrypoint validation")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().last().map(serde_json::from_str) {
            Some(Ok(exports)) => Ok(exports),
            _ => Ok(LoadedExports {
                error: Some(format!(
                    "probe produced no report (exit code {:?}): {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                )),
                ..Default::default()
            }),
        }
    }
}

fn looks_like_ts_failure(error: &str) -> bool {
    error.contains("Unexpected token")
        || error.contains("Cannot use import statement")
        || error.contains(".ts")
}

/// Validate that the exported package at `target` is loadable as a dynamic
/// plugin.
pub fn validate_entrypoint(
    target: &Path,
    package_name: &str,
    loader: &mut dyn ModuleLoader,
) -> Result<()> {
    let mut exports = loader.load(target)?;

    if let Some(error) = exports.error.clone() {
        if looks_like_ts_failure(&error) && loader.register_ts_transformer()? {
            exports = loader.load(target)?;
        }
    }

    let mut candidates = vec![exports];
    let alpha = target.join("alpha");
    if alpha.join(DESCRIPTOR_FILE).is_file() {
        candidates.push(loader.load(&alpha)?);
    }

    if candidates.iter().any(LoadedExports::is_plugin) {
        return Ok(());
    }

    let detail = candidates
        .iter()
        .find_map(|c| c.error.clone())
        .unwrap_or_else(|| {
            "the module loads but exports neither a tagged plugin default nor a \
             `dynamicPluginInstaller`"
                .to_string()
        });
    Err(ExportError::InvalidPluginEntrypoint {
        package: package_name.to_string(),
        detail,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Loader that reports a fixed set of exports for every module.
    struct FakeLoader {
        response: LoadedExports,
        transformer_available: bool,
        transformer_registered: bool,
    }

    impl FakeLoader {
        fn new(response: LoadedExports) -> Self {
            FakeLoader {
                response,
                transformer_available: true,
                transformer_registered: false,
            }
        }
    }

    impl ModuleLoader for FakeLoader {
        fn register_ts_transformer(&mut self) -> Result<bool> {
            self.transformer_registered = true;
            Ok(self.transformer_available)
        }

        fn load(&self, _dir: &Path) -> Result<LoadedExports> {
            Ok(self.response.clone())
        }
    }

    fn tagged(discriminator: &str) -> LoadedExports {
        LoadedExports {
            default_discriminator: Some(discriminator.to_string()),
            named_exports: vec!["default".to_string()],
            error: None,
        }
    }

    #[test]
    fn test_tagged_default_export_is_valid() {
        let tmp = TempDir::new().unwrap();
        let mut loader = FakeLoader::new(tagged("@backstage/BackendFeature"));

        validate_entrypoint(tmp.path(), "@x/foo-backend", &mut loader).unwrap();
    }

    #[test]
    fn test_installer_export_is_valid() {
        let tmp = TempDir::new().unwrap();
        let mut loader = FakeLoader::new(LoadedExports {
            default_discriminator: None,
            named_exports: vec![INSTALLER_EXPORT.to_string()],
            error: None,
        });

        validate_entrypoint(tmp.path(), "@x/foo-backend", &mut loader).unwrap();
    }

    #[test]
    fn test_unrecognized_exports_fail() {
        let tmp = TempDir::new().unwrap();
        let mut loader = FakeLoader::new(LoadedExports {
            default_discriminator: Some("not-a-plugin".to_string()),
            named_exports: vec!["helper".to_string()],
            error: None,
        });

        let err = validate_entrypoint(tmp.path(), "@x/foo-backend", &mut loader).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExportError>(),
            Some(ExportError::InvalidPluginEntrypoint { package, .. }) if package == "@x/foo-backend"
        ));
    }

    #[test]
    fn test_ts_failure_triggers_transformer_registration() {
        let tmp = TempDir::new().unwrap();
        let mut loader = FakeLoader::new(LoadedExports {
            error: Some("Unexpected token 'export'".to_string()),
            ..Default::default()
        });

        let result = validate_entrypoint(tmp.path(), "@x/foo-backend", &mut loader);
        assert!(result.is_err());
        assert!(loader.transformer_registered);
    }

    #[test]
    fn test_alpha_submodule_is_probed() {
        let tmp = TempDir::new().unwrap();
        let alpha = tmp.path().join("alpha");
        fs::create_dir_all(&alpha).unwrap();
        fs::write(
            alpha.join(DESCRIPTOR_FILE),
            r#"{ "name": "@x/foo-backend/alpha", "version": "0.0.0" }"#,
        )
        .unwrap();

        // The alpha submodule is probed alongside the main module; a valid
        // report from either satisfies the check.
        let mut loader = FakeLoader::new(tagged("@backstage/BackendFeatureFactory"));
        validate_entrypoint(tmp.path(), "@x/foo-backend", &mut loader).unwrap();
    }
}
