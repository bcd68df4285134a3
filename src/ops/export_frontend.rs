//! Frontend export pipeline and the asset-producer contract.
//!
//! Frontend plugins ship bundled assets rather than an installable backend
//! tree: the pipeline dispatches one or both asset producers, packs the
//! publishable subset, customizes the descriptor, and installs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};

use crate::core::descriptor::PackageDescriptor;
use crate::ops::customize::{customize_descriptor, CustomizeOptions};
use crate::ops::errors::ExportError;
use crate::ops::export_backend::{
    find_lock_source, prepare_target, run_install, ExportOptions, DERIVED_NAME_SUFFIX, TARGET_DIR,
};
use crate::ops::lockfile::{detect_flavor, YarnFlavor, LOCKFILE_NAME};
use crate::util::fs as fsutil;
use crate::util::process::{ProcessBuilder, Task, TaskRunner};

/// Directory the Scalprum assets land in, inside the export target.
pub const SCALPRUM_ASSETS_DIR: &str = "dist-scalprum";

/// One asset-generation request.
pub struct AssetRequest<'a> {
    /// The plugin's descriptor at dispatch time.
    pub descriptor: &'a PackageDescriptor,
    /// The plugin source directory.
    pub plugin_dir: &'a Path,
    /// Where the produced assets must land.
    pub output_dir: &'a Path,
    /// Producer-specific configuration, when the pipeline resolved one.
    pub config: Option<&'a Value>,
}

/// Contract for the frontend asset generators. The production implementations
/// wrap the host ecosystem's bundler CLIs; tests substitute recorders.
pub trait AssetProducer {
    /// Short producer name for logging.
    fn kind(&self) -> &'static str;

    /// Generate assets for the request.
    fn produce(&self, request: &AssetRequest<'_>) -> Result<()>;
}

/// Scalprum asset generation via the host bundler CLI.
#[derive(Debug, Default)]
pub struct ScalprumAssetProducer;

impl AssetProducer for ScalprumAssetProducer {
    fn kind(&self) -> &'static str {
        "scalprum"
    }

    fn produce(&self, request: &AssetRequest<'_>) -> Result<()> {
        let config = request
            .config
            .context("scalprum asset generation requires a resolved config")?;
        let config_file = tempfile::Builder::new()
            .prefix("scalprum-config")
            .suffix(".json")
            .tempfile()
            .context("failed to stage the scalprum config")?;
        fsutil::write_string(config_file.path(), &serde_json::to_string_pretty(config)?)?;

        TaskRunner::new().run(&Task::new(
            "generating scalprum assets",
            ProcessBuilder::new("npx")
                .args(["scalprum-build", "--config"])
                .arg(config_file.path())
                .arg("--output")
                .arg(request.output_dir)
                .cwd(request.plugin_dir),
        ))?;
        Ok(())
    }
}

/// Module-federation asset generation via the host bundler CLI.
#[derive(Debug, Default)]
pub struct ModuleFederationAssetProducer;

impl AssetProducer for ModuleFederationAssetProducer {
    fn kind(&self) -> &'static str {
        "module-federation"
    }

    fn produce(&self, request: &AssetRequest<'_>) -> Result<()> {
        TaskRunner::new().run(&Task::new(
            "generating module-federation assets",
            ProcessBuilder::new("npx")
                .args(["module-federation-build", "--output"])
                .arg(request.output_dir)
                .cwd(request.plugin_dir),
        ))?;
        Ok(())
    }
}

/// Frontend-specific export options.
#[derive(Debug, Clone)]
pub struct FrontendOptions {
    /// Options shared with the backend pipeline.
    pub base: ExportOptions,
    /// Generate Scalprum assets.
    pub generate_scalprum: bool,
    /// Generate module-federation assets.
    pub generate_module_federation: bool,
    /// Explicit Scalprum config file, overriding the descriptor's inline
    /// config.
    pub scalprum_config: Option<PathBuf>,
}

impl Default for FrontendOptions {
    fn default() -> Self {
        FrontendOptions {
            base: ExportOptions::default(),
            generate_scalprum: true,
            generate_module_federation: false,
            scalprum_config: None,
        }
    }
}

/// Resolve the Scalprum config: an explicit file wins, then the descriptor's
/// inline `scalprum` field, then the conventional default.
pub fn resolve_scalprum_config(
    scalprum_config: Option<&Path>,
    descriptor: &PackageDescriptor,
) -> Result<Value> {
    if let Some(path) = scalprum_config {
        let content = fsutil::read_to_string(path)?;
        let config: Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid scalprum config: {}", path.display()))?;
        return Ok(config);
    }
    if let Some(inline) = descriptor.get("scalprum") {
        return Ok(inline.clone());
    }
    Ok(json!({
        "name": scalprum_name(descriptor.name()?),
        "exposedModules": { "PluginRoot": "./src/index.ts" }
    }))
}

/// Sanitize a package name into a Scalprum scope name: the leading `@` is
/// dropped and `/` becomes `.`.
fn scalprum_name(package_name: &str) -> String {
    package_name.trim_start_matches('@').replace('/', ".")
}

/// Export a frontend plugin into `dist-dynamic/`. Returns the target
/// directory.
pub fn export_frontend(
    plugin_dir: &Path,
    opts: &FrontendOptions,
    scalprum: &dyn AssetProducer,
    module_federation: &dyn AssetProducer,
) -> Result<PathBuf> {
    if !opts.generate_scalprum && !opts.generate_module_federation {
        return Err(ExportError::NoFrontendAssetsRequested.into());
    }

    let source = PackageDescriptor::load(plugin_dir)?;
    let source_name = source.name()?.to_string();
    let derived_name = format!("{}{}", source_name, DERIVED_NAME_SUFFIX);

    if opts.generate_module_federation {
        let dist = plugin_dir.join("dist");
        if opts.base.clean {
            fsutil::remove_dir_all_if_exists(&dist)?;
        }
        tracing::info!("dispatching {} assets for {}", module_federation.kind(), source_name);
        module_federation.produce(&AssetRequest {
            descriptor: &source,
            plugin_dir,
            output_dir: &dist,
            config: None,
        })?;
    }

    let target = plugin_dir.join(TARGET_DIR);
    prepare_target(&target, opts.base.clean, opts.base.track_manifest_and_lock)?;

    pack_and_customize(plugin_dir, &source, &derived_name, &target, opts)?;

    if opts.generate_scalprum {
        let mut config = resolve_scalprum_config(opts.scalprum_config.as_deref(), &source)?;
        if let Value::Object(map) = &mut config {
            map.insert("version".into(), json!(source.version_str().unwrap_or("")));
        }
        let assets_dir = target.join(SCALPRUM_ASSETS_DIR);
        tracing::info!("dispatching {} assets for {}", scalprum.kind(), source_name);
        scalprum.produce(&AssetRequest {
            descriptor: &source,
            plugin_dir,
            output_dir: &assets_dir,
            config: Some(&config),
        })?;
    }

    let target_lock = target.join(LOCKFILE_NAME);
    let had_target_lock = target_lock.is_file();
    if !had_target_lock {
        match find_lock_source(plugin_dir) {
            Some(source_lock) => fsutil::copy_file_with_parents(&source_lock, &target_lock)?,
            None => bail!(
                "no {} found in {} or the monorepo root; a lock file is required",
                LOCKFILE_NAME,
                plugin_dir.display()
            ),
        }
    }

    if opts.base.run_install {
        let flavor = detect_flavor(&fsutil::read_to_string(&target_lock)?);
        run_install(&target, flavor, had_target_lock)?;
    }

    if let Some(root) = &opts.base.dev_install_root {
        let dest = root.join(crate::core::embedded_slug(&derived_name));
        fsutil::remove_dir_all_if_exists(&dest)?;
        fsutil::copy_tree(&target, &dest, &[])?;
    }

    tracing::info!("exported {} to {}", derived_name, target.display());
    Ok(target)
}

fn pack_and_customize(
    plugin_dir: &Path,
    source: &PackageDescriptor,
    derived_name: &str,
    target: &Path,
    opts: &FrontendOptions,
) -> Result<()> {
    use crate::ops::pack::pack_production;

    pack_production(plugin_dir, source, target)?;
    fsutil::remove_dir_all_if_exists(&target.join(TARGET_DIR))?;

    let mut overriding = Map::new();
    overriding.insert("name".into(), json!(derived_name));
    overriding.insert("scripts".into(), json!({}));
    if opts.generate_scalprum {
        if let Some(mut files) = source.files() {
            if !files.iter().any(|f| f == SCALPRUM_ASSETS_DIR) {
                files.push(SCALPRUM_ASSETS_DIR.to_string());
            }
            overriding.insert("files".into(), json!(files));
        }
    }

    let flavor = match find_lock_source(plugin_dir) {
        Some(path) => detect_flavor(&fsutil::read_to_string(&path)?),
        None => YarnFlavor::Classic,
    };

    customize_descriptor(
        target,
        CustomizeOptions {
            is_yarn_v1: flavor.is_v1(),
            shared: Some(&opts.base.shared_rules),
            overriding,
            ..Default::default()
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::TempDir;

    /// Producer that records what it was asked to build.
    #[derive(Default)]
    struct RecordingProducer {
        requests: RefCell<Vec<(PathBuf, Option<Value>)>>,
    }

    impl AssetProducer for RecordingProducer {
        fn kind(&self) -> &'static str {
            "recording"
        }

        fn produce(&self, request: &AssetRequest<'_>) -> Result<()> {
            self.requests
                .borrow_mut()
                .push((request.output_dir.to_path_buf(), request.config.cloned()));
            Ok(())
        }
    }

    fn write_frontend_plugin(dir: &Path, descriptor: &str) {
        fs::create_dir_all(dir.join("dist")).unwrap();
        fs::write(dir.join("dist/index.esm.js"), "export {};").unwrap();
        fs::write(dir.join("package.json"), descriptor).unwrap();
        fs::write(dir.join("yarn.lock"), "# yarn lockfile v1\n").unwrap();
    }

    fn no_install_opts() -> FrontendOptions {
        FrontendOptions {
            base: ExportOptions {
                run_install: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_scalprum_export() {
        let tmp = TempDir::new().unwrap();
        write_frontend_plugin(
            tmp.path(),
            r#"{ "name": "@x/bar", "version": "1.0.0", "role": "frontend-plugin",
                 "files": ["dist/**"] }"#,
        );

        let scalprum = RecordingProducer::default();
        let module_federation = RecordingProducer::default();
        let target =
            export_frontend(tmp.path(), &no_install_opts(), &scalprum, &module_federation)
                .unwrap();

        // Scalprum was dispatched with the conventional default config.
        let requests = scalprum.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, target.join(SCALPRUM_ASSETS_DIR));
        assert_eq!(
            requests[0].1,
            Some(json!({
                "name": "x.bar",
                "exposedModules": { "PluginRoot": "./src/index.ts" },
                "version": "1.0.0"
            }))
        );
        assert!(module_federation.requests.borrow().is_empty());

        let derived = PackageDescriptor::load(&target).unwrap();
        assert_eq!(derived.name().unwrap(), "@x/bar-dynamic");
        assert_eq!(derived.get("scripts"), Some(&json!({})));
        assert!(derived.files().unwrap().contains(&SCALPRUM_ASSETS_DIR.to_string()));
    }

    #[test]
    fn test_inline_scalprum_config_wins_over_default() {
        let tmp = TempDir::new().unwrap();
        write_frontend_plugin(
            tmp.path(),
            r#"{ "name": "@x/bar", "version": "2.0.0", "role": "frontend-plugin",
                 "scalprum": { "name": "custom.bar", "exposedModules": { "Root": "./src/root.tsx" } } }"#,
        );

        let scalprum = RecordingProducer::default();
        let module_federation = RecordingProducer::default();
        export_frontend(tmp.path(), &no_install_opts(), &scalprum, &module_federation).unwrap();

        let requests = scalprum.requests.borrow();
        assert_eq!(
            requests[0].1,
            Some(json!({
                "name": "custom.bar",
                "exposedModules": { "Root": "./src/root.tsx" },
                "version": "2.0.0"
            }))
        );
    }

    #[test]
    fn test_config_file_wins_over_inline() {
        let tmp = TempDir::new().unwrap();
        write_frontend_plugin(
            tmp.path(),
            r#"{ "name": "@x/bar", "version": "1.0.0",
                 "scalprum": { "name": "inline.bar" } }"#,
        );
        let config_path = tmp.path().join("scalprum.json");
        fs::write(&config_path, r#"{ "name": "file.bar" }"#).unwrap();

        let desc = PackageDescriptor::load(tmp.path()).unwrap();
        let config = resolve_scalprum_config(Some(&config_path), &desc).unwrap();
        assert_eq!(config, json!({ "name": "file.bar" }));
    }

    #[test]
    fn test_module_federation_outputs_into_dist() {
        let tmp = TempDir::new().unwrap();
        write_frontend_plugin(
            tmp.path(),
            r#"{ "name": "@x/bar", "version": "1.0.0", "files": ["dist/**"] }"#,
        );

        let scalprum = RecordingProducer::default();
        let module_federation = RecordingProducer::default();
        let opts = FrontendOptions {
            generate_scalprum: false,
            generate_module_federation: true,
            ..no_install_opts()
        };
        export_frontend(tmp.path(), &opts, &scalprum, &module_federation).unwrap();

        let requests = module_federation.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, tmp.path().join("dist"));
        assert!(scalprum.requests.borrow().is_empty());
    }

    #[test]
    fn test_no_assets_requested_fails() {
        let tmp = TempDir::new().unwrap();
        write_frontend_plugin(tmp.path(), r#"{ "name": "@x/bar", "version": "1.0.0" }"#);

        let opts = FrontendOptions {
            generate_scalprum: false,
            generate_module_federation: false,
            ..no_install_opts()
        };
        let err = export_frontend(
            tmp.path(),
            &opts,
            &RecordingProducer::default(),
            &RecordingProducer::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ExportError>(),
            Some(ExportError::NoFrontendAssetsRequested)
        ));
    }
}
