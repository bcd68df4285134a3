//! `drydock export` command

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::cli::ExportArgs;
use drydock::core::{PackageDescriptor, SharedPackagesRules};
use drydock::ops::export_backend::{export_backend, ExportOptions, TARGET_DIR};
use drydock::ops::export_frontend::{
    export_frontend, FrontendOptions, ModuleFederationAssetProducer, ScalprumAssetProducer,
};
use drydock::ops::NodeModuleLoader;

pub fn execute(args: ExportArgs) -> Result<()> {
    let plugin_dir = match args.path {
        Some(ref path) => path
            .canonicalize()
            .with_context(|| format!("no such plugin directory: {}", path.display()))?,
        None => std::env::current_dir()?,
    };

    let descriptor = PackageDescriptor::load(&plugin_dir)?;
    let Some(role) = descriptor.role() else {
        bail!(
            "`{}` has no role; only plugin packages can be exported",
            descriptor.name()?
        );
    };

    let dev_install_root = if args.dev {
        Some(dev_root(&args.dynamic_plugins_root, &plugin_dir))
    } else {
        None
    };

    let base = ExportOptions {
        embed_packages: args.embed_package.clone(),
        shared_rules: SharedPackagesRules::from_cli_values(&args.shared_package)?,
        allow_native_packages: args.allow_native_package.clone(),
        suppress_native_packages: args.suppress_native_package.clone(),
        ignore_version_check: args.ignore_version_check.clone(),
        run_install: !args.no_install,
        run_build: !args.no_build,
        clean: args.clean,
        track_manifest_and_lock: args.track_dynamic_manifest_and_lock_file,
        dev_install_root,
    };

    if role.is_backend() {
        let mut loader = NodeModuleLoader::new(plugin_dir.join(TARGET_DIR));
        export_backend(&plugin_dir, &base, &mut loader)?;
    } else if role.is_frontend() {
        let opts = FrontendOptions {
            base,
            generate_scalprum: args.scalprum_requested(),
            generate_module_federation: args.module_federation_requested(),
            scalprum_config: args.scalprum_config.clone(),
        };
        export_frontend(
            &plugin_dir,
            &opts,
            &ScalprumAssetProducer,
            &ModuleFederationAssetProducer,
        )?;
    } else {
        bail!(
            "role `{}` cannot be exported as a dynamic plugin",
            role.as_str()
        );
    }

    Ok(())
}

/// The dev host's dynamic plugins root: explicit flag, else the conventional
/// sibling directory of the plugin.
fn dev_root(explicit: &Option<PathBuf>, plugin_dir: &std::path::Path) -> PathBuf {
    match explicit {
        Some(root) => root.clone(),
        None => plugin_dir
            .parent()
            .unwrap_or(plugin_dir)
            .join("dynamic-plugins-root"),
    }
}
