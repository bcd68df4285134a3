//! Backend export pipeline.
//!
//! Orchestrates a backend plugin export end to end: embedding resolution,
//! production packing, descriptor customization, the private install, and the
//! post-install gates (shared leakage, native modules, entrypoint load). The
//! pipeline is strictly sequential; `dist-dynamic/` is its only mutable
//! resource.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{json, Map};

use crate::core::descriptor::PackageDescriptor;
use crate::core::embedded_slug;
use crate::core::monorepo::MonorepoIndex;
use crate::core::shared::SharedPackagesRules;
use crate::core::spec::narrower_range;
use crate::ops::customize::{customize_descriptor, CustomizeOptions};
use crate::ops::embed::{resolve_embedded, NodeModulesResolver};
use crate::ops::entrypoint::{validate_entrypoint, ModuleLoader};
use crate::ops::errors::ExportError;
use crate::ops::lockfile::{
    check_shared_leakage, detect_flavor, Lockfile, YarnFlavor, LOCKFILE_NAME,
};
use crate::ops::native::{check_native_packages, write_native_stub};
use crate::ops::pack::pack_production;
use crate::util::fs as fsutil;
use crate::util::process::{ProcessBuilder, Task, TaskRunner};

/// The export output directory, relative to the plugin.
pub const TARGET_DIR: &str = "dist-dynamic";

/// Suffix appended to the derived package's name.
pub const DERIVED_NAME_SUFFIX: &str = "-dynamic";

/// Options shared by the backend and frontend pipelines.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Seed list for the embedding resolver.
    pub embed_packages: Vec<String>,
    /// Shared-package rules.
    pub shared_rules: SharedPackagesRules,
    /// Native packages tolerated in the installed tree.
    pub allow_native_packages: Vec<String>,
    /// Native packages replaced by throwing stubs.
    pub suppress_native_packages: Vec<String>,
    /// Peer-dependency names exempt from the range conflict check.
    pub ignore_version_check: Vec<String>,
    /// Run the package-manager install in the target.
    pub run_install: bool,
    /// Run build scripts before packing.
    pub run_build: bool,
    /// Wipe the target directory first.
    pub clean: bool,
    /// Leave the derived manifest and lock file visible to version control.
    pub track_manifest_and_lock: bool,
    /// Copy the finished export under this directory for a dev host.
    pub dev_install_root: Option<PathBuf>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            embed_packages: Vec::new(),
            shared_rules: SharedPackagesRules::host_default(),
            allow_native_packages: Vec::new(),
            suppress_native_packages: Vec::new(),
            ignore_version_check: Vec::new(),
            run_install: true,
            run_build: true,
            clean: false,
            track_manifest_and_lock: false,
            dev_install_root: None,
        }
    }
}

/// An aggregated peer-dependency range and the embedded package that
/// contributed it.
#[derive(Debug, Clone)]
struct PeerRange {
    range: String,
    module: String,
}

/// Merge one peer-dependency edge into the aggregator.
///
/// Intersecting ranges keep the narrower one; disjoint ranges are a conflict
/// unless the package is in the ignore set, in which case the existing range
/// wins.
fn merge_peer_range(
    target: &mut BTreeMap<String, PeerRange>,
    name: &str,
    range: &str,
    module: &str,
    ignore: &[String],
) -> Result<(), ExportError> {
    let existing = match target.get(name) {
        Some(existing) => existing.clone(),
        None => {
            target.insert(
                name.to_string(),
                PeerRange {
                    range: range.to_string(),
                    module: module.to_string(),
                },
            );
            return Ok(());
        }
    };

    match narrower_range(&existing.range, range) {
        Some(narrower) => {
            if narrower != existing.range {
                let narrower = narrower.to_string();
                target.insert(
                    name.to_string(),
                    PeerRange {
                        range: narrower,
                        module: module.to_string(),
                    },
                );
            }
            Ok(())
        }
        None if ignore.iter().any(|i| i == name) => Ok(()),
        None => Err(ExportError::PeerDependencyConflict {
            package: name.to_string(),
            existing: existing.range,
            incoming: range.to_string(),
            module: module.to_string(),
        }),
    }
}

/// Export a backend plugin into `dist-dynamic/`. Returns the target
/// directory.
pub fn export_backend(
    plugin_dir: &Path,
    opts: &ExportOptions,
    loader: &mut dyn ModuleLoader,
) -> Result<PathBuf> {
    let runner = TaskRunner::new();
    let source = PackageDescriptor::load(plugin_dir)?;
    let source_name = source.name()?.to_string();
    if source.is_bundled() {
        return Err(ExportError::BundledPackageRejected {
            package: source_name,
        }
        .into());
    }
    let derived_name = format!("{}{}", source_name, DERIVED_NAME_SUFFIX);

    let monorepo = MonorepoIndex::load_for(plugin_dir)?;
    let embedded = resolve_embedded(
        &source,
        plugin_dir,
        &opts.embed_packages,
        &monorepo,
        &NodeModulesResolver,
    )?;

    let target = plugin_dir.join(TARGET_DIR);
    prepare_target(&target, opts.clean, opts.track_manifest_and_lock)?;

    let mut stub_names = Vec::new();
    for name in &opts.suppress_native_packages {
        tracing::info!("suppressing native package `{}`", name);
        write_native_stub(&target, name)?;
        stub_names.push(name.clone());
    }

    // The yarn generation decides how embedded packages are pinned, so it is
    // detected before any descriptor is customized.
    let lock_source = find_lock_source(plugin_dir);
    let flavor = match &lock_source {
        Some(path) => detect_flavor(&fsutil::read_to_string(path)?),
        None => YarnFlavor::Classic,
    };

    let mut aggregated_peers: BTreeMap<String, PeerRange> = BTreeMap::new();

    for e in &embedded {
        let embedded_desc = PackageDescriptor::load(&e.dir)?;
        if opts.run_build && !e.already_packed && embedded_desc.has_script("build") {
            runner.run(&Task::new(
                format!("building embedded package {}", e.name),
                ProcessBuilder::new("yarn").args(["run", "build"]).cwd(&e.dir),
            ))?;
        }

        let dest = target.join("embedded").join(e.slug());
        pack_production(&e.dir, &embedded_desc, &dest)?;
        if e.already_packed {
            fsutil::remove_dir_all_if_exists(&dest.join("node_modules"))?;
        }

        let mut overriding = Map::new();
        overriding.insert("private".into(), json!(true));
        overriding.insert("version".into(), json!(format!("{}+embedded", e.version)));

        customize_descriptor(
            &dest,
            CustomizeOptions {
                embedded: &embedded,
                is_yarn_v1: flavor.is_v1(),
                monorepo: Some(&monorepo),
                shared: Some(&opts.shared_rules),
                overriding,
                after: Some(Box::new(|d: &mut PackageDescriptor| {
                    for (peer, range) in d.string_entries("peerDependencies") {
                        merge_peer_range(
                            &mut aggregated_peers,
                            &peer,
                            &range,
                            &e.name,
                            &opts.ignore_version_check,
                        )?;
                    }
                    Ok(())
                })),
                ..Default::default()
            },
        )?;
    }

    if opts.run_build && source.has_script("build") {
        runner.run(&Task::new(
            format!("building {}", source_name),
            ProcessBuilder::new("yarn").args(["run", "build"]).cwd(plugin_dir),
        ))?;
    }

    pack_production(plugin_dir, &source, &target)?;
    fsutil::remove_dir_all_if_exists(&target.join(TARGET_DIR))?;

    let mut additional_resolutions = Map::new();
    for e in &embedded {
        additional_resolutions.insert(e.name.clone(), json!(e.file_specifier()));
    }
    for name in &stub_names {
        additional_resolutions.insert(
            name.clone(),
            json!(format!("file:./embedded/{}", embedded_slug(name))),
        );
    }

    let mut overriding = Map::new();
    overriding.insert("name".into(), json!(derived_name));
    overriding.insert("bundleDependencies".into(), json!(true));
    overriding.insert("scripts".into(), json!({}));

    let main_desc = customize_descriptor(
        &target,
        CustomizeOptions {
            embedded: &embedded,
            is_yarn_v1: flavor.is_v1(),
            monorepo: Some(&monorepo),
            shared: Some(&opts.shared_rules),
            overriding,
            additional_resolutions,
            after: Some(Box::new(|d: &mut PackageDescriptor| {
                for (peer, aggregated) in &aggregated_peers {
                    match d.string_entry("peerDependencies", peer) {
                        None => d.set_string_entry("peerDependencies", peer, &aggregated.range),
                        Some(existing) => match narrower_range(&existing, &aggregated.range) {
                            Some(narrower) => {
                                d.set_string_entry("peerDependencies", peer, narrower)
                            }
                            None if opts.ignore_version_check.iter().any(|i| i == peer) => {}
                            None => {
                                return Err(ExportError::PeerDependencyConflict {
                                    package: peer.clone(),
                                    existing,
                                    incoming: aggregated.range.clone(),
                                    module: aggregated.module.clone(),
                                }
                                .into())
                            }
                        },
                    }
                }
                Ok(())
            })),
            ..Default::default()
        },
    )?;

    let target_lock = target.join(LOCKFILE_NAME);
    let had_target_lock = target_lock.is_file();
    if !had_target_lock {
        match &lock_source {
            Some(source_lock) => {
                fsutil::copy_file_with_parents(source_lock, &target_lock)?;
            }
            None => bail!(
                "no {} found in {} or the monorepo root; a lock file is required to pin the \
                 private dependency tree",
                LOCKFILE_NAME,
                plugin_dir.display()
            ),
        }
    }

    if opts.run_install {
        run_install(&target, flavor, had_target_lock)?;

        let lock = Lockfile::load(&target_lock)?;
        let mut exempt: Vec<String> = embedded.iter().map(|e| e.name.clone()).collect();
        exempt.extend(stub_names.iter().cloned());
        check_shared_leakage(&lock, &main_desc, &opts.shared_rules, &exempt, &derived_name)?;

        check_native_packages(&target, &opts.allow_native_packages)?;

        validate_entrypoint(&target, &source_name, loader)?;
    } else {
        tracing::warn!("install skipped; leakage, native, and entrypoint checks did not run");
    }

    if let Some(root) = &opts.dev_install_root {
        dev_install(&target, root, &derived_name)?;
    }

    tracing::info!("exported {} to {}", derived_name, target.display());
    Ok(target)
}

/// Create (or wipe) the target directory and its `.gitignore`.
pub fn prepare_target(target: &Path, clean: bool, track_manifest_and_lock: bool) -> Result<()> {
    if clean {
        fsutil::remove_dir_all_if_exists(target)?;
    }
    fsutil::ensure_dir(target)?;

    let gitignore = if track_manifest_and_lock {
        "*\n!package.json\n!yarn.lock\n"
    } else {
        "*\n"
    };
    fsutil::write_string(&target.join(".gitignore"), gitignore)
}

/// Locate the lock file to seed the target with: the plugin's own, else the
/// monorepo root's.
pub fn find_lock_source(plugin_dir: &Path) -> Option<PathBuf> {
    let local = plugin_dir.join(LOCKFILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    let root_lock = MonorepoIndex::find_root(plugin_dir)?.join(LOCKFILE_NAME);
    root_lock.is_file().then_some(root_lock)
}

/// Run the production install in the target, logging output to
/// `yarn-install.log`. The log and the `.yarn` state directory are removed on
/// success.
pub fn run_install(target: &Path, flavor: YarnFlavor, had_lock: bool) -> Result<()> {
    let process = match flavor {
        YarnFlavor::Classic => ProcessBuilder::new("yarn")
            .args(["install", "--production", "--frozen-lockfile"])
            .cwd(target),
        YarnFlavor::Berry => ProcessBuilder::new("yarn")
            .args(["install", if had_lock { "--immutable" } else { "--no-immutable" }])
            .cwd(target),
    };

    tracing::info!("installing private dependencies in {}", target.display());
    let output = process.exec()?;

    let log_path = target.join("yarn-install.log");
    let log = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    fsutil::write_string(&log_path, &log)
        .context("failed to write the install log")?;

    if !output.status.success() {
        return Err(process.failure(&output).into());
    }

    fsutil::remove_dir_all_if_exists(&target.join(".yarn"))?;
    fsutil::remove_file_if_exists(&log_path)?;
    Ok(())
}

/// Copy the finished export under a dev host's dynamic plugins root.
fn dev_install(target: &Path, root: &Path, derived_name: &str) -> Result<()> {
    let dest = root.join(embedded_slug(derived_name));
    fsutil::remove_dir_all_if_exists(&dest)?;
    fsutil::copy_tree(target, &dest, &[])?;
    tracing::info!("dev-installed {} to {}", derived_name, dest.display());
    Ok(())
}
