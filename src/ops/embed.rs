//! Embedding resolver.
//!
//! Given the plugin's descriptor and a seed list of packages to embed,
//! produces the transitive closure of embedded packages. Resolution prefers
//! monorepo siblings; anything else is looked up through a module resolver
//! rooted at the requiring package. The closure is built with an explicit
//! work queue so deeply nested monorepos cannot exhaust the stack.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::core::descriptor::{PackageDescriptor, DESCRIPTOR_FILE};
use crate::core::monorepo::MonorepoIndex;
use crate::core::spec::{self, VersionSpec};
use crate::core::ResolvedEmbedded;
use crate::ops::errors::ExportError;

/// Module resolution, abstracted so tests can substitute a fixed table.
pub trait ModuleResolver {
    /// Resolve `name` as seen from the package at `base`. Returns the
    /// resolved package directory and its descriptor, or `None` when the
    /// module cannot be found.
    fn resolve(&self, base: &Path, name: &str) -> Result<Option<(PathBuf, PackageDescriptor)>>;
}

/// Node-style resolution: walk up from the requiring package, probing
/// `node_modules/<name>` at each level.
#[derive(Debug, Default)]
pub struct NodeModulesResolver;

impl ModuleResolver for NodeModulesResolver {
    fn resolve(&self, base: &Path, name: &str) -> Result<Option<(PathBuf, PackageDescriptor)>> {
        for ancestor in base.ancestors() {
            let candidate = ancestor.join("node_modules").join(name);
            if candidate.join(DESCRIPTOR_FILE).is_file() {
                let descriptor = PackageDescriptor::load(&candidate)?;
                return Ok(Some((candidate, descriptor)));
            }
        }
        Ok(None)
    }
}

/// Compute the transitive closure of packages to embed.
///
/// The returned list is deduplicated by package directory, in the order
/// encountered. Seed packages that never appear in the transitive
/// dependencies are reported as warnings, not errors.
pub fn resolve_embedded(
    root: &PackageDescriptor,
    root_dir: &Path,
    seeds: &[String],
    monorepo: &MonorepoIndex,
    resolver: &dyn ModuleResolver,
) -> Result<Vec<ResolvedEmbedded>> {
    let mut seed_list: Vec<String> = seeds.to_vec();
    let mut resolved: Vec<ResolvedEmbedded> = Vec::new();
    let mut resolved_names: HashSet<String> = HashSet::new();
    let mut visited_dirs: HashSet<PathBuf> = HashSet::new();

    let mut queue: VecDeque<(PackageDescriptor, PathBuf)> = VecDeque::new();
    queue.push_back((root.clone(), root_dir.to_path_buf()));

    while let Some((desc, dir)) = queue.pop_front() {
        let current_name = desc.name()?.to_string();

        // Role heuristic: backend-ish packages conventionally depend on
        // `-common` / `-node` siblings that must travel with them.
        if let Some(role) = desc.role() {
            for sibling in role.sibling_names(&current_name) {
                if !resolved_names.contains(&sibling) && !seed_list.contains(&sibling) {
                    tracing::debug!("adding role-derived embedding candidate `{}`", sibling);
                    seed_list.push(sibling);
                }
            }
        }

        for (dep, raw_spec) in desc.string_entries("dependencies") {
            if !seed_list.contains(&dep) {
                continue;
            }

            let vspec = VersionSpec::parse(&raw_spec);
            let matches = monorepo.lookup(&dep);
            if matches.len() > 1 {
                return Err(ExportError::DuplicateMonorepoPackage { package: dep }.into());
            }

            let (pkg_dir, pkg_desc, version, already_packed) = if let Some(m) = matches.first() {
                match &vspec {
                    VersionSpec::Workspace(ws) if !m.satisfies(ws) => {
                        return Err(ExportError::WorkspaceVersionMismatch {
                            package: dep,
                            specifier: raw_spec,
                            found: m.version.to_string(),
                        }
                        .into());
                    }
                    VersionSpec::Range(range) if !spec::range_matches(range, &m.version) => {
                        return Err(ExportError::WorkspaceVersionMismatch {
                            package: dep,
                            specifier: raw_spec,
                            found: m.version.to_string(),
                        }
                        .into());
                    }
                    _ => {}
                }
                let pkg_desc = PackageDescriptor::load(&m.dir)?;
                (m.dir.clone(), pkg_desc, m.version.clone(), false)
            } else {
                if vspec.is_workspace() {
                    return Err(ExportError::MissingWorkspacePackage {
                        package: dep,
                        specifier: raw_spec,
                    }
                    .into());
                }
                let Some((resolved_dir, resolved_desc)) = resolver.resolve(&dir, &dep)? else {
                    bail!(
                        "cannot resolve embedding candidate `{}` from {}",
                        dep,
                        dir.display()
                    );
                };
                let version = resolved_desc.version()?;
                if let VersionSpec::Range(range) = &vspec {
                    if !spec::range_matches(range, &version) {
                        return Err(ExportError::WorkspaceVersionMismatch {
                            package: dep,
                            specifier: raw_spec,
                            found: version.to_string(),
                        }
                        .into());
                    }
                }
                let already_packed = !resolved_desc
                    .main_module()
                    .unwrap_or("")
                    .ends_with(".ts");
                (resolved_dir, resolved_desc, version, already_packed)
            };

            if pkg_desc.is_bundled() {
                return Err(ExportError::EmbeddedPackageBundled {
                    package: dep,
                    parent: current_name.clone(),
                }
                .into());
            }

            if visited_dirs.insert(pkg_dir.clone()) {
                resolved_names.insert(dep.clone());
                resolved.push(ResolvedEmbedded {
                    name: dep,
                    version,
                    dir: pkg_dir.clone(),
                    parent_name: current_name.clone(),
                    already_packed,
                });
                queue.push_back((pkg_desc, pkg_dir));
            }
        }
    }

    for seed in seeds {
        if !resolved_names.contains(seed) {
            tracing::warn!(
                "`{}` was requested for embedding but never appears in the dependency tree",
                seed
            );
        }
    }

    Ok(resolved)
}
