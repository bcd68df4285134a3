//! Container packaging of exported plugins.
//!
//! Wraps one or more export outputs into a container image whose filesystem
//! layout and annotations let a registry scanner enumerate the plugins: one
//! directory per derived package at the image root, an `index.json` listing
//! them, and the same listing base64-encoded under a well-known annotation
//! key.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::core::descriptor::PackageDescriptor;
use crate::core::embedded_slug;
use crate::util::fs as fsutil;
use crate::util::process::{find_executable, ProcessBuilder, Task, TaskRunner};

/// Annotation key carrying the base64-encoded plugin index.
pub const INDEX_ANNOTATION: &str = "io.backstage.dynamic-packages";

/// Environment variable selecting the container tool.
pub const CONTAINER_TOOL_VAR: &str = "CONTAINER_TOOL";

/// Container tools probed when none is selected explicitly.
const KNOWN_CONTAINER_TOOLS: &[&str] = &["podman", "docker", "buildah"];

/// Options for the package step.
#[derive(Debug, Clone)]
pub struct PackageImageOptions {
    /// Image tag to build.
    pub tag: String,
    /// Exported plugin directories to include.
    pub exported_dirs: Vec<PathBuf>,
    /// Container tool override; falls back to `$CONTAINER_TOOL`, then the
    /// first known tool on PATH.
    pub container_tool: Option<String>,
}

/// One image entry: the directory name it lands under and its index record.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub dir_name: String,
    pub source_dir: PathBuf,
    pub record: Value,
}

/// Read the exported directories into image entries, keyed by derived
/// package name.
pub fn build_index(exported_dirs: &[PathBuf]) -> Result<Vec<ImageEntry>> {
    let mut entries = Vec::new();
    for dir in exported_dirs {
        let descriptor = PackageDescriptor::load(dir)
            .with_context(|| format!("not an exported plugin directory: {}", dir.display()))?;
        let name = descriptor.name()?.to_string();
        let dir_name = embedded_slug(&name);
        let backstage = match descriptor.role() {
            Some(role) => json!({ "role": role.as_str() }),
            None => Value::Null,
        };
        let record = json!({
            dir_name.clone(): {
                "name": name,
                "version": descriptor.version_str().unwrap_or(""),
                "backstage": backstage,
            }
        });
        entries.push(ImageEntry {
            dir_name,
            source_dir: dir.clone(),
            record,
        });
    }
    Ok(entries)
}

/// The decoded index array: one single-key record per entry.
pub fn index_json(entries: &[ImageEntry]) -> Value {
    Value::Array(entries.iter().map(|e| e.record.clone()).collect())
}

/// Base64 encoding of the index array, as stored in the image annotation.
pub fn encode_annotation(entries: &[ImageEntry]) -> Result<String> {
    let json = serde_json::to_string(&index_json(entries))?;
    Ok(STANDARD.encode(json))
}

/// Stage a build context for the image: plugin directories, `index.json`,
/// and a generated Containerfile.
pub fn write_build_context(context_dir: &Path, entries: &[ImageEntry]) -> Result<()> {
    let mut containerfile = String::from("FROM scratch\n");
    for entry in entries {
        fsutil::copy_tree(
            &entry.source_dir,
            &context_dir.join(&entry.dir_name),
            &[".yarn"],
        )?;
        containerfile.push_str(&format!("COPY {0} /{0}\n", entry.dir_name));
    }

    fsutil::write_string(
        &context_dir.join("index.json"),
        &format!("{}\n", serde_json::to_string_pretty(&index_json(entries))?),
    )?;
    containerfile.push_str("COPY index.json /index.json\n");
    containerfile.push_str(&format!(
        "LABEL {}={}\n",
        INDEX_ANNOTATION,
        encode_annotation(entries)?
    ));

    fsutil::write_string(&context_dir.join("Containerfile"), &containerfile)
}

/// Select the container tool: explicit option, `$CONTAINER_TOOL`, then the
/// first known tool on PATH.
pub fn select_container_tool(explicit: Option<&str>) -> Result<String> {
    if let Some(tool) = explicit {
        return Ok(tool.to_string());
    }
    if let Ok(tool) = std::env::var(CONTAINER_TOOL_VAR) {
        if !tool.is_empty() {
            return Ok(tool);
        }
    }
    for tool in KNOWN_CONTAINER_TOOLS {
        if find_executable(tool).is_some() {
            return Ok(tool.to_string());
        }
    }
    bail!(
        "no container tool found; install one of {} or set ${}",
        KNOWN_CONTAINER_TOOLS.join(", "),
        CONTAINER_TOOL_VAR
    )
}

/// Build the plugin registry image from exported directories.
pub fn package_image(opts: &PackageImageOptions) -> Result<()> {
    let entries = build_index(&opts.exported_dirs)?;
    if entries.is_empty() {
        bail!("no exported plugin directories to package");
    }

    let staging = tempfile::tempdir().context("failed to create the image build context")?;
    write_build_context(staging.path(), &entries)?;

    let tool = select_container_tool(opts.container_tool.as_deref())?;
    TaskRunner::new().run(&Task::new(
        format!("building image {} with {}", opts.tag, tool),
        ProcessBuilder::new(&tool)
            .args(["build", "-t", &opts.tag, "-f", "Containerfile", "."])
            .cwd(staging.path()),
    ))?;

    tracing::info!("packaged {} plugin(s) into {}", entries.len(), opts.tag);
    Ok(())
}
