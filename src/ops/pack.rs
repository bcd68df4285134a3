//! Production packager.
//!
//! Copies a package's publishable subset into a target directory: the files
//! selected by the descriptor's `files` globs, the descriptor itself, and the
//! conventional root files. `node_modules` is never copied.

use std::fs;
use std::path::Path;

use anyhow::Result;

use crate::core::descriptor::{PackageDescriptor, DESCRIPTOR_FILE};
use crate::util::fs as fsutil;

/// Root files included regardless of the `files` allowlist.
const CONVENTIONAL_ROOT_FILES: &[&str] = &["readme", "license", "licence", "changelog"];

/// Copy the publishable subset of the package at `src_dir` into `target` and
/// write `descriptor` as its manifest.
///
/// When the descriptor has no `files` allowlist the whole tree is publishable
/// and is copied as-is, minus `node_modules` and any previous export output.
pub fn pack_production(
    src_dir: &Path,
    descriptor: &PackageDescriptor,
    target: &Path,
) -> Result<()> {
    fsutil::ensure_dir(target)?;

    match descriptor.files() {
        Some(patterns) => {
            for rel in fsutil::glob_relative(src_dir, &patterns)? {
                fsutil::copy_file_with_parents(&src_dir.join(&rel), &target.join(&rel))?;
            }
            copy_conventional_root_files(src_dir, target)?;
        }
        None => {
            fsutil::copy_tree(src_dir, target, &["node_modules", "dist-dynamic"])?;
        }
    }

    descriptor.save(&target.join(DESCRIPTOR_FILE))?;
    Ok(())
}

fn copy_conventional_root_files(src_dir: &Path, target: &Path) -> Result<()> {
    for entry in fs::read_dir(src_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let lower = name.to_string_lossy().to_lowercase();
        if CONVENTIONAL_ROOT_FILES
            .iter()
            .any(|prefix| lower.starts_with(prefix))
        {
            fsutil::copy_file_with_parents(&entry.path(), &target.join(&name))?;
        }
    }
    Ok(())
}
