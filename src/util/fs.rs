//! Filesystem utilities for staging export trees.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a file, if it exists.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove file: {}", path.display()))?;
    }
    Ok(())
}

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write file: {}", path.display()))
}

/// Copy a single file, creating parent directories of the destination.
pub fn copy_file_with_parents(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Recursively copy a directory tree, skipping any directory whose name is in
/// `exclude`. The destination itself is never copied into, even when it lives
/// inside the source tree.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    ensure_dir(dst)?;
    copy_tree_inner(src, dst, exclude, dst)
}

fn copy_tree_inner(src: &Path, dst: &Path, exclude: &[&str], skip: &Path) -> Result<()> {
    ensure_dir(dst)?;

    for entry in
        fs::read_dir(src).with_context(|| format!("failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(&name);

        if ty.is_dir() {
            if src_path == skip || exclude.iter().any(|e| name == *e) {
                continue;
            }
            copy_tree_inner(&src_path, &dst_path, exclude, skip)?;
        } else {
            copy_file_with_parents(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Expand glob patterns relative to a base directory, returning matched files
/// as paths relative to that base. Matches under `node_modules` are dropped.
pub fn glob_relative(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut results = Vec::new();

    for pattern in patterns {
        let full_pattern = base.join(pattern);
        let pattern_str = full_pattern.to_string_lossy();

        for entry in
            glob(&pattern_str).with_context(|| format!("invalid glob pattern: {}", pattern))?
        {
            match entry {
                Ok(path) => {
                    if !path.is_file() {
                        continue;
                    }
                    let rel = pathdiff::diff_paths(&path, base).unwrap_or(path);
                    if rel.components().any(|c| c.as_os_str() == "node_modules") {
                        continue;
                    }
                    results.push(rel);
                }
                Err(e) => {
                    tracing::warn!("glob error: {}", e);
                }
            }
        }
    }

    results.sort();
    results.dedup();
    Ok(results)
}
