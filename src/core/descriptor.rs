//! Package descriptor model.
//!
//! The descriptor is the package's on-disk `package.json`. It is kept as an
//! ordered JSON mapping rather than a fixed struct: the export pipeline must
//! pass through every field it does not understand, and field order must
//! survive a load/save round trip so that repeated exports are byte-identical.

use std::path::Path;

use anyhow::{bail, Context, Result};
use semver::Version;
use serde_json::{Map, Value};

use crate::core::role::PluginRole;
use crate::util::fs;

/// The file name of a package descriptor.
pub const DESCRIPTOR_FILE: &str = "package.json";

/// An in-memory package descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageDescriptor {
    fields: Map<String, Value>,
}

impl PackageDescriptor {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        PackageDescriptor { fields: Map::new() }
    }

    /// Wrap a JSON object as a descriptor.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(PackageDescriptor { fields }),
            other => bail!("package descriptor must be a JSON object, got {}", other),
        }
    }

    /// Parse descriptor content.
    pub fn parse(content: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(content).context("failed to parse package descriptor")?;
        Self::from_value(value)
    }

    /// Load a descriptor from a directory or a descriptor file path.
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.is_dir() {
            path.join(DESCRIPTOR_FILE)
        } else {
            path.to_path_buf()
        };
        let content = fs::read_to_string(&file)?;
        Self::parse(&content)
            .with_context(|| format!("invalid package descriptor: {}", file.display()))
    }

    /// Serialize with stable 2-space indentation and a trailing newline.
    pub fn to_pretty_string(&self) -> String {
        let mut out = serde_json::to_string_pretty(&Value::Object(self.fields.clone()))
            .expect("descriptor serialization cannot fail");
        out.push('\n');
        out
    }

    /// Write the descriptor to a directory or a descriptor file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = if path.is_dir() {
            path.join(DESCRIPTOR_FILE)
        } else {
            path.to_path_buf()
        };
        fs::write_string(&file, &self.to_pretty_string())
    }

    /// Get a raw field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a raw field, replacing any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Remove a raw field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// The package name. Required on every descriptor the pipeline touches.
    pub fn name(&self) -> Result<&str> {
        self.fields
            .get("name")
            .and_then(Value::as_str)
            .context("package descriptor has no `name`")
    }

    /// The raw version string, if present.
    pub fn version_str(&self) -> Option<&str> {
        self.fields.get("version").and_then(Value::as_str)
    }

    /// The parsed semver version.
    pub fn version(&self) -> Result<Version> {
        let raw = self
            .version_str()
            .context("package descriptor has no `version`")?;
        raw.parse()
            .with_context(|| format!("invalid version: {}", raw))
    }

    /// The package role, if tagged.
    pub fn role(&self) -> Option<PluginRole> {
        self.fields
            .get("role")
            .and_then(Value::as_str)
            .map(PluginRole::from_str)
    }

    /// The entry module path, if declared.
    pub fn main_module(&self) -> Option<&str> {
        self.fields.get("main").and_then(Value::as_str)
    }

    /// Whether this package is marked as bundled.
    pub fn is_bundled(&self) -> bool {
        self.fields
            .get("bundled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The `files` allowlist, if present.
    pub fn files(&self) -> Option<Vec<String>> {
        self.fields.get("files").and_then(Value::as_array).map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    }

    /// Replace the `files` allowlist.
    pub fn set_files(&mut self, files: Vec<String>) {
        self.fields
            .insert("files".into(), Value::Array(files.into_iter().map(Value::String).collect()));
    }

    /// Whether a script with the given name is declared.
    pub fn has_script(&self, name: &str) -> bool {
        self.fields
            .get("scripts")
            .and_then(Value::as_object)
            .map(|s| s.contains_key(name))
            .unwrap_or(false)
    }

    /// Enumerate a string-to-string section (`dependencies`, `resolutions`, ...)
    /// in descriptor order.
    pub fn string_entries(&self, section: &str) -> Vec<(String, String)> {
        self.fields
            .get(section)
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up one entry of a string-to-string section.
    pub fn string_entry(&self, section: &str, name: &str) -> Option<String> {
        self.fields
            .get(section)?
            .as_object()?
            .get(name)?
            .as_str()
            .map(str::to_string)
    }

    /// Insert or replace one entry of a string-to-string section, creating the
    /// section if absent.
    pub fn set_string_entry(&mut self, section: &str, name: &str, value: &str) {
        let map = self
            .fields
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = map {
            map.insert(name.to_string(), Value::String(value.to_string()));
        }
    }

    /// Remove one entry of a string-to-string section.
    pub fn remove_string_entry(&mut self, section: &str, name: &str) {
        if let Some(Value::Object(map)) = self.fields.get_mut(section) {
            map.remove(name);
        }
    }

    /// Whether a section has any entries.
    pub fn section_is_empty(&self, section: &str) -> bool {
        self.fields
            .get(section)
            .and_then(Value::as_object)
            .map(|m| m.is_empty())
            .unwrap_or(true)
    }
}

impl Default for PackageDescriptor {
    fn default() -> Self {
        Self::new()
    }
}
