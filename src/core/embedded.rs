//! Embedded package records.

use std::path::PathBuf;

use semver::Version;

/// A package whose code is copied into the plugin's dynamic artifact and
/// referenced via a file-protocol specifier.
#[derive(Debug, Clone)]
pub struct ResolvedEmbedded {
    /// Package name.
    pub name: String,
    /// Resolved source version.
    pub version: Version,
    /// Absolute directory containing the resolved package's descriptor.
    pub dir: PathBuf,
    /// Name of the package whose dependency walk found this one.
    pub parent_name: String,
    /// Whether the resolved package on disk is already a built artifact (its
    /// entry module is not TypeScript source).
    pub already_packed: bool,
}

impl ResolvedEmbedded {
    /// Directory name of this package under `embedded/`.
    pub fn slug(&self) -> String {
        embedded_slug(&self.name)
    }

    /// The file-protocol specifier the derived descriptor pins this package
    /// to.
    pub fn file_specifier(&self) -> String {
        format!("file:./embedded/{}", self.slug())
    }
}

/// Flatten a package name into a directory name: the leading `@` is stripped
/// and `/` becomes `-`.
pub fn embedded_slug(name: &str) -> String {
    name.trim_start_matches('@').replace('/', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_of_scoped_name() {
        assert_eq!(embedded_slug("@x/foo-common"), "x-foo-common");
    }

    #[test]
    fn test_slug_of_plain_name() {
        assert_eq!(embedded_slug("better-sqlite3"), "better-sqlite3");
    }

    #[test]
    fn test_file_specifier() {
        let embedded = ResolvedEmbedded {
            name: "@x/foo-common".to_string(),
            version: Version::new(1, 2, 3),
            dir: PathBuf::from("/repo/packages/foo-common"),
            parent_name: "@x/foo-backend".to_string(),
            already_packed: false,
        };
        assert_eq!(embedded.file_specifier(), "file:./embedded/x-foo-common");
    }
}
