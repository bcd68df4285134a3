//! Export error kinds and their diagnostics.

use thiserror::Error;

use crate::util::diagnostic::Diagnostic;
use crate::util::process::TaskError;

/// Error during a plugin export. Every variant names the offending entity;
/// no variant is recovered locally.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("package `{package}` is marked as bundled and cannot be exported")]
    BundledPackageRejected { package: String },

    #[error("monorepo contains more than one package named `{package}`")]
    DuplicateMonorepoPackage { package: String },

    #[error("workspace dependency `{package}@{specifier}` has no matching monorepo package")]
    MissingWorkspacePackage { package: String, specifier: String },

    #[error("package `{package}` at version {found} does not satisfy `{specifier}`")]
    WorkspaceVersionMismatch {
        package: String,
        specifier: String,
        found: String,
    },

    #[error("workspace dependency `{package}@{specifier}` cannot be resolved")]
    UnresolvedWorkspaceDep { package: String, specifier: String },

    #[error("embedded package `{package}` (required by `{parent}`) is marked as bundled")]
    EmbeddedPackageBundled { package: String, parent: String },

    #[error("shared package(s) leaked into the private dependency tree: {}", offenders.join(", "))]
    SharedPackageLeakage {
        offenders: Vec<String>,
        suggestions: Vec<String>,
    },

    #[error("native package(s) are not allowed in a dynamic plugin: {}", packages.join(", "))]
    NativePackageForbidden { packages: Vec<String> },

    #[error("`{package}` has no loadable dynamic plugin entrypoint: {detail}")]
    InvalidPluginEntrypoint { package: String, detail: String },

    #[error(
        "conflicting peer dependency ranges for `{package}` while merging `{module}`: `{existing}` vs `{incoming}`"
    )]
    PeerDependencyConflict {
        package: String,
        existing: String,
        incoming: String,
        module: String,
    },

    #[error("no frontend assets requested; enable scalprum or module-federation asset generation")]
    NoFrontendAssetsRequested,

    #[error(transparent)]
    Subprocess(#[from] TaskError),
}

impl ExportError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ExportError::SharedPackageLeakage {
                offenders,
                suggestions,
            } => {
                let mut diag = Diagnostic::error(
                    "shared package(s) leaked into the private dependency tree",
                );
                for name in offenders {
                    diag = diag.with_context(format!("`{}` must be provided by the host", name));
                }
                for dep in suggestions {
                    diag = diag.with_suggestion(format!(
                        "embed the direct dependency that introduces it: `--embed-package {}`",
                        dep
                    ));
                }
                diag.with_suggestion(
                    "or widen the shared exclusions with `--shared-package '!<name>'`",
                )
            }

            ExportError::NativePackageForbidden { packages } => {
                let mut diag =
                    Diagnostic::error("native package(s) are not allowed in a dynamic plugin");
                for name in packages {
                    diag = diag.with_context(format!("`{}` builds native code at install time", name));
                }
                diag.with_suggestion("allow them explicitly with `--allow-native-package <name>`")
                    .with_suggestion(
                        "or replace them with throwing stubs via `--suppress-native-package <name>`",
                    )
            }

            ExportError::InvalidPluginEntrypoint { package, detail } => {
                Diagnostic::error(format!("`{}` is not a loadable dynamic plugin", package))
                    .with_context(detail.clone())
                    .with_suggestion(
                        "export a default value tagged as a plugin, or a named `dynamicPluginInstaller`",
                    )
            }

            ExportError::PeerDependencyConflict { package, .. } => {
                Diagnostic::error(self.to_string()).with_suggestion(format!(
                    "skip the conflict check with `--ignore-version-check {}`",
                    package
                ))
            }

            ExportError::Subprocess(err) => Diagnostic::error(format!(
                "command `{}` failed with exit code {:?}",
                err.command, err.code
            ))
            .with_context(format!("working directory: {}", err.cwd)),

            other => Diagnostic::error(other.to_string()),
        }
    }
}
