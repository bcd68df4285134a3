//! Core data model: descriptors, specifiers, roles, the workspace index, and
//! the shared/embedded package records the export pipeline operates on.

pub mod descriptor;
pub mod embedded;
pub mod monorepo;
pub mod role;
pub mod shared;
pub mod spec;

pub use descriptor::{PackageDescriptor, DESCRIPTOR_FILE};
pub use embedded::{embedded_slug, ResolvedEmbedded};
pub use monorepo::{MonorepoIndex, MonorepoPackage};
pub use role::PluginRole;
pub use shared::{NameMatcher, SharedPackagesRules};
pub use spec::{VersionSpec, WorkspaceSpec};
