//! drydock - refits statically-linked host plugins into dynamic plugin
//! artifacts.
//!
//! This crate provides the core library functionality for drydock: the
//! export pipeline (embedding resolution, production packing, descriptor
//! customization, install gating) and the container packaging of exported
//! plugins.

pub mod core;
pub mod ops;
pub mod util;

pub use crate::core::{
    MonorepoIndex, PackageDescriptor, PluginRole, ResolvedEmbedded, SharedPackagesRules,
    VersionSpec,
};

pub use crate::ops::{ExportError, ExportOptions, FrontendOptions};
