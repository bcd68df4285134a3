//! High-level operations.
//!
//! This module contains the implementation of drydock commands: the export
//! pipelines and the steps they are composed of.

pub mod customize;
pub mod embed;
pub mod entrypoint;
pub mod errors;
pub mod export_backend;
pub mod export_frontend;
pub mod lockfile;
pub mod native;
pub mod pack;
pub mod package_image;

pub use customize::{customize_descriptor, CustomizeOptions};
pub use embed::{resolve_embedded, ModuleResolver, NodeModulesResolver};
pub use entrypoint::{validate_entrypoint, LoadedExports, ModuleLoader, NodeModuleLoader};
pub use errors::ExportError;
pub use export_backend::{export_backend, ExportOptions};
pub use export_frontend::{
    export_frontend, AssetProducer, AssetRequest, FrontendOptions, ModuleFederationAssetProducer,
    ScalprumAssetProducer,
};
pub use lockfile::{check_shared_leakage, Lockfile, LockfileEntry, YarnFlavor};
pub use native::{check_native_packages, scan_native_packages, write_native_stub};
pub use pack::pack_production;
pub use package_image::{package_image, PackageImageOptions};
