//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// drydock - refit statically-linked host plugins into dynamic plugin artifacts
#[derive(Parser)]
#[command(name = "drydock")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output (debug/info)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export a plugin as a dynamic plugin artifact under dist-dynamic/
    Export(ExportArgs),

    /// Package exported plugins into a container image
    Package(PackageArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct ExportArgs {
    /// Plugin directory (defaults to the current directory)
    pub path: Option<PathBuf>,

    /// Embed a package into the exported artifact (repeatable)
    #[arg(long = "embed-package", value_name = "NAME")]
    pub embed_package: Vec<String>,

    /// Shared-package rule: a name or /regex/; prefix with ! to exclude
    #[arg(long = "shared-package", value_name = "RULE")]
    pub shared_package: Vec<String>,

    /// Allow a native package in the installed tree (repeatable)
    #[arg(long = "allow-native-package", value_name = "NAME")]
    pub allow_native_package: Vec<String>,

    /// Replace a native package with a throwing stub (repeatable)
    #[arg(long = "suppress-native-package", value_name = "NAME")]
    pub suppress_native_package: Vec<String>,

    /// Skip the peer-dependency range conflict check for a package
    #[arg(long = "ignore-version-check", value_name = "NAME")]
    pub ignore_version_check: Vec<String>,

    /// Skip the private install in the export output
    #[arg(long)]
    pub no_install: bool,

    /// Skip build scripts before packing
    #[arg(long)]
    pub no_build: bool,

    /// Wipe the export output first
    #[arg(long)]
    pub clean: bool,

    /// Copy the finished export into the dev host's dynamic plugins root
    #[arg(long)]
    pub dev: bool,

    /// Destination directory for --dev installs
    #[arg(long, value_name = "DIR")]
    pub dynamic_plugins_root: Option<PathBuf>,

    /// Leave package.json and yarn.lock visible to version control
    #[arg(long)]
    pub track_dynamic_manifest_and_lock_file: bool,

    /// Scalprum config file (frontend plugins)
    #[arg(long, value_name = "FILE")]
    pub scalprum_config: Option<PathBuf>,

    /// Generate Scalprum assets (frontend plugins; on by default)
    #[arg(long, overrides_with = "no_generate_scalprum_assets")]
    pub generate_scalprum_assets: bool,

    /// Do not generate Scalprum assets
    #[arg(long)]
    pub no_generate_scalprum_assets: bool,

    /// Generate module-federation assets (frontend plugins)
    #[arg(long, overrides_with = "no_generate_module_federation_assets")]
    pub generate_module_federation_assets: bool,

    /// Do not generate module-federation assets
    #[arg(long)]
    pub no_generate_module_federation_assets: bool,
}

impl ExportArgs {
    /// Whether Scalprum assets are requested (on unless disabled).
    pub fn scalprum_requested(&self) -> bool {
        !self.no_generate_scalprum_assets
    }

    /// Whether module-federation assets are requested (off unless enabled).
    pub fn module_federation_requested(&self) -> bool {
        self.generate_module_federation_assets && !self.no_generate_module_federation_assets
    }
}

#[derive(Args)]
pub struct PackageArgs {
    /// Image tag to build
    #[arg(short, long)]
    pub tag: String,

    /// Exported plugin directories (defaults to ./dist-dynamic)
    pub dirs: Vec<PathBuf>,

    /// Container tool to use (overrides $CONTAINER_TOOL)
    #[arg(long, value_name = "TOOL")]
    pub container_tool: Option<String>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
