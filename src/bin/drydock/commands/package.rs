//! `drydock package` command

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::PackageArgs;
use drydock::ops::package_image::{package_image, PackageImageOptions};

pub fn execute(args: PackageArgs) -> Result<()> {
    let exported_dirs = if args.dirs.is_empty() {
        vec![PathBuf::from("dist-dynamic")]
    } else {
        args.dirs
    };

    package_image(&PackageImageOptions {
        tag: args.tag,
        exported_dirs,
        container_tool: args.container_tool,
    })
}
