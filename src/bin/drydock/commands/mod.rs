//! drydock CLI subcommands.

pub mod completions;
pub mod export;
pub mod package;
