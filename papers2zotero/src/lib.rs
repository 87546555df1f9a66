pub mod cli;
pub mod gdrive;
pub mod load_config;
pub mod zotero;

pub use cli::{run, Cli, Commands};
