//! CLI argument definitions using clap
//!
//! Every flag overrides the matching key of the loaded config file.

use clap::Parser;
use std::path::PathBuf;

use crate::config::GraphexConfig;

/// Stream live updates of a directory of data files over WebSocket
#[derive(Parser, Debug, Default)]
#[command(name = "graphex")]
#[command(about = "Streams parsed data files from a watched directory to WebSocket subscribers")]
#[command(version)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory to watch for data files
    #[arg(short, long, value_name = "DIR", env = "GRAPHEX_WATCH_DIR")]
    pub watch_dir: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", env = "GRAPHEX_LOG")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded config
    pub fn apply(&self, config: &mut GraphexConfig) {
        if let Some(dir) = &self.watch_dir {
            config.watch_dir = dir.clone();
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}
