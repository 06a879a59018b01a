//! Input and output locations.

use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

/// Where prompt sequences come from and where the report goes.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct IoConfig {
    /// JSON file holding an array of prompt sequences
    #[arg(short = 'i', long = "input", env = "COLLOQUY_INPUT")]
    pub input: PathBuf,

    /// File receiving the JSON report (stdout when omitted)
    #[arg(short = 'o', long = "output", env = "COLLOQUY_OUTPUT")]
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Pretty-print the JSON report
    #[arg(long = "pretty")]
    #[serde(default)]
    pub pretty: bool,
}
