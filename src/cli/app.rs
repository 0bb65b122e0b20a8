//! Command-line surface, grounded on the teacher's `clap`-derive `Cli`
//! struct: a small set of global flags plus a `Commands` enum, one variant
//! per subcommand.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "undoctl", version, about = "MVCC undo/rollback/purge engine control tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Write output to a file instead of stdout.
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new file-backed store with an initialized TRX_SYS page and
    /// rollback segment set.
    Init {
        file: PathBuf,
        #[arg(long, default_value_t = crate::innodb::constants::N_RSEGS)]
        rsegs: usize,
        #[arg(long, default_value_t = crate::innodb::constants::UNIV_PAGE_SIZE)]
        page_size: u32,
    },

    /// Report a file-backed store's page count and rollback segment
    /// occupancy.
    Status {
        file: PathBuf,
        #[arg(long, default_value_t = crate::innodb::constants::UNIV_PAGE_SIZE)]
        page_size: u32,
    },

    /// Run a scripted in-memory transaction sequence (insert/commit,
    /// insert/rollback, savepoint partial rollback) and report the outcome
    /// of each step.
    Demo,
}
