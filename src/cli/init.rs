//! `undoctl init`: create a fresh file-backed store with TRX_SYS and the
//! configured rollback segment set already written, the way the teacher's
//! subcommand modules pair an `Options` struct with an `execute` function.

use std::io::Write;
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::innodb::store::FilePageStore;
use crate::EngineError;

pub struct InitOptions {
    pub file: PathBuf,
    pub rsegs: usize,
    pub page_size: u32,
}

pub fn execute(opts: &InitOptions, writer: &mut dyn Write) -> Result<(), EngineError> {
    let store = FilePageStore::create(&opts.file, opts.page_size)?;
    let config = EngineConfig {
        n_rsegs: opts.rsegs,
        page_size: opts.page_size,
        ..EngineConfig::default()
    };
    let _engine = Engine::create(config, Box::new(store))?;
    writeln!(
        writer,
        "initialized {} ({} rollback segment(s), {}-byte pages)",
        opts.file.display(),
        opts.rsegs,
        opts.page_size
    )
    .map_err(EngineError::from)?;
    Ok(())
}
