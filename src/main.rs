#[cfg(not(feature = "cli"))]
compile_error!("The `undoctl` binary requires the `cli` feature. Build with `--features cli`.");

use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::process;

use idb::cli::app::{Cli, Commands};
use idb::cli::{demo, init, status};
use idb::EngineError;

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let writer_result: Result<Box<dyn Write>, EngineError> = match &cli.output {
        Some(path) => File::create(path)
            .map(|f| Box::new(f) as Box<dyn Write>)
            .map_err(|e| EngineError::Io(format!("cannot create {}: {e}", path.display()))),
        None => Ok(Box::new(std::io::stdout()) as Box<dyn Write>),
    };

    let mut writer = match writer_result {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init {
            file,
            rsegs,
            page_size,
        } => init::execute(
            &init::InitOptions {
                file,
                rsegs,
                page_size,
            },
            &mut writer,
        ),

        Commands::Status { file, page_size } => {
            status::execute(&status::StatusOptions { file, page_size }, &mut writer)
        }

        Commands::Demo => demo::execute(&mut writer),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
