mod block_file;
mod cli;
mod config;
mod dev;
mod fs;
mod kernel;
mod logging;
mod memory;
mod path;
mod shell;
mod swap;
mod task;

#[cfg(test)]
mod test_util;

use std::io;
use std::sync::Arc;

use clap::Parser;

use crate::block_file::BlockFile;
use crate::cli::Cli;
use crate::kernel::Kernel;
use crate::shell::Shell;

fn main() -> io::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let device = Arc::new(BlockFile::open(&cli.disk)?);
    let kernel = Kernel::new(device);

    Shell::new(kernel).run();

    Ok(())
}
