//! Renders the `stratadm(1)` manual page from the clap definition.
//!
//! Release archives ship `stratadm.1` next to the binary; it is written to
//! `OUT_DIR` so packaging can pick it up without a separate generator.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

const MAN_PAGE: &str = "stratadm.1";
const WATCHED: [&str; 2] = ["build.rs", "src/cli/mod.rs"];

fn out_dir() -> io::Result<PathBuf> {
    env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "cargo did not set OUT_DIR"))
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut directives = io::stdout().lock();
    for path in WATCHED {
        writeln!(directives, "cargo:rerun-if-changed={path}")?;
    }

    let mut page = Vec::new();
    Man::new(cli::Cli::command()).render(&mut page)?;
    fs::write(out_dir()?.join(MAN_PAGE), page)?;
    Ok(())
}
