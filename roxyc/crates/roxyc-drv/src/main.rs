//! The `roxy` command line interface.
//!
//! ```text
//! roxy [--disasm] <file>            compile and run one file
//! roxy [--disasm] <dir> <module>    compile a directory tree, run a module
//! ```
//!
//! Exits 0 on success and nonzero on any compile, link or runtime error.

use anyhow::{bail, Context};
use roxyc_drv::{Library, LibraryError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

struct Options {
    disasm: bool,
    paths: Vec<PathBuf>,
}

fn parse_args() -> anyhow::Result<Options> {
    let mut disasm = false;
    let mut paths = Vec::new();
    for arg in std::env::args_os().skip(1) {
        match arg.to_str() {
            Some("--disasm") => disasm = true,
            Some(other) if other.starts_with("--") => {
                bail!("unknown option '{other}'");
            }
            _ => paths.push(PathBuf::from(arg)),
        }
    }
    Ok(Options { disasm, paths })
}

fn run(options: &Options) -> anyhow::Result<()> {
    let (library, module_name) = match options.paths.as_slice() {
        [file] => {
            let parent = file.parent().unwrap_or(Path::new(".")).to_path_buf();
            let module = roxyc_drv::library::module_name_for(&parent, file);
            let library = compile(Library::compile_from_files(&parent, &[file.clone()]))?;
            (library, module)
        }
        [dir, module] => {
            let module = module.to_string_lossy().into_owned();
            let library = compile(Library::compile_from_dir(dir))?;
            (library, module)
        }
        _ => {
            bail!("Usage: roxy [--disasm] <file> | roxy [--disasm] <dir> <module>");
        }
    };

    if options.disasm {
        match library.disassembly(&module_name) {
            Some(listing) => print!("{listing}"),
            None => bail!("Cannot find module {module_name}!"),
        }
    }

    library
        .run(&module_name)
        .with_context(|| format!("Error while running module {module_name}!"))?;
    Ok(())
}

/// Unwraps a compilation, printing collected diagnostics on failure.
fn compile(result: Result<Library, LibraryError>) -> anyhow::Result<Library> {
    match result {
        Ok(library) => Ok(library),
        Err(LibraryError::CompileFailed { diagnostics }) => {
            for line in &diagnostics {
                eprintln!("{line}");
            }
            bail!("Compilation failed with {} error(s).", diagnostics.len());
        }
        Err(other) => Err(other.into()),
    }
}

fn main() -> ExitCode {
    let options = match parse_args() {
        Ok(options) => options,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::from(2);
        }
    };
    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error:#}");
            ExitCode::FAILURE
        }
    }
}
