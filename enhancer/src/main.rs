//! Bytecode enhancer CLI entrypoint.
//!
//! This binary loads a project file, runs an incremental enhancement pass
//! over its modules (or lists what a pass would see), and exits non-zero
//! when the pass was not fully successful.

use bytecode_enhancer::cli::{Cli, Command};
use bytecode_enhancer::error::Result;
use bytecode_enhancer::list::run_list;
use bytecode_enhancer::output::write_stderr_line;
use bytecode_enhancer::pipeline::{PipelineContext, default_registry, run_enhance};
use bytecode_enhancer::project::ProjectFile;
use clap::Parser;
use std::io::Write;

fn main() {
    let cli = Cli::parse();
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stdout, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Runs the selected command, returning whether it fully succeeded.
fn run(cli: &Cli, stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<bool> {
    if let Some(Command::List(args)) = &cli.command {
        let project = ProjectFile::load(&args.project)?;
        let registry = default_registry(&project.enhancer);
        run_list(args, &project, &registry, stdout, stderr)?;
        return Ok(true);
    }

    let args = cli.enhance_args();
    let project = ProjectFile::load(&args.project)?;
    let registry = default_registry(&project.enhancer);
    let status = run_enhance(&PipelineContext::from_args(args), &project, &registry, stderr)?;
    Ok(status.is_success())
}

fn exit_code_for_run_result(result: Result<bool>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            1
        }
    }
}
