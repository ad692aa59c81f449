//! External process invocation for enhancer runtimes.
//!
//! Enhancers run out of process in their own JVM. The child is started with
//! an explicit classpath argument and without the ambient `CLASSPATH`
//! variable, so nothing from the calling environment leaks into the
//! module's execution environment.

use crate::error::Result;
use std::process::{Command, Output};

/// Environment variable removed from every enhancer process.
pub const AMBIENT_CLASSPATH_VAR: &str = "CLASSPATH";

/// Abstraction for running external commands.
#[cfg_attr(test, mockall::automock)]
pub trait CommandExecutor {
    /// Runs `program` with `args` and returns the captured output.
    ///
    /// # Errors
    ///
    /// Returns any I/O errors encountered while spawning or running the command.
    fn run(&self, program: &str, args: &[String]) -> Result<Output>;
}

/// Executes commands on the host system.
///
/// # Examples
///
/// ```no_run
/// use bytecode_enhancer::executor::{CommandExecutor, SystemCommandExecutor};
///
/// let executor = SystemCommandExecutor;
/// let output = executor.run("java", &["-version".to_owned()])?;
/// assert!(output.status.success());
/// # Ok::<(), bytecode_enhancer::error::EnhanceError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        Ok(Command::new(program)
            .args(args)
            .env_remove(AMBIENT_CLASSPATH_VAR)
            .output()?)
    }
}

/// Joins captured stderr (or stdout when stderr is empty) into a single
/// trimmed message for error reporting.
#[must_use]
pub fn failure_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout)
    } else {
        stderr
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        output.status.to_string()
    } else {
        format!("{}: {trimmed}", output.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::output_with;

    #[test]
    fn failure_text_prefers_stderr() {
        let output = output_with(1, "stdout noise", "boom");
        let text = failure_text(&output);
        assert!(text.ends_with("boom"));
        assert!(!text.contains("stdout noise"));
    }

    #[test]
    fn failure_text_falls_back_to_stdout() {
        let output = output_with(2, "only stdout", "  ");
        assert!(failure_text(&output).ends_with("only stdout"));
    }

    #[test]
    fn failure_text_reports_status_when_silent() {
        let output = output_with(3, "", "");
        assert!(failure_text(&output).contains('3'));
    }

    #[test]
    fn mock_executor_receives_arguments() {
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(|program, args| program == "java" && args.first().is_some_and(|a| a == "-cp"))
            .times(1)
            .returning(|_, _| Ok(output_with(0, "", "")));

        let output = executor
            .run("java", &["-cp".to_owned(), "/lib".to_owned()])
            .expect("mock runs");
        assert!(output.status.success());
    }
}
