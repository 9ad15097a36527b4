use covwrap_core::{CommandLine, CovwrapError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the coverage-instrumentation executable looked up on PATH
pub const INSTRUMENTER_BIN: &str = "c8";
/// Interpreter used to run script entry points
pub const INTERPRETER_BIN: &str = "node";

/// Extensions tried when a positional token resolves as a script path
const ENTRY_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "json"];

/// Rewrites a raw argument list into instrumenter invocations.
///
/// Tokens before the first positional are instrumenter flags; the first
/// positional is either an executable on PATH or a script entry point.
pub struct ArgumentRewriter {
    cwd: PathBuf,
    instrumenter: String,
    interpreter: String,
}

impl ArgumentRewriter {
    pub fn new<P, S, T>(cwd: P, instrumenter: S, interpreter: T) -> Self
    where
        P: AsRef<Path>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            instrumenter: instrumenter.into(),
            interpreter: interpreter.into(),
        }
    }

    /// Resolve the instrumenter and interpreter on PATH
    pub fn from_path<P: AsRef<Path>>(cwd: P) -> Result<Self> {
        let instrumenter = which::which(INSTRUMENTER_BIN)
            .map_err(|_| CovwrapError::ToolNotFound(INSTRUMENTER_BIN.to_string()))?;
        let interpreter = which::which(INTERPRETER_BIN)
            .map_err(|_| CovwrapError::ToolNotFound(INTERPRETER_BIN.to_string()))?;

        Ok(Self::new(
            cwd,
            instrumenter.to_string_lossy().into_owned(),
            interpreter.to_string_lossy().into_owned(),
        ))
    }

    /// Forward tokens to the instrumenter unchanged (`report`, bare runs)
    pub fn passthrough(&self, raw: &[String]) -> CommandLine {
        CommandLine::with_args(self.instrumenter.clone(), raw.iter().cloned())
    }

    /// Rewrite the raw argument list into one invocation per entry point.
    ///
    /// `upload_lcov` selects the default reporter pair: lcovonly when the
    /// report will be uploaded, html otherwise.
    pub fn rewrite(&self, raw: &[String], upload_lcov: bool) -> Result<Vec<CommandLine>> {
        let (flags, command, tail) = split_arguments(raw);

        let command = match command {
            Some(command) => command,
            None => return Ok(vec![self.passthrough(raw)]),
        };

        if which::which(command).is_ok() {
            // OS executable: everything after it is its own argv
            debug!(command = %command, "Command found on PATH");
            let mut args = self.reporter_defaults(upload_lcov, &flags);
            args.extend(flags);
            args.push(command.to_string());
            args.extend(tail.iter().map(|t| t.to_string()));
            return Ok(vec![CommandLine::with_args(self.instrumenter.clone(), args)]);
        }

        // Script mode: the command and any further positionals are entry
        // points, each run as a separate instrumenter invocation.
        let mut entries: Vec<(PathBuf, Vec<String>)> = vec![(self.resolve_entry(command)?, vec![])];
        for token in tail {
            if token.starts_with('-') {
                if let Some((_, args)) = entries.last_mut() {
                    args.push(token.to_string());
                }
            } else {
                entries.push((self.resolve_entry(token)?, vec![]));
            }
        }

        let total = entries.len();
        if total > 1 {
            info!(entries = total, "Chaining coverage across multiple entry points");
        }

        let invocations = entries
            .into_iter()
            .enumerate()
            .map(|(index, (entry, entry_args))| {
                self.build_script_invocation(index, total, &flags, &entry, &entry_args, upload_lcov)
            })
            .collect();

        Ok(invocations)
    }

    fn build_script_invocation(
        &self,
        index: usize,
        total: usize,
        flags: &[String],
        entry: &Path,
        entry_args: &[String],
        upload_lcov: bool,
    ) -> CommandLine {
        let last = index + 1 == total;
        let mut args = Vec::new();

        if last {
            args.extend(self.reporter_defaults(upload_lcov, flags));
            args.extend(flags.iter().cloned());
        } else {
            // Intermediate runs accumulate coverage without reporting
            args.push("--reporter=none".to_string());
            let mut remaining = flags.iter();
            while let Some(flag) = remaining.next() {
                if flag == "--reporter" {
                    // Skip its separate value token too
                    let _ = remaining.next();
                } else if !flag.starts_with("--reporter=") {
                    args.push(flag.clone());
                }
            }
        }

        if index > 0 {
            args.push("--clean=false".to_string());
        }

        args.push(self.interpreter.clone());
        if entry.extension().and_then(|e| e.to_str()) == Some("mjs") {
            args.push("--experimental-modules".to_string());
        }
        args.push(entry.to_string_lossy().into_owned());
        args.extend(entry_args.iter().cloned());

        CommandLine::with_args(self.instrumenter.clone(), args)
    }

    fn reporter_defaults(&self, upload_lcov: bool, flags: &[String]) -> Vec<String> {
        if flags.iter().any(|f| is_reporter_flag(f)) {
            return Vec::new();
        }

        vec![
            "--reporter=text".to_string(),
            if upload_lcov {
                "--reporter=lcovonly".to_string()
            } else {
                "--reporter=html".to_string()
            },
        ]
    }

    /// Resolve a positional token as a loadable script path
    fn resolve_entry(&self, token: &str) -> Result<PathBuf> {
        let base = self.cwd.join(token);

        if base.is_file() {
            return Ok(base);
        }

        if let Some(name) = base.file_name().and_then(|n| n.to_str()) {
            for ext in ENTRY_EXTENSIONS {
                let candidate = base.with_file_name(format!("{}.{}", name, ext));
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }

        if base.is_dir() {
            let index = base.join("index.js");
            if index.is_file() {
                return Ok(index);
            }
        }

        Err(CovwrapError::CommandNotFound {
            command: token.to_string(),
            entry_path: base.to_string_lossy().into_owned(),
        })
    }
}

/// Split raw arguments into leading instrumenter flags, the command token,
/// and the remaining tail.
///
/// A flag without an inline `=` value pairs with the token that follows it
/// (`--exclude tmp.mjs`), so that token is never mistaken for the command.
fn split_arguments(raw: &[String]) -> (Vec<String>, Option<&str>, &[String]) {
    let mut flags = Vec::new();
    let mut iter = raw.iter().enumerate();

    while let Some((index, token)) = iter.next() {
        if !token.starts_with('-') {
            return (flags, Some(token.as_str()), &raw[index + 1..]);
        }

        flags.push(token.clone());
        if !token.contains('=') {
            if let Some((_, value)) = iter.next() {
                flags.push(value.clone());
            }
        }
    }

    (flags, None, &[])
}

fn is_reporter_flag(flag: &str) -> bool {
    flag == "--reporter" || flag.starts_with("--reporter=")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn rewriter_in(dir: &TempDir) -> ArgumentRewriter {
        ArgumentRewriter::new(dir.path(), "c8", "node")
    }

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_path_command_is_left_in_place() {
        let dir = TempDir::new().unwrap();
        let rewriter = rewriter_in(&dir);

        // `sh` exists on every supported PATH
        let invocations = rewriter.rewrite(&args(&["sh", "-c", "exit 0"]), false).unwrap();

        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].program, "c8");
        assert_eq!(
            invocations[0].args,
            args(&[
                "--reporter=text",
                "--reporter=html",
                "sh",
                "-c",
                "exit 0"
            ])
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_upload_context_selects_lcovonly() {
        let dir = TempDir::new().unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter.rewrite(&args(&["sh", "-c", "exit 0"]), true).unwrap();

        assert!(invocations[0]
            .args
            .contains(&"--reporter=lcovonly".to_string()));
        assert!(!invocations[0].args.contains(&"--reporter=html".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_user_reporter_suppresses_defaults() {
        let dir = TempDir::new().unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter
            .rewrite(&args(&["--reporter=json", "sh", "-c", "exit 0"]), false)
            .unwrap();

        assert_eq!(
            invocations[0].args,
            args(&["--reporter=json", "sh", "-c", "exit 0"])
        );
    }

    #[test]
    fn test_script_fallback_splices_interpreter() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.js"), "process.exit(0)").unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter.rewrite(&args(&["app.js"]), false).unwrap();

        let expected_entry = dir.path().join("app.js").to_string_lossy().into_owned();
        assert_eq!(
            invocations[0].args,
            args(&["--reporter=text", "--reporter=html", "node", &expected_entry])
        );
    }

    #[test]
    fn test_script_resolution_tries_extensions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.js"), "").unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter.rewrite(&args(&["app"]), false).unwrap();

        let expected_entry = dir.path().join("app.js").to_string_lossy().into_owned();
        assert!(invocations[0].args.contains(&expected_entry));
    }

    #[test]
    fn test_directory_resolves_to_index_js() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg").join("index.js"), "").unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter.rewrite(&args(&["pkg"]), false).unwrap();

        let expected_entry = dir
            .path()
            .join("pkg")
            .join("index.js")
            .to_string_lossy()
            .into_owned();
        assert!(invocations[0].args.contains(&expected_entry));
    }

    #[test]
    fn test_mjs_entry_gets_module_flag() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.mjs"), "").unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter.rewrite(&args(&["app.mjs"]), false).unwrap();

        let position = invocations[0]
            .args
            .iter()
            .position(|a| a == "--experimental-modules")
            .unwrap();
        assert_eq!(invocations[0].args[position - 1], "node");
    }

    #[test]
    fn test_missing_command_and_entry_reports_both() {
        let dir = TempDir::new().unwrap();
        let rewriter = rewriter_in(&dir);

        let error = rewriter
            .rewrite(&args(&["this-command-does-not-exist"]), false)
            .unwrap_err();

        assert_eq!(error.exit_code(), 127);
        let expected_path = dir
            .path()
            .join("this-command-does-not-exist")
            .to_string_lossy()
            .into_owned();
        assert_eq!(
            error.to_string(),
            format!(
                "Both a command `this-command-does-not-exist` and a Node.js entry point {} don't exist.",
                expected_path
            )
        );
    }

    #[test]
    fn test_multiple_entries_chain_coverage() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        fs::write(dir.path().join("b.js"), "").unwrap();
        fs::write(dir.path().join("c.js"), "").unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter
            .rewrite(&args(&["a.js", "b.js", "c.js"]), false)
            .unwrap();

        assert_eq!(invocations.len(), 3);

        // First run resets state and stays quiet
        assert!(invocations[0].args.contains(&"--reporter=none".to_string()));
        assert!(!invocations[0].args.contains(&"--clean=false".to_string()));

        // Middle runs append without reporting
        assert!(invocations[1].args.contains(&"--reporter=none".to_string()));
        assert!(invocations[1].args.contains(&"--clean=false".to_string()));

        // Only the last run reports
        assert!(invocations[2].args.contains(&"--reporter=text".to_string()));
        assert!(invocations[2].args.contains(&"--clean=false".to_string()));
        assert!(!invocations[2].args.contains(&"--reporter=none".to_string()));
    }

    #[test]
    fn test_intermediate_runs_drop_user_reporter_flags() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        fs::write(dir.path().join("b.js"), "").unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter
            .rewrite(&args(&["--reporter=json", "a.js", "b.js"]), false)
            .unwrap();

        assert!(invocations[0].args.contains(&"--reporter=none".to_string()));
        assert!(!invocations[0].args.contains(&"--reporter=json".to_string()));
        assert!(invocations[1].args.contains(&"--reporter=json".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_separate_reporter_value_token_is_kept_with_its_flag() {
        let dir = TempDir::new().unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter
            .rewrite(&args(&["--reporter", "json", "sh", "-c", "exit 0"]), false)
            .unwrap();

        assert_eq!(
            invocations[0].args,
            args(&["--reporter", "json", "sh", "-c", "exit 0"])
        );
    }

    #[test]
    fn test_separate_value_flag_does_not_swallow_the_command() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.js"), "").unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter
            .rewrite(&args(&["--exclude", "tmp.mjs", "app.js"]), false)
            .unwrap();

        let expected_entry = dir.path().join("app.js").to_string_lossy().into_owned();
        assert_eq!(invocations.len(), 1);
        assert_eq!(
            invocations[0].args,
            args(&[
                "--reporter=text",
                "--reporter=html",
                "--exclude",
                "tmp.mjs",
                "node",
                &expected_entry
            ])
        );
    }

    #[test]
    fn test_intermediate_runs_drop_separate_reporter_value_token() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        fs::write(dir.path().join("b.js"), "").unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter
            .rewrite(&args(&["--reporter", "json", "a.js", "b.js"]), false)
            .unwrap();

        assert!(invocations[0].args.contains(&"--reporter=none".to_string()));
        assert!(!invocations[0].args.contains(&"--reporter".to_string()));
        assert!(!invocations[0].args.contains(&"json".to_string()));
        assert!(invocations[1].args.contains(&"--reporter".to_string()));
        assert!(invocations[1].args.contains(&"json".to_string()));
    }

    #[test]
    fn test_no_positional_falls_through_to_passthrough() {
        let dir = TempDir::new().unwrap();
        let rewriter = rewriter_in(&dir);

        let invocations = rewriter
            .rewrite(&args(&["--check-coverage"]), false)
            .unwrap();

        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].args, args(&["--check-coverage"]));
    }
}
