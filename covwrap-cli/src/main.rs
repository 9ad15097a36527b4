use anyhow::Context;
use clap::Parser;
use covwrap_core::{CiContext, CovwrapError};
use covwrap_reporter::CiReporter;
use covwrap_runner::{ArgumentRewriter, ProcessLauncher};
use std::process;
use tracing::debug;

#[derive(Parser)]
#[command(name = "covwrap")]
#[command(
    about = "Runs a command under coverage instrumentation and uploads the report on CI",
    long_about = None
)]
struct Cli {
    /// Command to run (or `report`), preceded by instrumenter flags and
    /// followed by the command's own arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    argv: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let ci = CiContext::from_env();
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;

    let launcher = ProcessLauncher::new(&cwd);
    let rewriter = match ArgumentRewriter::from_path(&cwd) {
        Ok(rewriter) => rewriter,
        Err(error) => exit_with(&error),
    };

    // Bare runs and `report` go straight to the instrumenter
    let first = cli.argv.first().map(String::as_str);
    if first.is_none() || first == Some("report") {
        let command = rewriter.passthrough(&cli.argv);
        let outcome = match launcher.run_foreground(&command).await {
            Ok(outcome) => outcome,
            Err(error) => exit_with(&error),
        };
        process::exit(outcome.exit_code);
    }

    let invocations = match rewriter.rewrite(&cli.argv, ci.upload_lcov) {
        Ok(invocations) => invocations,
        Err(error) => exit_with(&error),
    };

    if !ci.upload_lcov {
        let outcome = match launcher.run_all(&invocations).await {
            Ok(outcome) => outcome,
            Err(error) => exit_with(&error),
        };
        process::exit(outcome.exit_code);
    }

    debug!("CI detected, preparing the upload mechanism alongside the run");

    let reporter = CiReporter::new(&cwd);
    let (run_result, mechanism) = tokio::join!(
        launcher.run_all(&invocations),
        reporter.prepare(&ci, &launcher),
    );

    let outcome = match run_result {
        Ok(outcome) => outcome,
        Err(error) => exit_with(&error),
    };

    if !outcome.success() {
        // A failed run propagates its code and skips the upload
        process::exit(outcome.exit_code);
    }

    match reporter.upload(&mechanism, &ci, &launcher).await {
        Ok(code) => process::exit(code),
        Err(error) => exit_with(&error),
    }
}

fn exit_with(error: &CovwrapError) -> ! {
    eprintln!("{}", error);
    process::exit(error.exit_code());
}
