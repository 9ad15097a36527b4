use covwrap_core::{CiContext, CommandLine, CovwrapError, Result};
use covwrap_runner::ProcessLauncher;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Aggregation service the coverage report is uploaded to
pub const CODECOV_HOST: &str = "https://codecov.io";

/// Version-pinned npm uploader installed when the bash script is unusable
const FALLBACK_PACKAGE: &str = "codecov@3";

/// How the coverage report will reach the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadMechanism {
    /// The upload script fetched from the aggregator
    BashScript(String),
    /// The npm uploader package, invoked through npx
    NodePackage,
}

/// Prepares and invokes the coverage-upload mechanism on CI
pub struct CiReporter {
    cwd: PathBuf,
    host: String,
}

impl CiReporter {
    pub fn new<P: AsRef<Path>>(cwd: P) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            host: CODECOV_HOST.to_string(),
        }
    }

    /// Point the reporter at a different aggregator host
    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    /// Decide on an upload mechanism and make it available locally.
    ///
    /// The bash script needs `bash` and `git` on PATH and breaks on
    /// AppVeyor's command-length limit, so those environments go straight
    /// to the npm fallback, as does any fetch failure.
    pub async fn prepare(&self, ci: &CiContext, launcher: &ProcessLauncher) -> UploadMechanism {
        if ci.appveyor {
            info!("AppVeyor detected, using the npm uploader");
            return self.install_fallback(launcher).await;
        }

        if which::which("bash").is_err() || which::which("git").is_err() {
            info!("bash or git not found on PATH, using the npm uploader");
            return self.install_fallback(launcher).await;
        }

        match self.fetch_upload_script().await {
            Ok(script) => UploadMechanism::BashScript(script),
            Err(error) => {
                warn!(error = %error, "Upload script unreachable, using the npm uploader");
                self.install_fallback(launcher).await
            }
        }
    }

    /// Stream the upload script body from the aggregator into memory
    pub async fn fetch_upload_script(&self) -> Result<String> {
        let url = format!("{}/bash", self.host);

        info!(url = %url, "Fetching upload script");

        let mut response = reqwest::get(&url)
            .await
            .map_err(|e| CovwrapError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CovwrapError::NetworkError(format!(
                "unexpected status {} from {}",
                response.status(),
                url
            )));
        }

        // Decode once at the end so a multi-byte character split across
        // chunk boundaries survives intact
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CovwrapError::NetworkError(e.to_string()))?
        {
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn install_fallback(&self, launcher: &ProcessLauncher) -> UploadMechanism {
        let install = if cfg!(windows) {
            CommandLine::with_args(
                "cmd",
                [
                    "/C",
                    "npm",
                    "install",
                    "--no-audit",
                    "--no-package-lock",
                    "--no-save",
                    FALLBACK_PACKAGE,
                ],
            )
        } else {
            CommandLine::with_args(
                "npm",
                [
                    "install",
                    "--no-audit",
                    "--no-package-lock",
                    "--no-save",
                    FALLBACK_PACKAGE,
                ],
            )
        };

        // A failed install surfaces later when npx runs the uploader
        if let Err(error) = launcher.run_foreground(&install).await {
            warn!(error = %error, "npm install of the fallback uploader failed");
        }

        UploadMechanism::NodePackage
    }

    /// Build the aggregator invocation for the prepared mechanism
    pub fn build_report_command(
        &self,
        mechanism: &UploadMechanism,
        ci: &CiContext,
    ) -> Result<CommandLine> {
        let lcov_path = self.cwd.join("coverage").join("lcov.info");

        match mechanism {
            UploadMechanism::BashScript(script) => {
                let mut args = bash_invocation_prefix(script)?;
                args.extend(
                    [
                        // Skip detection heuristics that cannot apply here
                        "-X",
                        "gcov",
                        "-X",
                        "coveragepy",
                        "-X",
                        "gcovout",
                        "-f",
                    ]
                    .map(str::to_string),
                );
                args.push(slash(&lcov_path));

                if let Some(github) = &ci.github {
                    args.extend([
                        "-r".to_string(),
                        github.repository.clone(),
                        "-B".to_string(),
                        github.branch.clone(),
                        "-C".to_string(),
                        github.commit_sha.clone(),
                    ]);
                }

                Ok(CommandLine::with_args("bash", args))
            }
            UploadMechanism::NodePackage => {
                let mut args = vec![
                    "codecov".to_string(),
                    "--disable=gcov,search".to_string(),
                    format!("--file={}", lcov_path.to_string_lossy()),
                ];

                if let Some(github) = &ci.github {
                    args.extend([
                        "--disable=detect,gcov,search".to_string(),
                        format!("--slug={}", github.repository),
                        format!("--branch={}", github.branch),
                        format!("--commit={}", github.commit_sha),
                    ]);
                }

                Ok(CommandLine::with_args("npx", args))
            }
        }
    }

    /// Invoke the uploader and return its exit code
    pub async fn upload(
        &self,
        mechanism: &UploadMechanism,
        ci: &CiContext,
        launcher: &ProcessLauncher,
    ) -> Result<i32> {
        let command = self.build_report_command(mechanism, ci)?;
        run_with_travis_fold(launcher, &command, ci.travis).await
    }
}

/// Run the uploader, bracketing it with Travis fold markers. The end marker
/// is printed even when the child fails, so the fold never stays open.
async fn run_with_travis_fold(
    launcher: &ProcessLauncher,
    command: &CommandLine,
    travis: bool,
) -> Result<i32> {
    if travis {
        println!("travis_fold:start:codecov\nupload coverage to codecov.io");
    }

    let result = launcher.run_foreground(command).await;

    if travis {
        println!("travis_fold:end:codecov");
    }

    Ok(result?.exit_code)
}

/// Leading bash arguments carrying the script itself. Windows hits the
/// command-length limit with `-c`, so the script goes through a file there.
#[cfg(not(windows))]
fn bash_invocation_prefix(script: &str) -> Result<Vec<String>> {
    Ok(vec!["-c".to_string(), script.to_string(), "--".to_string()])
}

#[cfg(windows)]
fn bash_invocation_prefix(script: &str) -> Result<Vec<String>> {
    let path = std::env::temp_dir().join("covwrap-upload.sh");
    std::fs::write(&path, script)?;
    Ok(vec![path.to_string_lossy().into_owned()])
}

/// Normalize a path to forward slashes for the bash script
fn slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
