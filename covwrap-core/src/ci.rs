/// CI-related environment seen by the wrapper
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CiContext {
    /// Whether the run should produce an lcov report and upload it
    pub upload_lcov: bool,
    pub travis: bool,
    pub appveyor: bool,
    pub github: Option<GithubContext>,
}

/// Commit coordinates exposed by GitHub Actions
#[derive(Debug, Clone, PartialEq)]
pub struct GithubContext {
    pub repository: String,
    pub branch: String,
    pub commit_sha: String,
}

impl CiContext {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the context from an arbitrary variable lookup, so tests can
    /// supply environments without mutating the process's own.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let ci = get("CI").map(|v| is_truthy(&v)).unwrap_or(false);
        let github_action = get("GITHUB_ACTION").map_or(false, |v| !v.is_empty());

        let github = if github_action {
            Some(GithubContext {
                repository: get("GITHUB_REPOSITORY").unwrap_or_default(),
                branch: branch_from_ref(&get("GITHUB_REF").unwrap_or_default()),
                commit_sha: get("GITHUB_SHA").unwrap_or_default(),
            })
        } else {
            None
        };

        Self {
            upload_lcov: ci || github_action,
            travis: get("TRAVIS").as_deref() == Some("true"),
            // AppVeyor capitalizes the value on some images
            appveyor: matches!(get("APPVEYOR").as_deref(), Some("true") | Some("True")),
            github,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Turn a git ref string like `refs/heads/main` into a branch name
pub fn branch_from_ref(git_ref: &str) -> String {
    git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(git_ref)
        .to_string()
}
