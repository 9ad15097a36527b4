pub mod ci;
pub mod error;
pub mod models;

pub use ci::{CiContext, GithubContext};
pub use error::{CovwrapError, Result};
pub use models::{CommandLine, RunOutcome};
