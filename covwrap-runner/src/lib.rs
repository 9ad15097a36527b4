pub mod launcher;
pub mod rewriter;

pub use launcher::ProcessLauncher;
pub use rewriter::ArgumentRewriter;
