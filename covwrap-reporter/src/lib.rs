pub mod uploader;

pub use uploader::{CiReporter, UploadMechanism, CODECOV_HOST};
