//! General utility code that didn't fit anywhere else
// (c) 2024 Ross Younger

pub mod stats;
pub mod time;

mod tracing;
pub use tracing::{log_file_for, setup as setup_tracing};

mod optionalify;
pub use optionalify::{derive_deftly_template_Optionalify, insert_if_some};

#[cfg(test)]
pub(crate) fn make_test_tempfile(
    data: &str,
    filename: &str,
) -> (std::path::PathBuf, tempfile::TempDir) {
    let tempdir = tempfile::tempdir().unwrap();
    let path = tempdir.path().join(filename);
    std::fs::write(&path, data).expect("Unable to write tempfile");
    (path, tempdir)
}
