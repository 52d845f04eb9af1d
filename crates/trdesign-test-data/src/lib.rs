//! trdesign-test-data
//!
//! A module to provide test files embedded in the crate for use in testing.
//!
//! The test files are represented as `TestFile` objects which package the raw binary data
//! and create temporary files for programs to operate on.
use std::fs;
use tempfile::{Builder, NamedTempFile};

#[derive(Debug)]
/// Test File
///
/// Example usage:
///
/// ```ignore
/// // returns (filepath, _tempfile_handle).
/// // _handle ensures the tempfile remains in scope
/// use trdesign_test_data::TestFile;
/// let (pdb_file, _temp) = TestFile::helix_01().create_temp().unwrap();
/// ```
pub struct TestFile {
    filebinary: &'static [u8],
    suffix: &'static str,
}

impl TestFile {
    /// Two chains built from ideal backbone geometry.
    ///
    /// - chain A: residues 1-12, `MKELLEKAAKLG`, an alpha helix. GLY 12 carries no CB.
    /// - chain B: residues 101-104, `SRVW`, translated 40A along x so every
    ///   inter-chain CB pair is beyond the 20A contact cutoff.
    pub fn helix_01() -> Self {
        Self {
            filebinary: include_bytes!("../data/structures/helix_12.pdb"),
            suffix: "pdb",
        }
    }

    pub fn create_temp(&self) -> std::io::Result<(String, NamedTempFile)> {
        let temp = Builder::new()
            .suffix(&format!(".{}", self.suffix))
            .tempfile()?;

        fs::write(&temp, self.filebinary)?;
        let path = temp.path().to_string_lossy().into_owned();

        Ok((path, temp))
    }
}
