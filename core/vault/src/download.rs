//! Decrypted file handed to the caller.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::{Builder, NamedTempFile};

use lockbox_common::{Result, SensitiveBytes};

const TEMP_PREFIX: &str = ".lockbox-";

/// Verified plaintext materialized in a private temporary file.
///
/// The file is only created after the plaintext passed authentication and
/// hash verification. It is removed when this value is dropped, whether the
/// caller finished streaming it or not.
#[derive(Debug)]
pub struct DecryptedFile {
    filename: String,
    file: NamedTempFile,
    len: u64,
}

impl DecryptedFile {
    pub(crate) fn materialize(
        filename: &str,
        plaintext: &SensitiveBytes,
        temp_dir: Option<&Path>,
    ) -> Result<Self> {
        let mut builder = Builder::new();
        builder.prefix(TEMP_PREFIX);
        let mut file = match temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        // On failure `file` is dropped here, which unlinks it.
        file.write_all(plaintext.as_bytes())?;
        file.flush()?;

        Ok(Self {
            filename: filename.to_string(),
            file,
            len: plaintext.len() as u64,
        })
    }

    /// Original filename supplied at upload.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Plaintext length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Location of the temporary file. Valid only while `self` lives.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Open an independent reader positioned at the start.
    pub fn reader(&self) -> Result<File> {
        Ok(self.file.reopen()?)
    }

    /// Read the whole plaintext into memory.
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.len as usize);
        self.reader()?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Stream the plaintext into `out`, returning the bytes written.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<u64> {
        let mut reader = self.reader()?;
        let written = io::copy(&mut reader, out)?;
        out.flush()?;
        Ok(written)
    }

    /// Copy the plaintext to `dest`, returning the bytes written.
    pub fn copy_to(&self, dest: impl AsRef<Path>) -> Result<u64> {
        let mut out = File::create(dest.as_ref())?;
        let written = self.write_to(&mut out)?;
        out.sync_all()?;
        Ok(written)
    }
}
