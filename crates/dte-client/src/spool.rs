//! Temporary files holding a document while it is uploaded
//!
//! Names are randomized and created exclusively; the file is removed when
//! the [`SpooledDocument`] is dropped, whichever way the upload ends.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;

pub struct SpooledDocument {
    file: NamedTempFile,
    compressed: bool,
}

impl SpooledDocument {
    /// Write `contents` to a fresh temp file in `dir` (system temp dir if `None`)
    pub fn create(dir: Option<&Path>, contents: &[u8], compress: bool) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder
            .prefix("dte-upload-")
            .suffix(if compress { ".xml.gz" } else { ".xml" })
            .rand_bytes(16);
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        if compress {
            let mut encoder = GzEncoder::new(file.as_file_mut(), Compression::default());
            encoder.write_all(contents)?;
            encoder.finish()?;
        } else {
            file.write_all(contents)?;
        }
        file.flush()?;

        debug!(path = %file.path().display(), compress, "document spooled");
        Ok(Self { file, compressed: compress })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file_name(&self) -> String {
        self.file
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn content_type(&self) -> &'static str {
        if self.compressed {
            "application/gzip"
        } else {
            "text/xml"
        }
    }
}
