//! How the CSV file is written, and where.

use camino::{Utf8Path, Utf8PathBuf};

/// UTF-8 byte-order mark, which spreadsheet tools on Windows
/// need to stop guessing the file's encoding.
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// The host platform's convention
    pub fn native() -> Self {
        if cfg!(windows) {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }

    pub(crate) fn terminator(self) -> csv::Terminator {
        match self {
            LineEnding::Lf => csv::Terminator::Any(b'\n'),
            LineEnding::CrLf => csv::Terminator::CRLF,
        }
    }
}

/// Export settings, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Prefix the file with [`UTF8_BOM`]
    pub emit_bom: bool,

    pub line_ending: LineEnding,

    /// Write here instead of next to the archive
    pub output: Option<Utf8PathBuf>,
}

impl ExportOptions {
    /// Defaults for the platform we're running on:
    /// Windows gets a BOM and CRLF, everyone else neither.
    pub fn for_host() -> Self {
        Self {
            emit_bom: cfg!(windows),
            line_ending: LineEnding::native(),
            output: None,
        }
    }

    /// Where the CSV for `zip_path` goes.
    ///
    /// Unless overridden, that's the archive's own directory,
    /// with its extension swapped for `.csv`.
    pub fn output_path(&self, zip_path: &Utf8Path) -> Utf8PathBuf {
        match &self.output {
            Some(explicit) => explicit.clone(),
            None => zip_path.with_extension("csv"),
        }
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::for_host()
    }
}
