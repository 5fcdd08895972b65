//! digicsv turns the quiz inside a digistorm.app ZIP export into a CSV file:
//!
//! ```no_run
//! # use camino::Utf8Path;
//! # use digicsv::*;
//! let options = ExportOptions::for_host();
//! let summary = export(Utf8Path::new("mon_qcm.zip"), &options)?;
//! println!("{} rows in {}", summary.rows, summary.csv_path);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The archive holds a `donnees.json` entry shaped like
//!
//! ```text
//! { "titre": "Quiz 1", "donnees": "{\"questions\": [...]}" }
//! ```
//!
//! where `donnees` is _another_ JSON document, stored as a string.
//! Each question in it becomes one CSV row per answer item:
//!
//! ```text
//! Question,Option,Texte Réponse,Réponse Correcte
//! Quiz 1,,,
//! Q1,A,opt1,true
//! Q1,A,opt2,false
//! ```
//!
//! Everything runs in one pass on one thread. The archive is read and released
//! before the CSV file is created, so a bad archive never leaves a CSV behind.

pub mod archive;
pub mod config;
pub mod export;
pub mod model;
pub mod result;

pub use config::{ExportOptions, LineEnding};
pub use model::{Donnees, Envelope, Item, Question};
pub use result::{ExportError, ExportResult};

mod arch;
mod crc_reader;
mod spec;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

/// What [`export`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub csv_path: Utf8PathBuf,
    /// Rows written, header included
    pub rows: usize,
}

/// Reads the quiz out of the archive at `zip_path`.
///
/// Returns the title (empty if there isn't one) and the questions.
pub fn load_quiz(zip_path: &Utf8Path) -> ExportResult<(String, Donnees)> {
    let json = archive::read_entry(zip_path, archive::QUIZ_ENTRY)?;
    let envelope = Envelope::from_slice(&json)?;
    let donnees = envelope.questions()?;
    Ok((envelope.title().to_owned(), donnees))
}

/// Runs the whole export: archive → JSON → JSON → CSV.
///
/// Stops at the first error. Nothing is written unless the quiz decoded cleanly,
/// but a write failure can leave a partial CSV file behind.
pub fn export(zip_path: &Utf8Path, options: &ExportOptions) -> ExportResult<ExportSummary> {
    let (title, donnees) = load_quiz(zip_path)?;
    let csv_path = options.output_path(zip_path);
    info!("Exporting {} to {}", zip_path, csv_path);
    let rows = export::write_csv_file(&csv_path, &title, &donnees, options)?;
    Ok(ExportSummary { csv_path, rows })
}

/// Like [`export`], but stops short of creating the file.
pub fn dry_run(zip_path: &Utf8Path, options: &ExportOptions) -> ExportResult<ExportSummary> {
    let (title, donnees) = load_quiz(zip_path)?;
    let csv_path = options.output_path(zip_path);
    let rows = 1 + usize::from(!title.is_empty()) + donnees.item_count();
    Ok(ExportSummary { csv_path, rows })
}
