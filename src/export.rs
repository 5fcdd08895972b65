//! Flattening the questions into CSV rows.

use std::fs::File;
use std::io::{BufWriter, Write};

use camino::Utf8Path;
use log::*;

use crate::config::{ExportOptions, UTF8_BOM};
use crate::model::Donnees;
use crate::result::*;

pub const HEADER: [&str; 4] = ["Question", "Option", "Texte Réponse", "Réponse Correcte"];

/// Writes the quiz to `sink` as CSV, returning the number of rows written
/// (header included).
///
/// Row order: header, the title (if there is one), then one row per item,
/// question by question.
pub fn write_csv<W: Write>(
    mut sink: W,
    title: &str,
    donnees: &Donnees,
    options: &ExportOptions,
) -> ExportResult<usize> {
    if options.emit_bom {
        sink.write_all(&UTF8_BOM)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .terminator(options.line_ending.terminator())
        .from_writer(sink);

    writer.write_record(HEADER)?;
    let mut rows = 1;

    if !title.is_empty() {
        writer.write_record([title, "", "", ""])?;
        rows += 1;
    }

    for question in &donnees.questions {
        for item in &question.items {
            writer.write_record([
                question.label.as_str(),
                question.option_tag.as_str(),
                item.text.as_str(),
                bool_literal(item.is_correct),
            ])?;
            rows += 1;
        }
    }

    // Flush explicitly; dropping the writer would swallow the error.
    writer.flush()?;
    Ok(rows)
}

fn bool_literal(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Creates (or truncates) `csv_path` and writes the quiz into it.
///
/// If writing fails partway, whatever made it to disk stays there.
pub fn write_csv_file(
    csv_path: &Utf8Path,
    title: &str,
    donnees: &Donnees,
    options: &ExportOptions,
) -> ExportResult<usize> {
    let file = File::create(csv_path).map_err(|source| ExportError::FileCreate {
        path: csv_path.to_owned(),
        source,
    })?;
    let mut sink = BufWriter::new(file);
    let rows = write_csv(&mut sink, title, donnees, options)?;
    sink.flush()?;
    info!("Wrote {} rows to {}", rows, csv_path);
    Ok(rows)
}
