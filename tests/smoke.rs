use std::fs;
use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use log::*;
use serde_json::json;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use digicsv::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn lf() -> ExportOptions {
    ExportOptions {
        emit_bom: false,
        line_ending: LineEnding::Lf,
        output: None,
    }
}

/// Builds the `donnees.json` envelope digistorm writes,
/// with the questions JSON-encoded into a string.
fn envelope(title: Option<&str>, questions: serde_json::Value) -> Vec<u8> {
    let donnees = json!({ "questions": questions }).to_string();
    let mut outer = json!({ "donnees": donnees, "version": 3 });
    if let Some(title) = title {
        outer["titre"] = json!(title);
    }
    outer.to_string().into_bytes()
}

fn write_zip(
    dir: &Utf8Path,
    name: &str,
    files: &[(&str, &[u8])],
    method: CompressionMethod,
) -> Result<Utf8PathBuf> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(method);
    for (entry_name, contents) in files {
        writer.start_file(entry_name.to_string(), options)?;
        writer.write_all(contents)?;
    }
    let bytes = writer.finish()?.into_inner();

    let zip_path = dir.join(name);
    fs::write(&zip_path, bytes).with_context(|| format!("Couldn't write {}", zip_path))?;
    Ok(zip_path)
}

fn tempdir() -> Result<(tempfile::TempDir, Utf8PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = Utf8PathBuf::from_path_buf(dir.path().to_owned())
        .map_err(|p| anyhow::anyhow!("Non-UTF-8 temp dir {}", p.display()))?;
    Ok((dir, path))
}

#[test]
fn smoke() -> Result<()> {
    init_logging();
    let (_guard, dir) = tempdir()?;

    let quiz = br#"{"titre":"Quiz 1","donnees":"{\"questions\":[{\"question\":\"Q1\",\"option\":\"A\",\"items\":[{\"texte\":\"opt1\",\"reponse\":true},{\"texte\":\"opt2\",\"reponse\":false}]}]}"}"#;
    for (name, method) in [
        ("stored.zip", CompressionMethod::Stored),
        ("deflated.zip", CompressionMethod::Deflated),
    ] {
        info!("Exporting {}", name);
        let zip_path = write_zip(
            &dir,
            name,
            &[("images/logo.png", b"\x89PNG"), ("donnees.json", quiz)],
            method,
        )?;

        let summary = export(&zip_path, &lf())?;
        assert_eq!(summary.csv_path, zip_path.with_extension("csv"));
        assert_eq!(summary.rows, 4);

        let csv = fs::read_to_string(&summary.csv_path)?;
        assert_eq!(
            csv,
            "Question,Option,Texte Réponse,Réponse Correcte\n\
             Quiz 1,,,\n\
             Q1,A,opt1,true\n\
             Q1,A,opt2,false\n"
        );
    }
    Ok(())
}

#[test]
fn row_count_and_order() -> Result<()> {
    init_logging();
    let (_guard, dir) = tempdir()?;

    let questions: Vec<_> = (0..5)
        .map(|q| {
            let items: Vec<_> = (0..q)
                .map(|i| json!({ "texte": format!("r{q}.{i}"), "reponse": i % 2 == 0 }))
                .collect();
            json!({ "question": format!("Q{q}"), "option": "multiple", "items": items })
        })
        .collect();
    let zip_path = write_zip(
        &dir,
        "quiz.zip",
        &[("donnees.json", envelope(None, json!(questions)).as_slice())],
        CompressionMethod::Deflated,
    )?;

    let summary = export(&zip_path, &lf())?;
    // No title: 1 header + 0 + 1 + 2 + 3 + 4
    assert_eq!(summary.rows, 11);

    let csv = fs::read_to_string(&summary.csv_path)?;
    let mut reader = csv::Reader::from_reader(csv.as_bytes());
    assert_eq!(
        reader.headers()?.iter().collect::<Vec<_>>(),
        ["Question", "Option", "Texte Réponse", "Réponse Correcte"]
    );

    let records = reader.records().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(records.len(), 10);
    let mut expected = Vec::new();
    for q in 0..5 {
        for i in 0..q {
            expected.push(vec![
                format!("Q{q}"),
                "multiple".to_string(),
                format!("r{q}.{i}"),
                (i % 2 == 0).to_string(),
            ]);
        }
    }
    let actual: Vec<Vec<String>> = records
        .iter()
        .map(|r| r.iter().map(String::from).collect())
        .collect();
    assert_eq!(actual, expected);
    Ok(())
}

#[test]
fn idempotent() -> Result<()> {
    init_logging();
    let (_guard, dir) = tempdir()?;
    let questions = json!([
        { "question": "Capitale, de la France ?", "option": "unique",
          "items": [ { "texte": "Paris", "reponse": true },
                     { "texte": "Lyon \"la belle\"", "reponse": false } ] }
    ]);
    let zip_path = write_zip(
        &dir,
        "quiz.zip",
        &[("donnees.json", envelope(Some("Géographie"), questions).as_slice())],
        CompressionMethod::Stored,
    )?;

    let options = ExportOptions {
        emit_bom: true,
        ..lf()
    };
    let first = fs::read(export(&zip_path, &options)?.csv_path)?;
    let second = fs::read(export(&zip_path, &options)?.csv_path)?;
    assert_eq!(first, second);
    assert!(first.starts_with(&[0xEF, 0xBB, 0xBF]));
    Ok(())
}

#[test]
fn missing_entry_leaves_no_csv() -> Result<()> {
    init_logging();
    let (_guard, dir) = tempdir()?;
    let zip_path = write_zip(
        &dir,
        "autre.zip",
        &[("quiz/donnees.json", b"{}"), ("index.html", b"<html></html>")],
        CompressionMethod::Deflated,
    )?;

    match export(&zip_path, &lf()) {
        Err(ExportError::EntryNotFound(name)) => assert_eq!(name, "donnees.json"),
        other => panic!("Expected EntryNotFound, got {:?}", other),
    }
    assert!(!zip_path.with_extension("csv").exists());
    Ok(())
}

#[test]
fn decode_failures_leave_no_csv() -> Result<()> {
    init_logging();
    let (_guard, dir) = tempdir()?;

    let cases: [(&str, &[u8]); 3] = [
        ("pas-json.zip", b"<html>"),
        ("sans-donnees.zip", br#"{"titre":"T"}"#),
        ("donnees-cassees.zip", br#"{"titre":"T","donnees":"{\"questions\":"}"#),
    ];
    for (name, json) in cases {
        let zip_path = write_zip(&dir, name, &[("donnees.json", json)], CompressionMethod::Stored)?;
        let err = export(&zip_path, &lf()).unwrap_err();
        match (name, &err) {
            ("pas-json.zip", ExportError::EnvelopeParse(_)) => {}
            ("sans-donnees.zip", ExportError::MissingNestedPayload) => {}
            ("donnees-cassees.zip", ExportError::QuestionParse(_)) => {}
            _ => panic!("Unexpected error for {}: {:?}", name, err),
        }
        assert!(!zip_path.with_extension("csv").exists());
    }
    Ok(())
}

#[test]
fn unwritable_output_leaves_no_csv() -> Result<()> {
    init_logging();
    let (_guard, dir) = tempdir()?;
    let questions = json!([{ "question": "Q", "option": "o", "items": [] }]);
    let zip_path = write_zip(
        &dir,
        "quiz.zip",
        &[("donnees.json", envelope(Some("T"), questions).as_slice())],
        CompressionMethod::Stored,
    )?;

    let output = dir.join("absent").join("quiz.csv");
    let options = ExportOptions {
        output: Some(output.clone()),
        ..lf()
    };
    match export(&zip_path, &options) {
        Err(ExportError::FileCreate { path, .. }) => assert_eq!(path, output),
        other => panic!("Expected FileCreate, got {:?}", other),
    }
    assert!(!output.exists());
    assert!(!dir.join("absent").exists());
    assert!(!zip_path.with_extension("csv").exists());
    Ok(())
}

#[test]
fn bad_entry_name_beside_the_quiz() -> Result<()> {
    init_logging();
    let (_guard, dir) = tempdir()?;
    let questions = json!([{ "question": "Q", "option": "o", "items": [{ "texte": "t", "reponse": false }] }]);
    let zip_path = write_zip(
        &dir,
        "quiz.zip",
        &[
            ("images/é.png", b"\x89PNG"),
            ("donnees.json", envelope(Some("T"), questions).as_slice()),
        ],
        CompressionMethod::Stored,
    )?;

    // Same length, no longer UTF-8
    let mut bytes = fs::read(&zip_path)?;
    while let Some(at) = bytes.windows(6).position(|w| w == "é.png".as_bytes()) {
        bytes[at..at + 2].copy_from_slice(b"\xff\xfe");
    }
    fs::write(&zip_path, bytes)?;

    let summary = export(&zip_path, &lf())?;
    assert_eq!(summary.rows, 3);
    assert_eq!(
        fs::read_to_string(&summary.csv_path)?,
        "Question,Option,Texte Réponse,Réponse Correcte\nT,,,\nQ,o,t,false\n"
    );
    Ok(())
}

#[test]
fn not_a_zip() -> Result<()> {
    init_logging();
    let (_guard, dir) = tempdir()?;

    match export(&dir.join("absent.zip"), &lf()) {
        Err(ExportError::ArchiveOpen { path, .. }) => assert!(path.ends_with("absent.zip")),
        other => panic!("Expected ArchiveOpen, got {:?}", other),
    }

    let bogus = dir.join("texte.zip");
    fs::write(&bogus, "ceci n'est pas un zip, seulement du texte")?;
    match export(&bogus, &lf()) {
        Err(ExportError::InvalidArchive(_)) => {}
        other => panic!("Expected InvalidArchive, got {:?}", other),
    }
    Ok(())
}

#[test]
fn explicit_output_and_dry_run() -> Result<()> {
    init_logging();
    let (_guard, dir) = tempdir()?;
    let questions = json!([{ "question": "Q", "option": "o", "items": [{ "texte": "t", "reponse": true }] }]);
    let zip_path = write_zip(
        &dir,
        "quiz.zip",
        &[("donnees.json", envelope(Some("T"), questions).as_slice())],
        CompressionMethod::Deflated,
    )?;

    let output = dir.join("ailleurs.csv");
    let options = ExportOptions {
        output: Some(output.clone()),
        ..lf()
    };

    let planned = dry_run(&zip_path, &options)?;
    assert_eq!(planned.csv_path, output);
    assert_eq!(planned.rows, 3);
    assert!(!output.exists());

    let done = export(&zip_path, &options)?;
    assert_eq!(done, planned);
    assert_eq!(fs::read_to_string(&output)?.lines().count(), 3);
    assert!(!zip_path.with_extension("csv").exists());
    Ok(())
}
