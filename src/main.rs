use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::*;
use camino::Utf8PathBuf;
use log::*;
use structopt::*;

use digicsv::{ExportError, ExportOptions};

const DETAILS: &str = "\
SORTIE :
    Le programme génère un fichier CSV dans le même dossier que le fichier ZIP,
    avec le même nom mais une extension .csv (sauf avec --output).

EXEMPLE :
    digicsv mon_fichier.zip

ENCODAGE :
    - Sous Windows : BOM UTF-8 et fins de ligne CRLF, pour Excel.
    - Sous Linux/Mac : pas de BOM, fins de ligne LF.";

/// Ce programme permet d'extraire un fichier donnees.json contenu dans un fichier .zip
/// généré par le site digistorm.app et d'exporter les données des QCM au format .csv.
#[derive(Debug, StructOpt)]
#[structopt(name = "digicsv", after_help = DETAILS)]
struct Opt {
    /// Répéter pour plus de détails dans le journal (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Écrit le CSV à cet emplacement au lieu de le placer à côté du ZIP
    #[structopt(short, long)]
    output: Option<PathBuf>,

    /// Ajoute toujours le BOM UTF-8 en tête du fichier
    #[structopt(long, conflicts_with = "no-bom")]
    bom: bool,

    /// N'ajoute jamais le BOM UTF-8
    #[structopt(long)]
    no_bom: bool,

    /// Lit et décode le ZIP sans écrire le CSV
    #[structopt(short = "n", long)]
    dry_run: bool,

    /// Chemin vers le fichier ZIP contenant les données du QCM
    #[structopt(name("fichier.zip"))]
    zip_path: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbose + 1);
    if let Err(e) = errlog.init() {
        eprintln!("Impossible d'initialiser le journal : {e}");
    }

    if let Err(e) = run(args) {
        // The message is for whoever ran us; -v shows the details.
        debug!("{:?}", e);
        println!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(args: Opt) -> Result<()> {
    let zip_path = match &args.zip_path {
        Some(p) => utf8(p.clone())?,
        None => {
            Opt::clap()
                .print_long_help()
                .context("Couldn't print help")?;
            println!();
            return Ok(());
        }
    };

    let options = options_from(&args)?;
    debug!("{:?}", options);

    if args.dry_run {
        let summary = digicsv::dry_run(&zip_path, &options)?;
        println!(
            "Exportation simulée : {} ({} lignes)",
            summary.csv_path, summary.rows
        );
    } else {
        let summary = digicsv::export(&zip_path, &options)?;
        println!("Exportation terminée : {}", summary.csv_path);
    }
    Ok(())
}

/// Host defaults, overridden by whatever flags were passed
fn options_from(args: &Opt) -> Result<ExportOptions> {
    let mut options = ExportOptions::for_host();
    if args.bom {
        options.emit_bom = true;
    }
    if args.no_bom {
        options.emit_bom = false;
    }
    if let Some(output) = &args.output {
        options.output = Some(utf8(output.clone())?);
    }
    Ok(options)
}

fn utf8(path: PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|p| ExportError::InvalidPath(p.display().to_string()).into())
}
