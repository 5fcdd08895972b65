//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    /// The archive file couldn't be opened or mapped
    #[error("Erreur lors de l'ouverture du fichier zip {path} : {source}")]
    ArchiveOpen {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ZIP archive contained invalid data per the spec.
    #[error("Fichier zip invalide : {0}")]
    InvalidArchive(&'static str),

    /// The ZIP archive uses an unsupported feature
    #[error("Fichier zip non pris en charge : {0}")]
    UnsupportedArchive(String),

    /// An entry flagged as UTF-8 has a name that isn't.
    /// `name` is its lossy decoding.
    #[error("Nom d'entrée UTF-8 invalide dans le zip : {name}")]
    Encoding {
        name: String,
        #[source]
        source: std::str::Utf8Error,
    },

    /// A cast from a 64-bit int to a usize failed, probably on a 32-bit system.
    #[error("Fichier zip trop grand pour l'espace d'adressage")]
    InsufficientAddressSpace,

    /// No entry in the archive carried the expected name
    #[error("Fichier {0} introuvable dans le zip.")]
    EntryNotFound(&'static str),

    /// Decompressing the entry failed, or its CRC-32 or size didn't match.
    #[error("Erreur lors de la lecture de donnees.json : {0}")]
    EntryRead(#[source] std::io::Error),

    /// The outer document isn't a JSON object
    #[error("Erreur lors du parsing du JSON : {0}")]
    EnvelopeParse(#[source] serde_json::Error),

    /// The envelope has no `donnees` string to decode
    #[error("Le champ \"donnees\" est absent ou n'est pas une chaîne")]
    MissingNestedPayload,

    /// The nested `donnees` document doesn't describe a list of questions
    #[error("Erreur lors du parsing des données des questions : {0}")]
    QuestionParse(#[source] serde_json::Error),

    #[error("Erreur lors de la création du fichier CSV {path} : {source}")]
    FileCreate {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Erreur lors de l'écriture dans le CSV : {0}")]
    CsvWrite(#[from] csv::Error),

    /// A user-provided path (not one from a ZIP archive) was invalid.
    #[error("Chemin invalide : {0}")]
    InvalidPath(String),
}

impl From<std::io::Error> for ExportError {
    /// Bare I/O errors only come out of the CSV sink;
    /// archive and file creation failures carry their path.
    fn from(e: std::io::Error) -> Self {
        ExportError::CsvWrite(csv::Error::from(e))
    }
}
