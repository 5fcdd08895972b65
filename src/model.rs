//! The quiz as digistorm stores it in `donnees.json`.
//!
//! The file is JSON twice over: an envelope object whose `donnees` field
//! is a string holding a second JSON document with the questions.
//! [`Envelope::from_slice`] decodes the first layer,
//! [`Envelope::questions`] the second.

use log::*;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::result::*;

/// One answer a student can pick
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Item {
    #[serde(rename = "texte", default, deserialize_with = "null_as_default")]
    pub text: String,

    #[serde(rename = "reponse", default, deserialize_with = "null_as_default")]
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Question {
    #[serde(rename = "question", default, deserialize_with = "null_as_default")]
    pub label: String,

    /// Digistorm's answer mode for the question (single or multiple choice, ...)
    #[serde(rename = "option", default, deserialize_with = "null_as_default")]
    pub option_tag: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<Item>,
}

/// The decoded contents of the envelope's `donnees` string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Donnees {
    pub questions: Vec<Question>,
}

impl Donnees {
    pub fn parse(raw: &str) -> ExportResult<Self> {
        let value: Value = serde_json::from_str(raw).map_err(ExportError::QuestionParse)?;
        // Serde would happily read a struct out of an array, too.
        if !value.is_object() {
            return Err(ExportError::QuestionParse(serde_json::Error::custom(
                "expected an object with a \"questions\" array",
            )));
        }
        let donnees: Donnees = serde_json::from_value(value).map_err(ExportError::QuestionParse)?;
        debug!(
            "Decoded {} questions with {} items",
            donnees.questions.len(),
            donnees.item_count()
        );
        Ok(donnees)
    }

    /// Total number of answer items across all questions
    pub fn item_count(&self) -> usize {
        self.questions.iter().map(|q| q.items.len()).sum()
    }
}

/// The outer object of `donnees.json`
///
/// Both fields are kept as raw JSON so their presence and type
/// can be checked explicitly instead of failing the whole decode.
#[derive(Debug, Default)]
pub struct Envelope {
    titre: Option<Value>,
    donnees: Option<Value>,
}

impl Envelope {
    pub fn from_slice(bytes: &[u8]) -> ExportResult<Self> {
        let mut fields: Map<String, Value> =
            serde_json::from_slice(bytes).map_err(ExportError::EnvelopeParse)?;
        trace!("Envelope keys: {:?}", fields.keys().collect::<Vec<_>>());
        Ok(Self {
            titre: fields.remove("titre"),
            donnees: fields.remove("donnees"),
        })
    }

    /// The quiz title, or an empty string if it's missing or isn't a string.
    pub fn title(&self) -> &str {
        match &self.titre {
            Some(Value::String(title)) => title,
            None | Some(Value::Null) => "",
            Some(other) => {
                warn!("Ignoring non-string title {}", other);
                ""
            }
        }
    }

    /// The nested JSON document holding the questions, still encoded.
    pub fn donnees_raw(&self) -> ExportResult<&str> {
        match &self.donnees {
            Some(Value::String(raw)) => Ok(raw),
            _ => Err(ExportError::MissingNestedPayload),
        }
    }

    /// Decodes the nested document.
    pub fn questions(&self) -> ExportResult<Donnees> {
        Donnees::parse(self.donnees_raw()?)
    }
}

/// Decodes an explicit `null` the same way as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
