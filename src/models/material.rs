//! Material reference: the content a quiz is generated from.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Reference to the learning content behind a quiz.
///
/// File materials are addressed by an opaque string id; tag materials
/// group several files under an integer tag id. The serde representation
/// carries an explicit `type` discriminator so wire payloads are always
/// unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum MaterialRef {
    /// A single uploaded file, addressed by its string id.
    File(String),
    /// A tag grouping one or more files, addressed by its integer id.
    Tag(i64),
}

impl MaterialRef {
    /// Type discriminator as stored in the database.
    #[must_use]
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Tag(_) => "tag",
        }
    }

    /// Identifier rendered as a string column value.
    #[must_use]
    pub fn id_string(&self) -> String {
        match self {
            Self::File(id) => id.clone(),
            Self::Tag(id) => id.to_string(),
        }
    }

    /// Rebuild a reference from its database column pair.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` when the discriminator is unknown or a tag
    /// id fails to parse.
    pub fn from_columns(material_type: &str, material_id: &str) -> Result<Self> {
        match material_type {
            "file" => Ok(Self::File(material_id.to_owned())),
            "tag" => material_id
                .parse::<i64>()
                .map(Self::Tag)
                .map_err(|err| AppError::Db(format!("invalid tag id {material_id}: {err}"))),
            other => Err(AppError::Db(format!("invalid material type: {other}"))),
        }
    }

    /// Reject empty file ids and non-positive tag ids.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` describing the offending field.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::File(id) if id.trim().is_empty() => {
                Err(AppError::Validation("file material id must not be empty".into()))
            }
            Self::Tag(id) if *id <= 0 => {
                Err(AppError::Validation("tag material id must be positive".into()))
            }
            _ => Ok(()),
        }
    }
}

impl Display for MaterialRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(id) => write!(f, "file:{id}"),
            Self::Tag(id) => write!(f, "tag:{id}"),
        }
    }
}
