use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use crate::error::DataMeshError;

/// The two primary-key families a backend record can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkKind {
    Uuid,
    Id,
}

/// Classify a primary key value as UUID or integer ID.
///
/// `Uuid` only for RFC-4122 v4 values (case-insensitive hex, standard
/// dashes); everything else is treated as an integer-compatible ID.
pub fn classify(value: &str) -> PkKind {
    match Uuid::try_parse(value.trim()) {
        Ok(uuid) if uuid.get_version_num() == 4 => PkKind::Uuid,
        _ => PkKind::Id,
    }
}

/// A concrete primary key, carried in its canonical form.
///
/// Every join insertion and lookup goes through this type: the variant
/// decides whether the `_id` or `_uuid` column pair is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordPk {
    Uuid(Uuid),
    Id(i64),
}

impl RecordPk {
    /// Parse a PK from its string form.
    pub fn parse(raw: &str) -> Result<Self, DataMeshError> {
        let raw = raw.trim();
        match classify(raw) {
            PkKind::Uuid => Ok(RecordPk::Uuid(
                Uuid::try_parse(raw).map_err(|_| DataMeshError::invalid_pk(raw))?,
            )),
            PkKind::Id => raw
                .parse::<i64>()
                .map(RecordPk::Id)
                .map_err(|_| DataMeshError::invalid_pk(raw)),
        }
    }

    /// Parse a PK out of a JSON payload field. Numbers are stringified
    /// before classification so `42` and `"42"` land on the same key.
    pub fn from_value(value: &Value) -> Result<Self, DataMeshError> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => Self::parse(&n.to_string()),
            other => Err(DataMeshError::invalid_pk(other.to_string())),
        }
    }

    pub fn kind(&self) -> PkKind {
        match self {
            RecordPk::Uuid(_) => PkKind::Uuid,
            RecordPk::Id(_) => PkKind::Id,
        }
    }
}

impl fmt::Display for RecordPk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordPk::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
            RecordPk::Id(id) => write!(f, "{id}"),
        }
    }
}
