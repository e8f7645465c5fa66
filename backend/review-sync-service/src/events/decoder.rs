use super::model::{ChangeEvent, Operation, RowPayload};
use crate::error::DecodeError;
use serde::Deserialize;
use serde_json::Value;

/// Binlog message as published by the MySQL change capture pipeline.
///
/// Extra fields (`old`, `pkNames`, `es`, `ts`, `sql`, ...) are ignored.
#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    table: Option<String>,
    #[serde(rename = "isDdl", default)]
    is_ddl: Option<bool>,
    #[serde(default)]
    data: Option<Vec<RowPayload>>,
}

/// Decode one raw message payload into a [`ChangeEvent`].
///
/// DDL events come back with no rows regardless of what `data` held.
pub fn decode(payload: &[u8]) -> Result<ChangeEvent, DecodeError> {
    let value: Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }

    let wire: WireMessage = serde_json::from_value(value)?;

    let raw_type = wire
        .kind
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .ok_or(DecodeError::MissingField("type"))?;
    let is_schema_change = wire.is_ddl.unwrap_or(false);

    let rows = if is_schema_change {
        Vec::new()
    } else {
        wire.data.ok_or(DecodeError::MissingField("data"))?
    };

    Ok(ChangeEvent {
        operation: Operation::classify(&raw_type),
        is_schema_change,
        database: wire.database.unwrap_or_default(),
        table: wire.table.unwrap_or_default(),
        raw_type,
        rows,
    })
}
