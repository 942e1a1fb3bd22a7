//! Job script parsing.
//!
//! A script is a JSON record with an `Actions` array of single-key maps:
//!
//! ```json
//! {
//!   "Actions": [
//!     { "motor": "rotate" },
//!     { "camera": "expose" },
//!     { "repeat": { "Actions": [ { "camera": "expose" } ], "Repeats": 3 } }
//!   ]
//! }
//! ```
//!
//! Array order is execution order. Leaf values are textual commands matched
//! by per-action grammars; motor and settings entries may instead be
//! structured records (`Type`/`Parameter`/`NSteps`, `Cameras`), and `repeat`
//! is always structural. Unknown keys next to `Actions` are skipped with a
//! warning so scripts written for newer engine versions still load; an
//! unknown action name is an error. Parsing never touches hardware.

use crate::actions::{
    JobAction, MotorAction, MotorRecord, RepeatAction, SettingsAction, SettingsRecord,
};
use crate::error::{ObsError, ObsResult};
use serde_json::Value;
use std::io;
use tracing::warn;

/// Parse a whole job script from a byte stream.
pub fn parse_script<R: io::Read>(reader: R) -> ObsResult<Vec<JobAction>> {
    let record: Value = serde_json::from_reader(reader)?;
    parse_record(&record)
}

fn parse_record(record: &Value) -> ObsResult<Vec<JobAction>> {
    let map = record
        .as_object()
        .ok_or_else(|| ObsError::Parse("script root must be a JSON object".into()))?;

    let mut actions = None;
    for (key, value) in map {
        if key.eq_ignore_ascii_case("actions") {
            actions = Some(value);
        } else {
            warn!(key, "skipping unknown script key");
        }
    }

    let actions = actions
        .ok_or_else(|| ObsError::Parse("script record has no Actions array".into()))?;
    parse_action_list(actions)
}

/// Parse an `Actions` array value into an ordered action list.
pub fn parse_action_list(value: &Value) -> ObsResult<Vec<JobAction>> {
    let entries = value
        .as_array()
        .ok_or_else(|| ObsError::Parse("Actions must be an array".into()))?;
    entries.iter().map(parse_entry).collect()
}

fn parse_entry(entry: &Value) -> ObsResult<JobAction> {
    let map = entry.as_object().ok_or_else(|| {
        ObsError::Parse("each action entry must be a single-key object".into())
    })?;
    if map.len() > 1 {
        return Err(ObsError::Parse(format!(
            "action entry must have exactly one key, found {}",
            map.len()
        )));
    }
    let (name, value) = match map.iter().next() {
        Some(entry) => entry,
        None => return Err(ObsError::Parse("empty action entry".into())),
    };
    parse_command(name, value)
}

/// Parse one named command into an action.
pub fn parse_command(name: &str, value: &Value) -> ObsResult<JobAction> {
    match name.trim().to_ascii_lowercase().as_str() {
        "camera" => Ok(JobAction::Camera(command_text(name, value)?.parse()?)),
        "motor" => parse_motor(value),
        "shutter" => Ok(JobAction::Shutter(command_text(name, value)?.parse()?)),
        "delay" => Ok(JobAction::Delay(command_text(name, value)?.parse()?)),
        "settings" => parse_settings(value),
        "repeat" => parse_repeat(value),
        other => Err(ObsError::Parse(format!("unknown action '{other}'"))),
    }
}

fn command_text<'a>(name: &str, value: &'a Value) -> ObsResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| ObsError::Parse(format!("'{name}' action expects a command string")))
}

fn parse_motor(value: &Value) -> ObsResult<JobAction> {
    let action = match value {
        Value::Object(_) => {
            let record: MotorRecord = serde_json::from_value(value.clone())?;
            MotorAction::from_record(&record)?
        }
        _ => command_text("motor", value)?.parse()?,
    };
    Ok(JobAction::Motor(action))
}

fn parse_settings(value: &Value) -> ObsResult<JobAction> {
    let action = match value {
        Value::Object(_) => {
            let record: SettingsRecord = serde_json::from_value(value.clone())?;
            SettingsAction::for_cameras(record.cameras)
        }
        _ => command_text("settings", value)?.parse()?,
    };
    Ok(JobAction::Settings(action))
}

fn parse_repeat(value: &Value) -> ObsResult<JobAction> {
    let map = value.as_object().ok_or_else(|| {
        ObsError::Parse("'repeat' expects a record with an Actions array".into())
    })?;

    let mut actions = None;
    let mut repeats: u32 = 1;
    for (key, value) in map {
        if key.eq_ignore_ascii_case("actions") {
            actions = Some(parse_action_list(value)?);
        } else if key.eq_ignore_ascii_case("repeats") {
            repeats = value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    ObsError::Parse(format!("invalid repeat count {value}"))
                })?;
        } else {
            warn!(key, "skipping unknown repeat key");
        }
    }

    let actions = actions
        .ok_or_else(|| ObsError::Parse("'repeat' record has no Actions array".into()))?;
    Ok(JobAction::Repeat(RepeatAction::new(actions, repeats)))
}
