//! Kill normalization from raw submission fields to `KillEvent`
//!
//! Game servers post loosely typed JSON: ids may arrive as strings or
//! numbers, numeric fields as numbers or numeric strings. Normalization
//! coerces them, defaults absent modifiers to 0 and checks that every
//! dimension-carrying field is present. `victim_id` and `cause_of_death`
//! are mandatory; a submission without them is rejected outright. Pure,
//! no I/O.

use super::types::{KillEvent, Loadout};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw field set of one kill submission
///
/// Every field is optional at this layer; unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawKillFields {
    pub killstat_version: Option<Value>,
    pub match_id: Option<Value>,
    pub servername: Option<Value>,
    pub game_mode: Option<Value>,
    pub map: Option<Value>,
    pub game_time: Option<Value>,
    pub player_count: Option<Value>,
    pub attacker_name: Option<Value>,
    pub attacker_id: Option<Value>,
    pub attacker_current_weapon: Option<Value>,
    pub attacker_current_weapon_mods: Option<Value>,
    pub attacker_weapon_1: Option<Value>,
    pub attacker_weapon_1_mods: Option<Value>,
    pub attacker_weapon_2: Option<Value>,
    pub attacker_weapon_2_mods: Option<Value>,
    pub attacker_weapon_3: Option<Value>,
    pub attacker_weapon_3_mods: Option<Value>,
    pub attacker_offhand_weapon_1: Option<Value>,
    pub attacker_offhand_weapon_2: Option<Value>,
    pub victim_name: Option<Value>,
    pub victim_id: Option<Value>,
    pub victim_current_weapon: Option<Value>,
    pub victim_current_weapon_mods: Option<Value>,
    pub victim_weapon_1: Option<Value>,
    pub victim_weapon_1_mods: Option<Value>,
    pub victim_weapon_2: Option<Value>,
    pub victim_weapon_2_mods: Option<Value>,
    pub victim_weapon_3: Option<Value>,
    pub victim_weapon_3_mods: Option<Value>,
    pub victim_offhand_weapon_1: Option<Value>,
    pub victim_offhand_weapon_2: Option<Value>,
    pub cause_of_death: Option<Value>,
    pub distance: Option<Value>,
}

impl RawKillFields {
    /// Parse a raw field set from a JSON object
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// One submission: the authenticated source id plus its raw fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub server_id: i64,
    #[serde(flatten)]
    pub fields: RawKillFields,
}

impl Submission {
    /// Parse a Submission from a JSONL line
    pub fn from_jsonl(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizationError {
    /// A dimension-carrying field is empty; event is skipped from aggregation
    MissingDimension(&'static str),
    /// A mandatory non-dimension field is absent
    MissingField(&'static str),
    InvalidNumber { field: &'static str, value: String },
    NegativeNumber(&'static str),
}

impl NormalizationError {
    /// Whether the event may still be accepted (and raw-captured)
    pub fn is_missing_dimension(&self) -> bool {
        matches!(self, NormalizationError::MissingDimension(_))
    }
}

impl std::fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizationError::MissingDimension(field) => {
                write!(f, "missing dimension field: {}", field)
            }
            NormalizationError::MissingField(field) => write!(f, "{}: mandatory", field),
            NormalizationError::InvalidNumber { field, value } => {
                write!(f, "{}: must be a valid number, got {}", field, value)
            }
            NormalizationError::NegativeNumber(field) => {
                write!(f, "{}: must be a positive number", field)
            }
        }
    }
}

impl std::error::Error for NormalizationError {}

/// Normalize raw fields into a `KillEvent`
///
/// Fails with `MissingField` when victim_id or cause_of_death is empty and
/// with `MissingDimension` when attacker_id, map, servername or game_mode
/// is empty.
pub fn normalize(server_id: i64, raw: &RawKillFields) -> Result<KillEvent, NormalizationError> {
    let event = normalize_for_capture(server_id, raw)?;
    match event.missing_dimension() {
        Some(field) => Err(NormalizationError::MissingDimension(field)),
        None => Ok(event),
    }
}

/// Normalize without the dimension check
///
/// Missing dimensions become empty strings. Used for raw durable capture of
/// events that are excluded from aggregation.
pub fn normalize_for_capture(
    server_id: i64,
    raw: &RawKillFields,
) -> Result<KillEvent, NormalizationError> {
    let victim_id = mandatory("victim_id", &raw.victim_id)?;
    let cause_of_death = mandatory("cause_of_death", &raw.cause_of_death)?;

    let distance = non_negative("distance", number("distance", &raw.distance)?)?;
    let game_time = non_negative("game_time", number("game_time", &raw.game_time)?)?;
    let player_count = integer("player_count", &raw.player_count)?;
    let player_count = match non_negative("player_count", player_count)? {
        None => 0,
        Some(count) => u32::try_from(count).map_err(|_| NormalizationError::InvalidNumber {
            field: "player_count",
            value: count.to_string(),
        })?,
    };
    let attacker_weapon_mods = integer(
        "attacker_current_weapon_mods",
        &raw.attacker_current_weapon_mods,
    )?;
    let victim_weapon_mods = integer("victim_current_weapon_mods", &raw.victim_current_weapon_mods)?;

    let attacker_loadout = attacker_loadout_of(raw)?;
    let victim_loadout = victim_loadout_of(raw)?;

    let victim_weapon = weapon_text(&raw.victim_current_weapon);
    let deaths_with_weapon = victim_weapon.as_deref() == Some(cause_of_death.as_str());

    Ok(KillEvent {
        server_id,
        servername: text(&raw.servername).unwrap_or_default(),
        match_id: text(&raw.match_id).filter(|m| !m.is_empty()),
        map: text(&raw.map).unwrap_or_default(),
        game_mode: text(&raw.game_mode).unwrap_or_default(),
        attacker_id: text(&raw.attacker_id).unwrap_or_default(),
        attacker_name: text(&raw.attacker_name).unwrap_or_default(),
        victim_id,
        victim_name: text(&raw.victim_name).unwrap_or_default(),
        cause_of_death,
        attacker_weapon: weapon_text(&raw.attacker_current_weapon),
        attacker_weapon_mods: attacker_weapon_mods.unwrap_or(0),
        victim_weapon,
        victim_weapon_mods: victim_weapon_mods.unwrap_or(0),
        attacker_loadout,
        victim_loadout,
        distance: distance.unwrap_or(0.0),
        game_time: game_time.unwrap_or(0.0),
        player_count,
        kills: 1,
        deaths: 1,
        deaths_with_weapon,
        killstat_version: text(&raw.killstat_version).filter(|v| !v.is_empty()),
    })
}

fn attacker_loadout_of(raw: &RawKillFields) -> Result<Loadout, NormalizationError> {
    let (weapon_1, weapon_1_mods) =
        slot(&raw.attacker_weapon_1, "attacker_weapon_1_mods", &raw.attacker_weapon_1_mods)?;
    let (weapon_2, weapon_2_mods) =
        slot(&raw.attacker_weapon_2, "attacker_weapon_2_mods", &raw.attacker_weapon_2_mods)?;
    let (weapon_3, weapon_3_mods) =
        slot(&raw.attacker_weapon_3, "attacker_weapon_3_mods", &raw.attacker_weapon_3_mods)?;

    Ok(Loadout {
        weapon_1,
        weapon_1_mods,
        weapon_2,
        weapon_2_mods,
        weapon_3,
        weapon_3_mods,
        offhand_weapon_1: weapon_text(&raw.attacker_offhand_weapon_1),
        offhand_weapon_2: weapon_text(&raw.attacker_offhand_weapon_2),
    })
}

fn victim_loadout_of(raw: &RawKillFields) -> Result<Loadout, NormalizationError> {
    let (weapon_1, weapon_1_mods) =
        slot(&raw.victim_weapon_1, "victim_weapon_1_mods", &raw.victim_weapon_1_mods)?;
    let (weapon_2, weapon_2_mods) =
        slot(&raw.victim_weapon_2, "victim_weapon_2_mods", &raw.victim_weapon_2_mods)?;
    let (weapon_3, weapon_3_mods) =
        slot(&raw.victim_weapon_3, "victim_weapon_3_mods", &raw.victim_weapon_3_mods)?;

    Ok(Loadout {
        weapon_1,
        weapon_1_mods,
        weapon_2,
        weapon_2_mods,
        weapon_3,
        weapon_3_mods,
        offhand_weapon_1: weapon_text(&raw.victim_offhand_weapon_1),
        offhand_weapon_2: weapon_text(&raw.victim_offhand_weapon_2),
    })
}

/// One loadout slot; absent mods default to 0
fn slot(
    weapon: &Option<Value>,
    mods_field: &'static str,
    mods: &Option<Value>,
) -> Result<(Option<String>, i64), NormalizationError> {
    Ok((weapon_text(weapon), integer(mods_field, mods)?.unwrap_or(0)))
}

fn weapon_text(value: &Option<Value>) -> Option<String> {
    text(value).filter(|w| !w.is_empty())
}

fn mandatory(field: &'static str, value: &Option<Value>) -> Result<String, NormalizationError> {
    text(value)
        .filter(|v| !v.is_empty())
        .ok_or(NormalizationError::MissingField(field))
}

/// String view of a scalar; null and structured values count as absent
fn text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce a JSON number or numeric string; absent or empty -> None
fn number(field: &'static str, value: &Option<Value>) -> Result<Option<f64>, NormalizationError> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(NormalizationError::InvalidNumber {
            field,
            value: value.as_ref().map(|v| v.to_string()).unwrap_or_default(),
        }),
    }
}

/// Like `number`, but the value must be integral
fn integer(field: &'static str, value: &Option<Value>) -> Result<Option<i64>, NormalizationError> {
    match number(field, value)? {
        None => Ok(None),
        Some(v) if v.fract() == 0.0 && v.abs() <= i64::MAX as f64 => Ok(Some(v as i64)),
        Some(_) => Err(NormalizationError::InvalidNumber {
            field,
            value: value.as_ref().map(|v| v.to_string()).unwrap_or_default(),
        }),
    }
}

fn non_negative<T>(field: &'static str, value: Option<T>) -> Result<Option<T>, NormalizationError>
where
    T: PartialOrd + Default,
{
    match value {
        Some(v) if v < T::default() => Err(NormalizationError::NegativeNumber(field)),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_kill() -> RawKillFields {
        serde_json::from_value(json!({
            "killstat_version": "ks_3.0.0",
            "match_id": "31b1f34d",
            "servername": "tdm-host",
            "game_mode": "tdm",
            "map": "thaw",
            "game_time": 377.799,
            "player_count": 1,
            "attacker_name": "TestAttacker",
            "attacker_id": "1",
            "attacker_current_weapon": "smr",
            "attacker_current_weapon_mods": 0,
            "victim_name": "TestVictim",
            "victim_id": "0",
            "victim_current_weapon": "smr",
            "cause_of_death": "smr",
            "distance": 120
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_well_formed_kill() {
        let event = normalize(3, &raw_kill()).unwrap();

        assert_eq!(event.server_id, 3);
        assert_eq!(event.attacker_id, "1");
        assert_eq!(event.victim_id, "0");
        assert_eq!(event.cause_of_death, "smr");
        assert_eq!(event.distance, 120.0);
        assert_eq!(event.player_count, 1);
        assert_eq!(event.kills, 1);
        assert_eq!(event.deaths, 1);
        assert!(event.deaths_with_weapon);
        // Absent modifier defaults to 0
        assert_eq!(event.victim_weapon_mods, 0);
    }

    #[test]
    fn test_numeric_strings_and_numeric_ids_are_coerced() {
        let mut raw = raw_kill();
        raw.distance = Some(json!("42.5"));
        raw.attacker_id = Some(json!(1005930844007u64));

        let event = normalize(3, &raw).unwrap();
        assert_eq!(event.distance, 42.5);
        assert_eq!(event.attacker_id, "1005930844007");
    }

    #[test]
    fn test_missing_dimension_is_reported() {
        let mut raw = raw_kill();
        raw.map = Some(json!(""));

        let err = normalize(3, &raw).unwrap_err();
        assert_eq!(err, NormalizationError::MissingDimension("map"));
        assert!(err.is_missing_dimension());

        // Capture path still builds the record
        let captured = normalize_for_capture(3, &raw).unwrap();
        assert_eq!(captured.map, "");
    }

    #[test]
    fn test_missing_victim_is_a_validation_failure() {
        let mut raw = raw_kill();
        raw.victim_id = None;

        let err = normalize(3, &raw).unwrap_err();
        assert_eq!(err, NormalizationError::MissingField("victim_id"));
        assert!(!err.is_missing_dimension());
    }

    #[test]
    fn test_empty_cause_of_death_is_a_validation_failure() {
        for cause in [json!(""), json!("   "), Value::Null] {
            let mut raw = raw_kill();
            raw.cause_of_death = Some(cause);

            let err = normalize(3, &raw).unwrap_err();
            assert_eq!(err, NormalizationError::MissingField("cause_of_death"));
            assert!(!err.is_missing_dimension());
            // Not capturable either
            assert!(normalize_for_capture(3, &raw).is_err());
        }
    }

    #[test]
    fn test_player_count_out_of_range_is_rejected() {
        let mut raw = raw_kill();
        raw.player_count = Some(json!(4_294_967_297u64));
        assert_eq!(
            normalize(3, &raw).unwrap_err(),
            NormalizationError::InvalidNumber {
                field: "player_count",
                value: "4294967297".to_string(),
            }
        );

        let mut raw = raw_kill();
        raw.player_count = Some(json!(u32::MAX));
        assert_eq!(normalize(3, &raw).unwrap().player_count, u32::MAX);

        let mut raw = raw_kill();
        raw.player_count = Some(json!(-2));
        assert_eq!(
            normalize(3, &raw).unwrap_err(),
            NormalizationError::NegativeNumber("player_count")
        );
    }

    #[test]
    fn test_loadouts_are_carried_on_the_event() {
        let mut raw = raw_kill();
        raw.attacker_weapon_1 = Some(json!("smr"));
        raw.attacker_weapon_1_mods = Some(json!("12"));
        raw.attacker_weapon_2 = Some(json!("autopistol"));
        raw.attacker_weapon_3 = Some(json!("defender"));
        raw.attacker_offhand_weapon_1 = Some(json!("frag"));
        raw.victim_weapon_1 = Some(json!("car"));
        raw.victim_offhand_weapon_2 = Some(json!(0));

        let event = normalize(3, &raw).unwrap();
        let attacker = &event.attacker_loadout;
        assert_eq!(attacker.weapon_1.as_deref(), Some("smr"));
        assert_eq!(attacker.weapon_1_mods, 12);
        assert_eq!(attacker.weapon_2.as_deref(), Some("autopistol"));
        assert_eq!(attacker.weapon_2_mods, 0);
        assert_eq!(attacker.weapon_3.as_deref(), Some("defender"));
        assert_eq!(attacker.offhand_weapon_1.as_deref(), Some("frag"));
        assert_eq!(attacker.offhand_weapon_2, None);

        let victim = &event.victim_loadout;
        assert_eq!(victim.weapon_1.as_deref(), Some("car"));
        assert_eq!(victim.offhand_weapon_2.as_deref(), Some("0"));
    }

    #[test]
    fn test_loadout_mods_must_be_integers() {
        let mut raw = raw_kill();
        raw.victim_weapon_2_mods = Some(json!("extended"));
        assert!(matches!(
            normalize(3, &raw),
            Err(NormalizationError::InvalidNumber { field: "victim_weapon_2_mods", .. })
        ));
    }

    #[test]
    fn test_invalid_and_negative_numbers() {
        let mut raw = raw_kill();
        raw.distance = Some(json!("far"));
        assert!(matches!(
            normalize(3, &raw),
            Err(NormalizationError::InvalidNumber { field: "distance", .. })
        ));

        let mut raw = raw_kill();
        raw.distance = Some(json!(-1.0));
        assert_eq!(
            normalize(3, &raw).unwrap_err(),
            NormalizationError::NegativeNumber("distance")
        );

        let mut raw = raw_kill();
        raw.attacker_current_weapon_mods = Some(json!(1.5));
        assert!(matches!(
            normalize(3, &raw),
            Err(NormalizationError::InvalidNumber { field: "attacker_current_weapon_mods", .. })
        ));
    }

    #[test]
    fn test_submission_from_jsonl_flattens_fields() {
        let line = r#"{"server_id":12,"attacker_id":"5","victim_id":"6","cause_of_death":"car","map":"glitch","servername":"ffa","game_mode":"ffa","distance":3.5,"unknown_field":true}"#;

        let submission = Submission::from_jsonl(line).unwrap();
        assert_eq!(submission.server_id, 12);

        let event = normalize(submission.server_id, &submission.fields).unwrap();
        assert_eq!(event.cause_of_death, "car");
        assert_eq!(event.distance, 3.5);
        assert!(!event.deaths_with_weapon);
    }

    #[test]
    fn test_malformed_jsonl() {
        let line = r#"{"server_id": "#;
        assert!(Submission::from_jsonl(line).is_err());
    }
}
