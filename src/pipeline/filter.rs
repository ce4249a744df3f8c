//! Typed query predicates
//!
//! A `QueryFilter` is an ordered list of `{field, expected}` pairs. An event
//! contributes to a query only if it satisfies every predicate; an empty
//! filter matches everything.

use super::types::KillEvent;

/// Event field a predicate can constrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    /// Attacking player id
    Player,
    /// Server display name
    Server,
    /// Numeric host id of the source
    Host,
    Map,
    /// Weapon id (cause of death)
    Weapon,
    GameMode,
}

impl FilterField {
    pub const ALL: [FilterField; 6] = [
        FilterField::Player,
        FilterField::Server,
        FilterField::Host,
        FilterField::Map,
        FilterField::Weapon,
        FilterField::GameMode,
    ];

    /// Query parameter name for this field
    pub fn param_name(&self) -> &'static str {
        match self {
            FilterField::Player => "player",
            FilterField::Server => "server",
            FilterField::Host => "host",
            FilterField::Map => "map",
            FilterField::Weapon => "weapon",
            FilterField::GameMode => "gamemode",
        }
    }

    pub fn from_param(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.param_name() == name)
    }

    /// Fields whose query values must be integers
    pub fn is_numeric(&self) -> bool {
        matches!(self, FilterField::Player | FilterField::Host)
    }

    fn extract<'a>(&self, event: &'a KillEvent) -> FieldRef<'a> {
        match self {
            FilterField::Player => FieldRef::Text(&event.attacker_id),
            FilterField::Server => FieldRef::Text(&event.servername),
            FilterField::Host => FieldRef::Id(event.server_id),
            FilterField::Map => FieldRef::Text(&event.map),
            FilterField::Weapon => FieldRef::Text(&event.cause_of_death),
            FilterField::GameMode => FieldRef::Text(&event.game_mode),
        }
    }
}

/// Expected value of a predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Id(i64),
}

#[derive(Debug, Clone, Copy)]
enum FieldRef<'a> {
    Text(&'a str),
    Id(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub field: FilterField,
    pub expected: FilterValue,
}

impl Predicate {
    pub fn matches(&self, event: &KillEvent) -> bool {
        value_matches(self.field.extract(event), &self.expected)
    }
}

/// The single comparison rule
///
/// Ids compare numerically. A text field checked against an id (player ids
/// are stored as text) matches only if the text parses to the same integer.
fn value_matches(actual: FieldRef<'_>, expected: &FilterValue) -> bool {
    match (actual, expected) {
        (FieldRef::Text(actual), FilterValue::Text(expected)) => actual == expected,
        (FieldRef::Id(actual), FilterValue::Id(expected)) => actual == *expected,
        (FieldRef::Text(actual), FilterValue::Id(expected)) => {
            actual.trim().parse::<i64>().map_or(false, |id| id == *expected)
        }
        (FieldRef::Id(actual), FilterValue::Text(expected)) => {
            expected.trim().parse::<i64>().map_or(false, |id| id == actual)
        }
    }
}

/// Conjunction of predicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    predicates: Vec<Predicate>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append
    pub fn with(mut self, field: FilterField, expected: FilterValue) -> Self {
        self.push(field, expected);
        self
    }

    pub fn with_text(self, field: FilterField, expected: impl Into<String>) -> Self {
        self.with(field, FilterValue::Text(expected.into()))
    }

    pub fn push(&mut self, field: FilterField, expected: FilterValue) {
        self.predicates.push(Predicate { field, expected });
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, event: &KillEvent) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Loadout;

    fn make_event(attacker: &str, server_id: i64, servername: &str, weapon: &str) -> KillEvent {
        KillEvent {
            server_id,
            servername: servername.to_string(),
            match_id: None,
            map: "thaw".to_string(),
            game_mode: "tdm".to_string(),
            attacker_id: attacker.to_string(),
            attacker_name: "attacker".to_string(),
            victim_id: "0".to_string(),
            victim_name: "victim".to_string(),
            cause_of_death: weapon.to_string(),
            attacker_weapon: None,
            attacker_weapon_mods: 0,
            victim_weapon: None,
            victim_weapon_mods: 0,
            attacker_loadout: Loadout::default(),
            victim_loadout: Loadout::default(),
            distance: 10.0,
            game_time: 0.0,
            player_count: 2,
            kills: 1,
            deaths: 1,
            deaths_with_weapon: false,
            killstat_version: None,
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = QueryFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&make_event("1", 3, "tdm-host", "smr")));
    }

    #[test]
    fn test_predicates_are_anded() {
        let filter = QueryFilter::new()
            .with_text(FilterField::Server, "tdm-host")
            .with_text(FilterField::Weapon, "smr");

        assert!(filter.matches(&make_event("1", 3, "tdm-host", "smr")));
        assert!(!filter.matches(&make_event("1", 3, "tdm-host", "car")));
        assert!(!filter.matches(&make_event("1", 3, "ffa-host", "smr")));
    }

    #[test]
    fn test_player_id_compares_numerically() {
        let filter = QueryFilter::new().with(FilterField::Player, FilterValue::Id(1005930844007));

        assert!(filter.matches(&make_event("1005930844007", 3, "s", "smr")));
        assert!(!filter.matches(&make_event("1005930844008", 3, "s", "smr")));
        assert!(!filter.matches(&make_event("not-a-number", 3, "s", "smr")));
    }

    #[test]
    fn test_host_matches_server_id() {
        let filter = QueryFilter::new().with(FilterField::Host, FilterValue::Id(3));

        assert!(filter.matches(&make_event("1", 3, "s", "smr")));
        assert!(!filter.matches(&make_event("1", 4, "s", "smr")));
    }

    #[test]
    fn test_param_names_round_trip() {
        for field in FilterField::ALL {
            assert_eq!(FilterField::from_param(field.param_name()), Some(field));
        }
        assert_eq!(FilterField::from_param("weapons"), None);
    }
}
