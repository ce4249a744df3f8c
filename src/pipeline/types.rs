//! Core data structures for kill aggregation
//!
//! - `KillEvent` - canonical, immutable record of one kill
//! - `Loadout` - weapons a player carried at the moment of the kill
//! - `Dimension` - closed set of grouping axes, driven by a lookup table
//! - `BucketView` - counters for one value within one dimension
//! - `Grouping` - insertion-ordered mapping of dimension value -> bucket

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;

/// Canonical record of one in-game kill
///
/// Built by the normalizer, never mutated afterwards. `kills` and `deaths`
/// are always 1 for a live event but stay counters so buckets can fold them
/// symmetrically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillEvent {
    /// Numeric host id of the submitting game-server source
    pub server_id: i64,
    pub servername: String,
    pub match_id: Option<String>,
    pub map: String,
    pub game_mode: String,
    pub attacker_id: String,
    pub attacker_name: String,
    pub victim_id: String,
    pub victim_name: String,
    /// Weapon identifier credited with the kill
    pub cause_of_death: String,
    pub attacker_weapon: Option<String>,
    pub attacker_weapon_mods: i64,
    pub victim_weapon: Option<String>,
    pub victim_weapon_mods: i64,
    #[serde(default)]
    pub attacker_loadout: Loadout,
    #[serde(default)]
    pub victim_loadout: Loadout,
    pub distance: f64,
    pub game_time: f64,
    pub player_count: u32,
    pub kills: u32,
    pub deaths: u32,
    /// Victim was holding the weapon that killed them
    pub deaths_with_weapon: bool,
    pub killstat_version: Option<String>,
}

/// Carried weapons of one side of a kill
///
/// Slots and offhands are stored as reported; mods default to 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Loadout {
    pub weapon_1: Option<String>,
    pub weapon_1_mods: i64,
    pub weapon_2: Option<String>,
    pub weapon_2_mods: i64,
    pub weapon_3: Option<String>,
    pub weapon_3_mods: i64,
    pub offhand_weapon_1: Option<String>,
    pub offhand_weapon_2: Option<String>,
}

impl Loadout {
    /// Non-empty weapon ids in slot order, offhands last
    pub fn weapons(&self) -> impl Iterator<Item = &str> {
        [
            &self.weapon_1,
            &self.weapon_2,
            &self.weapon_3,
            &self.offhand_weapon_1,
            &self.offhand_weapon_2,
        ]
        .into_iter()
        .filter_map(|w| w.as_deref())
        .filter(|w| !w.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.weapons().next().is_none()
    }
}

impl KillEvent {
    /// First dimension-carrying field that is empty, if any
    ///
    /// Events with a missing dimension are excluded from every grouping.
    pub fn missing_dimension(&self) -> Option<&'static str> {
        [
            ("attacker_id", &self.attacker_id),
            ("cause_of_death", &self.cause_of_death),
            ("map", &self.map),
            ("servername", &self.servername),
            ("game_mode", &self.game_mode),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}

/// Grouping axis for aggregate queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Weapon,
    Player,
    Map,
    Server,
    GameMode,
}

/// Extra fields a dimension carries on its buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoration {
    /// Player buckets carry the latest known player name
    Username,
    /// Server buckets carry the numeric host id
    Host,
    /// Weapon buckets count victims killed by the weapon they were holding
    EquippedDeaths,
}

/// Declarative row of the dimension table
///
/// `kill_key` selects the bucket credited with the kill (and the distance),
/// `death_key` the bucket credited with the death. Shared-context
/// dimensions use the same key for both.
pub struct DimensionSpec {
    pub dimension: Dimension,
    pub name: &'static str,
    pub path: &'static str,
    pub kill_key: fn(&KillEvent) -> &str,
    pub death_key: fn(&KillEvent) -> &str,
    pub decoration: Option<Decoration>,
}

fn weapon_key(event: &KillEvent) -> &str {
    &event.cause_of_death
}

fn attacker_key(event: &KillEvent) -> &str {
    &event.attacker_id
}

fn victim_key(event: &KillEvent) -> &str {
    &event.victim_id
}

fn map_key(event: &KillEvent) -> &str {
    &event.map
}

fn server_key(event: &KillEvent) -> &str {
    &event.servername
}

fn game_mode_key(event: &KillEvent) -> &str {
    &event.game_mode
}

static DIMENSION_TABLE: [DimensionSpec; 5] = [
    DimensionSpec {
        dimension: Dimension::Weapon,
        name: "weapon",
        path: "weapons",
        kill_key: weapon_key,
        death_key: weapon_key,
        decoration: Some(Decoration::EquippedDeaths),
    },
    DimensionSpec {
        dimension: Dimension::Player,
        name: "player",
        path: "players",
        kill_key: attacker_key,
        death_key: victim_key,
        decoration: Some(Decoration::Username),
    },
    DimensionSpec {
        dimension: Dimension::Map,
        name: "map",
        path: "maps",
        kill_key: map_key,
        death_key: map_key,
        decoration: None,
    },
    DimensionSpec {
        dimension: Dimension::Server,
        name: "server",
        path: "servers",
        kill_key: server_key,
        death_key: server_key,
        decoration: Some(Decoration::Host),
    },
    DimensionSpec {
        dimension: Dimension::GameMode,
        name: "gamemode",
        path: "gamemodes",
        kill_key: game_mode_key,
        death_key: game_mode_key,
        decoration: None,
    },
];

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Weapon,
        Dimension::Player,
        Dimension::Map,
        Dimension::Server,
        Dimension::GameMode,
    ];

    pub fn spec(&self) -> &'static DimensionSpec {
        &DIMENSION_TABLE[self.index()]
    }

    /// Position in `ALL` (and in the dimension table)
    pub fn index(&self) -> usize {
        match self {
            Dimension::Weapon => 0,
            Dimension::Player => 1,
            Dimension::Map => 2,
            Dimension::Server => 3,
            Dimension::GameMode => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.spec().name
    }

    /// Parse a query path segment (`weapons`, `players`, `maps`, `servers`, `gamemodes`)
    pub fn from_path(path: &str) -> Option<Self> {
        DIMENSION_TABLE
            .iter()
            .find(|spec| spec.path == path || spec.name == path)
            .map(|spec| spec.dimension)
    }

    pub fn kill_key<'a>(&self, event: &'a KillEvent) -> &'a str {
        (self.spec().kill_key)(event)
    }

    pub fn death_key<'a>(&self, event: &'a KillEvent) -> &'a str {
        (self.spec().death_key)(event)
    }
}

/// Aggregate counters for one dimension value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketView {
    pub deaths: u64,
    pub kills: u64,
    pub max_distance: f64,
    pub total_distance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deaths_while_equipped: Option<u64>,
}

impl BucketView {
    /// Credit kills and fold the distance (running max + running sum)
    pub fn credit_kill(&mut self, kills: u32, distance: f64) {
        self.kills += u64::from(kills);
        self.total_distance += distance;
        if distance > self.max_distance {
            self.max_distance = distance;
        }
    }

    pub fn credit_death(&mut self, deaths: u32) {
        self.deaths += u64::from(deaths);
    }
}

/// Mapping from dimension value to bucket, in first-occurrence order
///
/// Callers treat it as an unordered map; the order only keeps serialized
/// output stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    entries: Vec<(String, BucketView)>,
    positions: HashMap<String, usize>,
}

impl Grouping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the bucket for `key`, inserting an empty one on first use
    pub fn bucket_mut(&mut self, key: &str) -> &mut BucketView {
        let idx = match self.positions.get(key) {
            Some(&idx) => idx,
            None => {
                self.entries.push((key.to_string(), BucketView::default()));
                let idx = self.entries.len() - 1;
                self.positions.insert(key.to_string(), idx);
                idx
            }
        };
        &mut self.entries[idx].1
    }

    pub fn get(&self, key: &str) -> Option<&BucketView> {
        self.positions.get(key).map(|&idx| &self.entries[idx].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BucketView)> {
        self.entries.iter().map(|(key, bucket)| (key.as_str(), bucket))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut BucketView)> {
        self.entries
            .iter_mut()
            .map(|(key, bucket)| (key.as_str(), bucket))
    }

    pub fn total_kills(&self) -> u64 {
        self.entries.iter().map(|(_, bucket)| bucket.kills).sum()
    }

    pub fn total_deaths(&self) -> u64 {
        self.entries.iter().map(|(_, bucket)| bucket.deaths).sum()
    }
}

impl Serialize for Grouping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, bucket) in &self.entries {
            map.serialize_entry(key, bucket)?;
        }
        map.end()
    }
}
