//! In-memory aggregation index
//!
//! Owns the append-only kill log plus one precomputed `Grouping` per
//! dimension. Writes fold an event into all five groupings; reads either
//! clone a precomputed grouping (no filter) or rescan the log with the
//! filter applied and regroup on the fly.
//!
//! ## Attribution
//!
//! - Player: kill (and distance) credited to `attacker_id`, death to `victim_id`
//! - Weapon, Map, Server, GameMode: the dimension value is shared context
//!   for the whole event, so the same bucket is credited with the kill and
//!   the death. Weapon deaths read as "deaths caused by this weapon".
//!
//! Kills count attacker-role references and deaths count victim-role
//! references, so `kills + deaths` for a value never exceeds the number of
//! role references to it.

use super::filter::QueryFilter;
use super::types::{Decoration, Dimension, Grouping, KillEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum IndexError {
    /// Event lacks a dimension field; nothing was recorded
    MissingDimension(&'static str),
    /// Distance is negative, NaN or infinite; nothing was recorded
    InvalidDistance(f64),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::MissingDimension(field) => {
                write!(f, "event missing dimension field {}", field)
            }
            IndexError::InvalidDistance(d) => write!(f, "invalid kill distance {}", d),
        }
    }
}

impl std::error::Error for IndexError {}

/// Aggregation index over every accepted kill since process start
#[derive(Debug, Clone, Default)]
pub struct AggregationIndex {
    events: Vec<KillEvent>,
    /// One grouping per dimension, indexed by `Dimension::index()`
    groupings: [Grouping; 5],
}

impl AggregationIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and fold it into every dimension
    ///
    /// Validation happens before any mutation, so an event is either fully
    /// applied or not applied at all.
    pub fn record(&mut self, event: KillEvent) -> Result<(), IndexError> {
        if let Some(field) = event.missing_dimension() {
            return Err(IndexError::MissingDimension(field));
        }
        if !event.distance.is_finite() || event.distance < 0.0 {
            return Err(IndexError::InvalidDistance(event.distance));
        }

        for dimension in Dimension::ALL {
            fold_event(&mut self.groupings[dimension.index()], dimension, &event);
        }
        self.events.push(event);
        Ok(())
    }

    /// Rebuild from a stored log, skipping events that cannot be aggregated
    ///
    /// Returns `(recorded, skipped)`.
    pub fn replay<I>(&mut self, events: I) -> (usize, usize)
    where
        I: IntoIterator<Item = KillEvent>,
    {
        let mut recorded = 0;
        let mut skipped = 0;
        for event in events {
            match self.record(event) {
                Ok(()) => recorded += 1,
                Err(e) => {
                    log::debug!("Skipping stored kill during replay: {}", e);
                    skipped += 1;
                }
            }
        }
        (recorded, skipped)
    }

    /// Group events by `dimension`, keeping only those matching `filter`
    ///
    /// Unknown dimension values are simply absent from the result.
    /// Filtered queries cost O(events).
    pub fn query(&self, dimension: Dimension, filter: &QueryFilter) -> Grouping {
        if filter.is_empty() {
            return self.groupings[dimension.index()].clone();
        }

        let mut grouping = Grouping::new();
        for event in self.events.iter().filter(|event| filter.matches(event)) {
            fold_event(&mut grouping, dimension, event);
        }
        grouping
    }

    /// Precomputed grouping for a dimension (no filter)
    pub fn grouping(&self, dimension: Dimension) -> &Grouping {
        &self.groupings[dimension.index()]
    }

    pub fn events(&self) -> &[KillEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Fold one event into one dimension's grouping
///
/// Shared by the write path and filtered reads so both agree exactly.
fn fold_event(grouping: &mut Grouping, dimension: Dimension, event: &KillEvent) {
    let decoration = dimension.spec().decoration;

    let killer = grouping.bucket_mut(dimension.kill_key(event));
    killer.credit_kill(event.kills, event.distance);
    match decoration {
        Some(Decoration::Username) => {
            if !event.attacker_name.is_empty() {
                killer.username = Some(event.attacker_name.clone());
            }
        }
        Some(Decoration::Host) => killer.host = Some(event.server_id),
        Some(Decoration::EquippedDeaths) => {
            let equipped = killer.deaths_while_equipped.get_or_insert(0);
            if event.deaths_with_weapon {
                *equipped += u64::from(event.deaths);
            }
        }
        None => {}
    }

    let victim = grouping.bucket_mut(dimension.death_key(event));
    victim.credit_death(event.deaths);
    if decoration == Some(Decoration::Username)
        && victim.username.is_none()
        && !event.victim_name.is_empty()
    {
        victim.username = Some(event.victim_name.clone());
    }
}
