//! Query façade boundary
//!
//! Turns a transport-level request (a dimension path plus string
//! parameters) into a typed `QueryRequest`, and a `Grouping` back into JSON.
//! Empty parameter values are treated as absent; unknown parameters are
//! ignored.

use super::filter::{FilterField, FilterValue, QueryFilter};
use super::types::{Dimension, Grouping};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Path is not one of the five dimension paths
    UnknownDimension(String),
    /// A filter value has the wrong type
    InvalidFilter { param: &'static str, value: String },
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::UnknownDimension(path) => write!(
                f,
                "unknown dimension '{}': only weapons, players, maps, servers or gamemodes are valid paths",
                path
            ),
            QueryError::InvalidFilter { param, value } => {
                write!(f, "{}: must be an integer, got '{}'", param, value)
            }
        }
    }
}

impl std::error::Error for QueryError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub dimension: Dimension,
    pub filter: QueryFilter,
}

impl QueryRequest {
    pub fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            filter: QueryFilter::new(),
        }
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Parse `path` and query parameters into a request
    ///
    /// `player` and `host` must be integers; `server`, `map`, `weapon` and
    /// `gamemode` are matched as text.
    pub fn from_params<I, K, V>(path: &str, params: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let path = path.trim().trim_matches('/');
        let dimension =
            Dimension::from_path(path).ok_or_else(|| QueryError::UnknownDimension(path.to_string()))?;

        let mut filter = QueryFilter::new();
        for (name, value) in params {
            let Some(field) = FilterField::from_param(name.as_ref()) else {
                continue;
            };
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }

            let expected = if field.is_numeric() {
                let id = value.parse::<i64>().map_err(|_| QueryError::InvalidFilter {
                    param: field.param_name(),
                    value: value.to_string(),
                })?;
                FilterValue::Id(id)
            } else {
                FilterValue::Text(value.to_string())
            };
            filter.push(field, expected);
        }

        Ok(Self { dimension, filter })
    }
}

/// Serialize a grouping as the query response body
pub fn to_json(grouping: &Grouping) -> Result<String, serde_json::Error> {
    serde_json::to_string(grouping)
}

pub fn to_json_pretty(grouping: &Grouping) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(grouping)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_dimension_and_filters() {
        let request = QueryRequest::from_params(
            "/weapons",
            [("player", "1005930844007"), ("server", "tdm-host"), ("host", "3")],
        )
        .unwrap();

        assert_eq!(request.dimension, Dimension::Weapon);
        let expected = QueryFilter::new()
            .with(FilterField::Player, FilterValue::Id(1005930844007))
            .with_text(FilterField::Server, "tdm-host")
            .with(FilterField::Host, FilterValue::Id(3));
        assert_eq!(request.filter, expected);
    }

    #[test]
    fn test_unknown_dimension() {
        let err = QueryRequest::from_params("loadouts", Vec::<(&str, &str)>::new()).unwrap_err();
        assert_eq!(err, QueryError::UnknownDimension("loadouts".to_string()));
    }

    #[test]
    fn test_non_integer_player_is_rejected() {
        let err = QueryRequest::from_params("players", [("player", "abc")]).unwrap_err();
        assert_eq!(
            err,
            QueryError::InvalidFilter {
                param: "player",
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_empty_and_unknown_params_are_ignored() {
        let request =
            QueryRequest::from_params("maps", [("map", ""), ("colour", "red")]).unwrap();
        assert!(request.filter.is_empty());
    }

    #[test]
    fn test_to_json_of_empty_grouping() {
        assert_eq!(to_json(&Grouping::new()).unwrap(), "{}");
    }
}
