//! Host directory: numeric host id -> display name
//!
//! Supplied externally (loaded from the `host` table) and treated as a pure
//! lookup table. Used to decorate server buckets and answer host listings.

use super::types::Grouping;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HostDirectory {
    names: BTreeMap<i64, String>,
}

impl HostDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host_id: i64, name: impl Into<String>) {
        self.names.insert(host_id, name.into());
    }

    pub fn name_of(&self, host_id: i64) -> Option<&str> {
        self.names.get(&host_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.names.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// Fill `host_name` on every bucket that carries a known host id
    pub fn decorate(&self, grouping: &mut Grouping) {
        for (_, bucket) in grouping.iter_mut() {
            if let Some(host_id) = bucket.host {
                bucket.host_name = self.name_of(host_id).map(str::to_string);
            }
        }
    }
}

impl FromIterator<(i64, String)> for HostDirectory {
    fn from_iter<I: IntoIterator<Item = (i64, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decorate_fills_known_hosts_only() {
        let hosts: HostDirectory = vec![(3, "EU Frankfurt".to_string())].into_iter().collect();

        let mut grouping = Grouping::new();
        grouping.bucket_mut("tdm-host").host = Some(3);
        grouping.bucket_mut("lost-host").host = Some(99);
        grouping.bucket_mut("no-host");

        hosts.decorate(&mut grouping);

        assert_eq!(
            grouping.get("tdm-host").and_then(|b| b.host_name.as_deref()),
            Some("EU Frankfurt")
        );
        assert_eq!(grouping.get("lost-host").and_then(|b| b.host_name.clone()), None);
        assert_eq!(grouping.get("no-host").and_then(|b| b.host_name.clone()), None);
    }

    #[test]
    fn test_serializes_as_id_to_name_object() {
        let mut hosts = HostDirectory::new();
        hosts.insert(1, "NA");
        hosts.insert(2, "EU");

        let json = serde_json::to_string(&hosts).unwrap();
        assert_eq!(json, r#"{"1":"NA","2":"EU"}"#);
    }
}
