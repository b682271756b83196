//! Selectable network list for a provisioning session

use serde::{Deserialize, Serialize};

use crate::core::types::{NetworkEntry, NetworkOrigin};

/// Item of the selectable network list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "network", rename_all = "snake_case")]
pub enum SelectableNetwork {
    Network(NetworkEntry),
    /// Reserved slot telling the caller to read a free-text network name
    ManualEntry,
}

/// Result of mapping a selection index back to the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Network(NetworkEntry),
    Manual,
}

/// Networks offered for selection
///
/// Device-reported entries keep their arrival order and are never deduplicated:
/// a printer may list the same SSID once per channel. Local suggestions follow,
/// and the manual placeholder is always last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCatalog {
    reported: Vec<NetworkEntry>,
    suggestions: Vec<NetworkEntry>,
}

impl NetworkCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a network reported by the printer
    pub fn add_reported(&mut self, mut entry: NetworkEntry) {
        entry.origin = NetworkOrigin::DeviceReported;
        self.reported.push(entry);
    }

    /// Drop device-reported entries before a new listing
    pub fn clear_reported(&mut self) {
        self.reported.clear();
    }

    /// Build an entry for a user-typed network name
    ///
    /// The security type of a manual network is unknown, so it always asks
    /// for a password.
    pub fn add_manual(&self, ssid: &str) -> NetworkEntry {
        let ssid = ssid.trim();
        NetworkEntry {
            ssid: ssid.as_bytes().to_vec(),
            display_name: ssid.to_string(),
            requires_password: true,
            origin: NetworkOrigin::Manual,
        }
    }

    /// Replace local suggestions with the SSIDs seen by the host
    ///
    /// Blank names are dropped, names are deduplicated and sorted ignoring
    /// case, and names the printer already reported are skipped.
    pub fn merge_local_scan<I, S>(&mut self, ssids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = ssids
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        names.sort_by_key(|s| s.to_lowercase());
        names.dedup_by(|a, b| a.to_lowercase() == b.to_lowercase());

        self.suggestions = names
            .into_iter()
            .filter(|name| !self.reported.iter().any(|e| e.ssid == name.as_bytes()))
            .map(|name| NetworkEntry {
                ssid: name.as_bytes().to_vec(),
                display_name: name,
                requires_password: true,
                origin: NetworkOrigin::LocalScan,
            })
            .collect();
    }

    pub fn reported(&self) -> &[NetworkEntry] {
        &self.reported
    }

    pub fn suggestions(&self) -> &[NetworkEntry] {
        &self.suggestions
    }

    /// Entries in display order, ending with exactly one manual placeholder
    pub fn selectable_list(&self) -> Vec<SelectableNetwork> {
        self.reported
            .iter()
            .chain(self.suggestions.iter())
            .cloned()
            .map(SelectableNetwork::Network)
            .chain(std::iter::once(SelectableNetwork::ManualEntry))
            .collect()
    }

    /// Map a selection index back to an entry
    pub fn resolve(&self, index: usize) -> Option<Selection> {
        let networks = self.reported.len() + self.suggestions.len();
        if index == networks {
            return Some(Selection::Manual);
        }

        self.reported
            .iter()
            .chain(self.suggestions.iter())
            .nth(index)
            .cloned()
            .map(Selection::Network)
    }

    /// Find a known entry by raw SSID, device-reported entries first
    pub fn find_ssid(&self, ssid: &[u8]) -> Option<&NetworkEntry> {
        self.reported
            .iter()
            .chain(self.suggestions.iter())
            .find(|e| e.ssid == ssid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_catalog_has_only_manual_slot() {
        let catalog = NetworkCatalog::new();
        assert_eq!(catalog.selectable_list(), vec![SelectableNetwork::ManualEntry]);
        assert_eq!(catalog.resolve(0), Some(Selection::Manual));
        assert_eq!(catalog.resolve(1), None);
    }

    #[test]
    fn test_duplicate_ssids_are_kept_in_arrival_order() {
        let mut catalog = NetworkCatalog::new();
        catalog.add_reported(NetworkEntry::reported("HomeNet", true));
        catalog.add_reported(NetworkEntry::reported("Guest", false));
        catalog.add_reported(NetworkEntry::reported("HomeNet", true));

        let list = catalog.selectable_list();
        assert_eq!(list.len(), 4);
        let names: Vec<_> = list
            .iter()
            .filter_map(|item| match item {
                SelectableNetwork::Network(e) => Some(e.display_name.as_str()),
                SelectableNetwork::ManualEntry => None,
            })
            .collect();
        assert_eq!(names, vec!["HomeNet", "Guest", "HomeNet"]);
        assert_eq!(list.last(), Some(&SelectableNetwork::ManualEntry));
    }

    #[test]
    fn test_manual_slot_is_unique_and_last() {
        let mut catalog = NetworkCatalog::new();
        for i in 0..5 {
            catalog.add_reported(NetworkEntry::reported(format!("net-{}", i), true));
            let list = catalog.selectable_list();
            let manual_slots = list
                .iter()
                .filter(|item| **item == SelectableNetwork::ManualEntry)
                .count();
            assert_eq!(manual_slots, 1);
            assert_eq!(list.last(), Some(&SelectableNetwork::ManualEntry));
        }
    }

    #[test]
    fn test_resolve_maps_indices() {
        let mut catalog = NetworkCatalog::new();
        catalog.add_reported(NetworkEntry::reported("HomeNet", true));

        match catalog.resolve(0) {
            Some(Selection::Network(entry)) => assert_eq!(entry.ssid, b"HomeNet".to_vec()),
            other => panic!("unexpected selection: {:?}", other),
        }
        assert_eq!(catalog.resolve(1), Some(Selection::Manual));
        assert_eq!(catalog.resolve(2), None);
    }

    #[test]
    fn test_add_manual_always_requires_password() {
        let catalog = NetworkCatalog::new();
        let entry = catalog.add_manual("  Hidden Net ");
        assert_eq!(entry.ssid, b"Hidden Net".to_vec());
        assert_eq!(entry.origin, NetworkOrigin::Manual);
        assert!(entry.requires_password);
        // The placeholder is still the only manual slot
        assert_eq!(catalog.selectable_list().len(), 1);
    }

    #[test]
    fn test_add_reported_forces_origin() {
        let mut catalog = NetworkCatalog::new();
        let mut entry = NetworkEntry::reported("HomeNet", true);
        entry.origin = NetworkOrigin::Manual;
        catalog.add_reported(entry);
        assert_eq!(catalog.reported()[0].origin, NetworkOrigin::DeviceReported);
    }

    #[test]
    fn test_merge_local_scan_dedups_ignoring_case() {
        let mut catalog = NetworkCatalog::new();
        catalog.add_reported(NetworkEntry::reported("HomeNet", true));
        catalog.merge_local_scan(["guest", "", "Office", "GUEST", "HomeNet", "  "]);

        let names: Vec<_> = catalog
            .suggestions()
            .iter()
            .map(|e| e.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["guest", "Office"]);
        assert!(
            catalog
                .suggestions()
                .iter()
                .all(|e| e.origin == NetworkOrigin::LocalScan)
        );

        // Reported first, then suggestions, then the manual slot
        let list = catalog.selectable_list();
        assert_eq!(list.len(), 4);
        assert_eq!(list.last(), Some(&SelectableNetwork::ManualEntry));
    }

    #[test]
    fn test_clear_reported_keeps_suggestions() {
        let mut catalog = NetworkCatalog::new();
        catalog.add_reported(NetworkEntry::reported("HomeNet", true));
        catalog.merge_local_scan(["Office"]);
        catalog.clear_reported();

        assert!(catalog.reported().is_empty());
        assert_eq!(catalog.suggestions().len(), 1);
        assert!(catalog.find_ssid(b"Office").is_some());
        assert!(catalog.find_ssid(b"HomeNet").is_none());
    }
}
