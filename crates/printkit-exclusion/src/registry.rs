//! Object definitions and the exclusion set
//!
//! Both collections are keyed by upper-cased object name and kept in
//! sorted maps, so every listing comes out in name order without a
//! separate sort step.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A labelled object region in the job file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    /// Upper-cased object name
    pub name: String,
    /// Optional XY center
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<[f64; 2]>,
    /// Optional XY outline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<[f64; 2]>>,
    /// Any further parameters given on the definition
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl ObjectDefinition {
    /// Create a bare definition with no metadata
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_uppercase(),
            center: None,
            polygon: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Result of a define request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefineOutcome {
    /// A new object was added
    Added,
    /// An existing definition was replaced
    Replaced,
    /// The object limit was reached and tracking is now disabled
    Disabled,
    /// Tracking is disabled; the request was ignored
    Ignored,
}

/// Defined objects, excluded names and per-object close counts
#[derive(Debug, Clone)]
pub struct ObjectRegistry {
    objects: BTreeMap<String, ObjectDefinition>,
    excluded: BTreeSet<String>,
    close_counts: BTreeMap<String, u32>,
    current: Option<String>,
    enabled: bool,
    max_objects: usize,
}

impl ObjectRegistry {
    /// Create an empty, enabled registry
    pub fn new(max_objects: usize) -> Self {
        Self {
            objects: BTreeMap::new(),
            excluded: BTreeSet::new(),
            close_counts: BTreeMap::new(),
            current: None,
            enabled: true,
            max_objects,
        }
    }

    /// Add or replace an object definition
    ///
    /// Once the registry holds `max_objects` definitions, a request for a
    /// new name disables tracking instead of growing the set. While
    /// disabled every define is ignored.
    pub fn define(&mut self, definition: ObjectDefinition) -> DefineOutcome {
        if !self.enabled {
            return DefineOutcome::Ignored;
        }
        if self.objects.contains_key(&definition.name) {
            self.close_counts.insert(definition.name.clone(), 0);
            self.objects.insert(definition.name.clone(), definition);
            return DefineOutcome::Replaced;
        }
        if self.objects.len() >= self.max_objects {
            self.enabled = false;
            return DefineOutcome::Disabled;
        }
        self.close_counts.insert(definition.name.clone(), 0);
        self.objects.insert(definition.name.clone(), definition);
        DefineOutcome::Added
    }

    /// Whether an object with `name` is defined
    pub fn is_defined(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    /// Definitions in name order
    pub fn objects(&self) -> impl Iterator<Item = &ObjectDefinition> {
        self.objects.values()
    }

    /// Defined names in order
    pub fn object_names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    /// Number of defined objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Excluded names in order
    pub fn excluded_names(&self) -> Vec<String> {
        self.excluded.iter().cloned().collect()
    }

    /// Whether `name` is excluded
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    /// Whether any object is excluded
    pub fn has_excluded(&self) -> bool {
        !self.excluded.is_empty()
    }

    /// Mark `name` excluded; returns false if it already was
    pub fn exclude(&mut self, name: &str) -> bool {
        self.excluded.insert(name.to_string())
    }

    /// Remove `name` from the excluded set; returns false if absent
    pub fn include(&mut self, name: &str) -> bool {
        self.excluded.remove(name)
    }

    /// Clear the excluded set, returning the names that were excluded
    pub fn include_all(&mut self) -> Vec<String> {
        std::mem::take(&mut self.excluded).into_iter().collect()
    }

    /// The object whose region is currently open
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Set or clear the currently open region
    pub fn set_current(&mut self, name: Option<String>) {
        self.current = name;
    }

    /// Whether object tracking is enabled
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable object tracking
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Count a region close for `name`
    ///
    /// Returns the name and value of the largest close count afterwards.
    pub fn note_close(&mut self, name: &str) -> (String, u32) {
        *self.close_counts.entry(name.to_string()).or_insert(0) += 1;
        self.close_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(name, count)| (name.clone(), *count))
            .unwrap_or_else(|| (name.to_string(), 0))
    }

    /// Reset every close count to zero
    pub fn reset_close_counts(&mut self) {
        for count in self.close_counts.values_mut() {
            *count = 0;
        }
    }

    /// Close count for `name`
    pub fn close_count(&self, name: &str) -> u32 {
        self.close_counts.get(name).copied().unwrap_or(0)
    }

    /// Forget everything and re-enable tracking
    pub fn reset(&mut self) {
        self.objects.clear();
        self.excluded.clear();
        self.close_counts.clear();
        self.current = None;
        self.enabled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_is_sorted_and_upper_cased() {
        let mut registry = ObjectRegistry::new(64);
        registry.define(ObjectDefinition::new("part_b"));
        registry.define(ObjectDefinition::new("Part_A"));
        assert_eq!(registry.object_names(), vec!["PART_A", "PART_B"]);
    }

    #[test]
    fn test_capacity_disables_tracking() {
        let mut registry = ObjectRegistry::new(2);
        assert_eq!(registry.define(ObjectDefinition::new("a")), DefineOutcome::Added);
        assert_eq!(registry.define(ObjectDefinition::new("b")), DefineOutcome::Added);
        assert_eq!(registry.define(ObjectDefinition::new("c")), DefineOutcome::Disabled);
        assert!(!registry.enabled());
        assert_eq!(registry.define(ObjectDefinition::new("d")), DefineOutcome::Ignored);
        assert_eq!(registry.object_count(), 2);
    }

    #[test]
    fn test_redefine_replaces() {
        let mut registry = ObjectRegistry::new(1);
        registry.define(ObjectDefinition::new("a"));
        let mut def = ObjectDefinition::new("a");
        def.center = Some([1.0, 2.0]);
        assert_eq!(registry.define(def), DefineOutcome::Replaced);
        assert!(registry.enabled());
        assert_eq!(registry.objects().next().and_then(|o| o.center), Some([1.0, 2.0]));
    }

    #[test]
    fn test_exclude_include() {
        let mut registry = ObjectRegistry::new(64);
        assert!(registry.exclude("B"));
        assert!(registry.exclude("A"));
        assert!(!registry.exclude("A"));
        assert_eq!(registry.excluded_names(), vec!["A", "B"]);
        assert!(registry.include("A"));
        assert!(!registry.include("A"));
        assert_eq!(registry.include_all(), vec!["B"]);
        assert!(!registry.has_excluded());
    }

    #[test]
    fn test_close_counts() {
        let mut registry = ObjectRegistry::new(64);
        registry.define(ObjectDefinition::new("a"));
        registry.define(ObjectDefinition::new("b"));
        assert_eq!(registry.note_close("A"), ("A".to_string(), 1));
        assert_eq!(registry.note_close("A"), ("A".to_string(), 2));
        registry.reset_close_counts();
        assert_eq!(registry.close_count("A"), 0);
    }
}
