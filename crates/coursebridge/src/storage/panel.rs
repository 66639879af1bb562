//! Group-to-course mapping
//!
//! The map is derived from three registry reads: an administrative group
//! class whose group ids are already canonical, a purchased-product group
//! class whose groups are matched by name, and a configured report whose rows
//! pair a registry-side group code with one or more LMS course codes. Stored
//! as a single JSON row; course sets round-trip through the report's
//! comma-delimited string form.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::registry::{field_str, RegistryApi};

/// Group class whose group ids double as their registry codes.
const ADMIN_GROUP_CLASS_ID: &str = "EVENT";

/// Report column holding the registry-side group code.
pub const QUERY_REGISTRY_COLUMN: &str = "REGISTRY_SIDE";
/// Report column holding the comma-delimited LMS course codes.
pub const QUERY_LMS_COLUMN: &str = "LMS_SIDE";

/// Mapping from registry group id to the LMS courses that group enrolls into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelSourceMap {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl PanelSourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group_id: impl Into<String>, course_id: impl Into<String>) {
        self.groups
            .entry(group_id.into())
            .or_default()
            .insert(course_id.into());
    }

    pub fn courses_for(&self, group_id: &str) -> Option<&BTreeSet<String>> {
        self.groups.get(group_id)
    }

    pub fn contains_group(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    /// Invert into course id to the set of groups feeding it. This is the
    /// shape the full-sync fan-out consumes.
    pub fn invert(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut courses: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (group_id, course_ids) in &self.groups {
            for course_id in course_ids {
                courses
                    .entry(course_id.clone())
                    .or_default()
                    .insert(group_id.clone());
            }
        }
        courses
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Serialize to the stored JSON form, course sets joined with commas.
    pub fn to_json_string(&self) -> Result<String> {
        let mut object = serde_json::Map::new();
        for (group_id, course_ids) in &self.groups {
            let joined = course_ids.iter().cloned().collect::<Vec<_>>().join(",");
            object.insert(group_id.clone(), serde_json::Value::String(joined));
        }
        Ok(serde_json::to_string(&object)?)
    }

    /// Parse the stored JSON form, splitting delimited course lists.
    pub fn from_json_str(data: &str) -> Result<Self> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(data)?;
        let mut map = Self::new();
        for (group_id, value) in object {
            if let Some(courses) = value.as_str() {
                for course_id in courses.split(',') {
                    let course_id = course_id.trim();
                    if !course_id.is_empty() {
                        map.insert(group_id.clone(), course_id);
                    }
                }
            }
        }
        Ok(map)
    }
}

/// Rebuild the map from the registry. Three passes: canonical admin group
/// ids, purchased-product groups keyed by name, then the mapping report rows
/// matched against both.
pub fn build_panel_source_map(
    registry: &dyn RegistryApi,
    config: &RegistryConfig,
) -> Result<PanelSourceMap> {
    let mut code_to_group: BTreeMap<String, String> = BTreeMap::new();

    for record in registry.iterate("Group", &[("GroupClassId", ADMIN_GROUP_CLASS_ID)])? {
        if let Some(group_id) = field_str(&record, &["GroupId"]) {
            code_to_group.insert(group_id.to_string(), group_id.to_string());
        }
    }

    for record in registry.iterate(
        "Group",
        &[("GroupClassId", &config.purchased_products_class_id)],
    )? {
        if let (Some(name), Some(group_id)) = (
            field_str(&record, &["Name"]),
            field_str(&record, &["GroupId"]),
        ) {
            code_to_group.insert(name.to_string(), group_id.to_string());
        }
    }

    let mut map = PanelSourceMap::new();
    for row in registry.iterate("query", &[("QueryName", &config.panel_source_query)])? {
        let code = field_str(&row, &[QUERY_REGISTRY_COLUMN]);
        let courses = field_str(&row, &[QUERY_LMS_COLUMN]);
        if let (Some(code), Some(courses)) = (code, courses) {
            if let Some(group_id) = code_to_group.get(code) {
                for course_id in courses.split(',') {
                    let course_id = course_id.trim();
                    if !course_id.is_empty() {
                        map.insert(group_id.clone(), course_id);
                    }
                }
            }
        }
    }
    debug!(groups = map.len(), "group-to-course map built");
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRegistry;

    #[test]
    fn test_json_round_trip_splits_delimited_courses() {
        let map = PanelSourceMap::from_json_str(r#"{"G1": "C10,C11", "G2": "C10"}"#).unwrap();
        assert_eq!(
            map.courses_for("G1").unwrap().iter().collect::<Vec<_>>(),
            vec!["C10", "C11"]
        );
        let back = PanelSourceMap::from_json_str(&map.to_json_string().unwrap()).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn test_invert_merges_groups_per_course() {
        let map = PanelSourceMap::from_json_str(r#"{"G1": "C10", "G2": "C10"}"#).unwrap();
        let inverted = map.invert();
        assert_eq!(inverted.len(), 1);
        let groups: Vec<_> = inverted["C10"].iter().collect();
        assert_eq!(groups, vec!["G1", "G2"]);
    }

    #[test]
    fn test_build_matches_admin_and_product_groups() {
        let registry = MockRegistry::new()
            .with_admin_group("G-ADMIN")
            .with_product_group("Intro Bundle", "G-PROD")
            .with_mapping("G-ADMIN", "C1")
            .with_mapping("Intro Bundle", "C2,C3");
        let config = registry.config();
        let map = build_panel_source_map(&registry, &config).unwrap();
        assert!(map.courses_for("G-ADMIN").unwrap().contains("C1"));
        let prod = map.courses_for("G-PROD").unwrap();
        assert!(prod.contains("C2") && prod.contains("C3"));
    }

    #[test]
    fn test_build_skips_unknown_codes() {
        let registry = MockRegistry::new()
            .with_admin_group("G1")
            .with_mapping("G1", "C1")
            .with_mapping("NOBODY", "C9");
        let config = registry.config();
        let map = build_panel_source_map(&registry, &config).unwrap();
        assert_eq!(map.len(), 1);
        assert!(!map.contains_group("NOBODY"));
    }
}
