//! Project descriptor (`project.json`): saged endpoint, locations, and the widgets placed
//! at each location.
//!
//! ```json
//! {
//!   "saged": "ws://127.0.0.1:8080/saged",
//!   "locations": ["Lounge", "Kitchen"],
//!   "widgets": {
//!     "1": { "name": "Downlights", "type": "switch_slider", "locations": { "0": 10 } }
//!   }
//! }
//! ```
//!
//! `locations` may also be an object keyed by location index. A widget's `locations` maps
//! location index to a sort weight (lower first).

use crate::client::GroupAddress;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Index of a location in the project.
pub type LocationId = usize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// WebSocket URI of the saged endpoint.
    pub saged: String,
    #[serde(default, deserialize_with = "deserialize_locations")]
    pub locations: BTreeMap<LocationId, String>,
    #[serde(default)]
    pub widgets: BTreeMap<GroupAddress, Widget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Widget {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    /// Location index -> sort weight.
    #[serde(default)]
    pub locations: BTreeMap<LocationId, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    Switch,
    Slider,
    SwitchSlider,
    #[serde(other)]
    Unknown,
}

impl WidgetKind {
    pub fn has_switch(self) -> bool {
        matches!(self, WidgetKind::Switch | WidgetKind::SwitchSlider)
    }

    pub fn has_slider(self) -> bool {
        matches!(self, WidgetKind::Slider | WidgetKind::SwitchSlider)
    }
}

/// A widget as laid out at one location.
#[derive(Debug, Clone, Copy)]
pub struct PlacedWidget<'a> {
    pub group: GroupAddress,
    pub weight: i64,
    pub widget: &'a Widget,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationsRepr {
    List(Vec<String>),
    // untagged buffering loses serde_json's numeric-key parsing, so keys stay strings here
    Map(BTreeMap<String, String>),
}

fn deserialize_locations<'de, D>(deserializer: D) -> Result<BTreeMap<LocationId, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match LocationsRepr::deserialize(deserializer)? {
        LocationsRepr::List(names) => Ok(names.into_iter().enumerate().collect()),
        LocationsRepr::Map(map) => map
            .into_iter()
            .map(|(key, name)| {
                key.trim()
                    .parse::<LocationId>()
                    .map(|id| (id, name))
                    .map_err(|_| D::Error::custom(format!("invalid location index {:?}", key)))
            })
            .collect(),
    }
}

impl Project {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parsing project descriptor")
    }

    pub fn location_name(&self, id: LocationId) -> Option<&str> {
        self.locations.get(&id).map(String::as_str)
    }

    /// Every group address with a widget, ascending.
    pub fn group_addresses(&self) -> Vec<GroupAddress> {
        self.widgets.keys().copied().collect()
    }

    /// Widgets placed at `location`, ordered by weight then group address.
    pub fn widgets_at(&self, location: LocationId) -> Vec<PlacedWidget<'_>> {
        let mut placed: Vec<PlacedWidget<'_>> = self
            .widgets
            .iter()
            .filter_map(|(group, widget)| {
                widget.locations.get(&location).map(|weight| PlacedWidget {
                    group: *group,
                    weight: *weight,
                    widget,
                })
            })
            .collect();
        placed.sort_by_key(|p| (p.weight, p.group));
        placed
    }
}

/// Load the project descriptor from disk.
pub fn load_project(path: &Path) -> Result<Project> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading project from {}", path.display()))?;
    let project: Project = serde_json::from_str(&s)
        .with_context(|| format!("parsing project from {}", path.display()))?;
    log::debug!(
        "loaded project {}: {} location(s), {} widget(s)",
        path.display(),
        project.locations.len(),
        project.widgets.len()
    );
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "saged": "ws://10.0.0.2:8080/saged",
        "locations": ["Lounge", "Kitchen"],
        "widgets": {
            "30": { "name": "Pendant", "type": "switch", "locations": { "1": 5 } },
            "12": { "name": "Downlights", "type": "switch_slider", "locations": { "0": 20, "1": 5 } },
            "7": { "name": "Lamp", "type": "slider", "locations": { "0": 10 } },
            "40": { "name": "Fan", "type": "relay", "locations": { "0": 20 } }
        }
    }"#;

    #[test]
    fn parses_list_locations_and_numeric_widget_keys() {
        let project = Project::from_json(SAMPLE).unwrap();
        assert_eq!(project.saged, "ws://10.0.0.2:8080/saged");
        assert_eq!(project.location_name(0), Some("Lounge"));
        assert_eq!(project.location_name(1), Some("Kitchen"));
        assert_eq!(project.location_name(2), None);
        assert_eq!(project.group_addresses(), vec![7, 12, 30, 40]);
    }

    #[test]
    fn unknown_widget_type_is_kept() {
        let project = Project::from_json(SAMPLE).unwrap();
        assert_eq!(project.widgets[&40].kind, WidgetKind::Unknown);
        assert!(!WidgetKind::Unknown.has_switch());
        assert!(WidgetKind::SwitchSlider.has_switch() && WidgetKind::SwitchSlider.has_slider());
    }

    #[test]
    fn widgets_at_orders_by_weight_then_group() {
        let project = Project::from_json(SAMPLE).unwrap();
        let lounge: Vec<GroupAddress> = project.widgets_at(0).iter().map(|p| p.group).collect();
        assert_eq!(lounge, vec![7, 12, 40]);
        let kitchen: Vec<GroupAddress> = project.widgets_at(1).iter().map(|p| p.group).collect();
        assert_eq!(kitchen, vec![12, 30]);
        assert!(project.widgets_at(5).is_empty());
    }

    #[test]
    fn locations_may_be_an_object() {
        let project = Project::from_json(
            r#"{ "saged": "ws://h/saged", "locations": { "0": "Hall", "3": "Garage" } }"#,
        )
        .unwrap();
        assert_eq!(project.location_name(3), Some("Garage"));
        assert!(project.widgets.is_empty());
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        assert!(Project::from_json(r#"{ "locations": [] }"#).is_err());
    }

    #[test]
    fn load_project_names_the_file_on_error() {
        let path = std::env::temp_dir().join(format!("sage-missing-{}.json", uuid::Uuid::new_v4()));
        let err = load_project(&path).unwrap_err();
        assert!(err.to_string().contains("reading project"));
    }
}
