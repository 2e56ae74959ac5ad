//! Project schema: groups of dataset descriptors.
//!
//! Groups and datasets live in an arena and are addressed by stable ids.
//! A group refers to its datasets by id and each dataset records its owning
//! group id, so duplicating or deleting entries never involves shared
//! ownership. Dataset indexes are 1-based positions in the decoded field
//! list, as in project files.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Stable group id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(u32);

/// Stable dataset id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetId(u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataset#{}", self.0)
    }
}

/// Display group
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Group {
    /// Group title
    pub title: String,
    /// Dashboard widget hint
    pub widget: String,
    datasets: Vec<DatasetId>,
}

impl Group {
    /// Create an empty group
    pub fn new(title: impl Into<String>, widget: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            widget: widget.into(),
            datasets: Vec::new(),
        }
    }

    /// Member datasets, in display order
    pub fn datasets(&self) -> &[DatasetId] {
        &self.datasets
    }
}

/// Description of one dataset in the frame
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetDescriptor {
    /// Dataset title
    pub title: String,
    /// Measurement units
    pub units: String,
    /// 1-based field index in the decoded frame
    pub index: usize,
    /// JSON key selecting the field (JSON payloads only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Lower bound of the expected range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound of the expected range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Alarm threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm: Option<f64>,
    /// Dashboard widget hint
    pub widget: String,
}

#[derive(Debug, Clone)]
struct DatasetNode {
    group: GroupId,
    descriptor: DatasetDescriptor,
}

/// Project schema arena
#[derive(Debug, Clone, Default)]
pub struct ProjectSchema {
    title: String,
    frame_parser: Option<String>,
    groups: BTreeMap<GroupId, Group>,
    group_order: Vec<GroupId>,
    datasets: BTreeMap<DatasetId, DatasetNode>,
    next_group: u32,
    next_dataset: u32,
}

impl ProjectSchema {
    /// Create an empty project
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Project title
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Stored parser script, if any
    pub fn frame_parser(&self) -> Option<&str> {
        self.frame_parser.as_deref()
    }

    /// Replace the stored parser script
    pub fn set_frame_parser(&mut self, source: Option<String>) {
        self.frame_parser = source;
    }

    /// Number of groups
    pub fn group_count(&self) -> usize {
        self.group_order.len()
    }

    /// Number of datasets across all groups
    pub fn dataset_count(&self) -> usize {
        self.datasets.len()
    }

    /// Next unused frame index
    pub fn next_index(&self) -> usize {
        self.datasets
            .values()
            .map(|node| node.descriptor.index)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Group by id
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// Dataset descriptor by id
    pub fn dataset(&self, id: DatasetId) -> Option<&DatasetDescriptor> {
        self.datasets.get(&id).map(|node| &node.descriptor)
    }

    /// Owning group of a dataset
    pub fn dataset_group(&self, id: DatasetId) -> Option<GroupId> {
        self.datasets.get(&id).map(|node| node.group)
    }

    /// Groups in display order
    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &Group)> {
        self.group_order
            .iter()
            .filter_map(move |id| self.groups.get(id).map(|g| (*id, g)))
    }

    /// All datasets in display order, with their group
    pub fn datasets(&self) -> impl Iterator<Item = (&Group, &DatasetDescriptor)> {
        self.groups().flat_map(move |(_, group)| {
            group
                .datasets
                .iter()
                .filter_map(move |id| self.datasets.get(id).map(|n| (group, &n.descriptor)))
        })
    }

    /// Descriptor with the given frame index and its group
    pub fn find_by_index(&self, index: usize) -> Option<(&Group, &DatasetDescriptor)> {
        self.datasets().find(|(_, d)| d.index == index)
    }

    /// Append a group
    pub fn add_group(&mut self, title: impl Into<String>, widget: impl Into<String>) -> GroupId {
        let id = GroupId(self.next_group);
        self.next_group += 1;
        self.groups.insert(id, Group::new(title, widget));
        self.group_order.push(id);
        id
    }

    /// Append a dataset to a group
    ///
    /// An index of 0 is replaced by the next unused index.
    pub fn add_dataset(
        &mut self,
        group: GroupId,
        mut descriptor: DatasetDescriptor,
    ) -> Result<DatasetId, DecodeError> {
        if !self.groups.contains_key(&group) {
            return Err(DecodeError::Schema(format!("{} does not exist", group)));
        }
        if descriptor.index == 0 {
            descriptor.index = self.next_index();
        }

        let id = self.insert_dataset(group, descriptor);
        if let Some(g) = self.groups.get_mut(&group) {
            g.datasets.push(id);
        }
        Ok(id)
    }

    /// Copy a dataset right after the original, with a fresh index
    pub fn duplicate_dataset(&mut self, id: DatasetId) -> Result<DatasetId, DecodeError> {
        let node = self
            .datasets
            .get(&id)
            .cloned()
            .ok_or_else(|| DecodeError::Schema(format!("{} does not exist", id)))?;

        let mut descriptor = node.descriptor;
        descriptor.title = format!("{} (Copy)", descriptor.title);
        descriptor.index = self.next_index();

        let copy = self.insert_dataset(node.group, descriptor);
        if let Some(group) = self.groups.get_mut(&node.group) {
            let pos = group
                .datasets
                .iter()
                .position(|d| *d == id)
                .map_or(group.datasets.len(), |p| p + 1);
            group.datasets.insert(pos, copy);
        }
        debug!("Duplicated {} as {}", id, copy);
        Ok(copy)
    }

    /// Copy a group and all of its datasets right after the original
    pub fn duplicate_group(&mut self, id: GroupId) -> Result<GroupId, DecodeError> {
        let group = self
            .groups
            .get(&id)
            .cloned()
            .ok_or_else(|| DecodeError::Schema(format!("{} does not exist", id)))?;

        let copy = GroupId(self.next_group);
        self.next_group += 1;

        let mut members = Vec::with_capacity(group.datasets.len());
        for dataset in &group.datasets {
            if let Some(node) = self.datasets.get(dataset).cloned() {
                let mut descriptor = node.descriptor;
                descriptor.index = self.next_index();
                members.push(self.insert_dataset(copy, descriptor));
            }
        }

        self.groups.insert(
            copy,
            Group {
                title: format!("{} (Copy)", group.title),
                widget: group.widget,
                datasets: members,
            },
        );
        let pos = self
            .group_order
            .iter()
            .position(|g| *g == id)
            .map_or(self.group_order.len(), |p| p + 1);
        self.group_order.insert(pos, copy);

        debug!("Duplicated {} as {}", id, copy);
        Ok(copy)
    }

    /// Remove a dataset
    pub fn delete_dataset(&mut self, id: DatasetId) -> Result<(), DecodeError> {
        let node = self
            .datasets
            .remove(&id)
            .ok_or_else(|| DecodeError::Schema(format!("{} does not exist", id)))?;
        if let Some(group) = self.groups.get_mut(&node.group) {
            group.datasets.retain(|d| *d != id);
        }
        Ok(())
    }

    /// Remove a group together with its datasets
    pub fn delete_group(&mut self, id: GroupId) -> Result<(), DecodeError> {
        let group = self
            .groups
            .remove(&id)
            .ok_or_else(|| DecodeError::Schema(format!("{} does not exist", id)))?;
        for dataset in group.datasets {
            self.datasets.remove(&dataset);
        }
        self.group_order.retain(|g| *g != id);
        Ok(())
    }

    fn insert_dataset(&mut self, group: GroupId, descriptor: DatasetDescriptor) -> DatasetId {
        let id = DatasetId(self.next_dataset);
        self.next_dataset += 1;
        self.datasets.insert(id, DatasetNode { group, descriptor });
        id
    }

    /// Parse a JSON project file
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let file: ProjectFile = serde_json::from_str(text)?;
        Ok(Self::from_file(file))
    }

    /// Serialize as a JSON project file
    pub fn to_json(&self) -> Result<String, DecodeError> {
        Ok(serde_json::to_string_pretty(&self.to_file())?)
    }

    /// Load a JSON project file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Write the project back to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DecodeError> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }

    fn from_file(file: ProjectFile) -> Self {
        let mut schema = ProjectSchema::new(file.title);
        schema.frame_parser = file.frame_parser.filter(|s| !s.trim().is_empty());

        for group in file.groups {
            let id = schema.add_group(group.title, group.widget);
            for descriptor in group.datasets {
                let dataset = schema.insert_dataset(id, descriptor);
                if let Some(g) = schema.groups.get_mut(&id) {
                    g.datasets.push(dataset);
                }
            }
        }
        schema
    }

    fn to_file(&self) -> ProjectFile {
        ProjectFile {
            title: self.title.clone(),
            frame_parser: self.frame_parser.clone(),
            groups: self
                .groups()
                .map(|(_, group)| GroupFile {
                    title: group.title.clone(),
                    widget: group.widget.clone(),
                    datasets: group
                        .datasets
                        .iter()
                        .filter_map(|id| self.dataset(*id).cloned())
                        .collect(),
                })
                .collect(),
        }
    }
}

/// On-disk project layout
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectFile {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_parser: Option<String>,
    groups: Vec<GroupFile>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct GroupFile {
    title: String,
    widget: String,
    datasets: Vec<DatasetDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(title: &str, index: usize) -> DatasetDescriptor {
        DatasetDescriptor {
            title: title.to_string(),
            index,
            ..DatasetDescriptor::default()
        }
    }

    fn titles(schema: &ProjectSchema) -> Vec<String> {
        schema.datasets().map(|(_, d)| d.title.clone()).collect()
    }

    #[test]
    fn test_add_and_iterate() {
        let mut schema = ProjectSchema::new("Weather");
        let env = schema.add_group("Environment", "");
        let gps = schema.add_group("GPS", "map");

        schema.add_dataset(env, descriptor("Temperature", 1)).unwrap();
        schema.add_dataset(gps, descriptor("Latitude", 3)).unwrap();
        let hum = schema.add_dataset(env, descriptor("Humidity", 0)).unwrap();

        assert_eq!(schema.dataset(hum).unwrap().index, 4);
        assert_eq!(titles(&schema), vec!["Temperature", "Humidity", "Latitude"]);
        assert_eq!(schema.dataset_group(hum), Some(env));
        assert_eq!(schema.find_by_index(3).unwrap().0.title, "GPS");
    }

    #[test]
    fn test_duplicate_dataset() {
        let mut schema = ProjectSchema::new("p");
        let g = schema.add_group("G", "");
        let a = schema.add_dataset(g, descriptor("A", 1)).unwrap();
        schema.add_dataset(g, descriptor("B", 2)).unwrap();

        let copy = schema.duplicate_dataset(a).unwrap();
        assert_ne!(copy, a);
        assert_eq!(titles(&schema), vec!["A", "A (Copy)", "B"]);
        assert_eq!(schema.dataset(copy).unwrap().index, 3);
    }

    #[test]
    fn test_duplicate_group() {
        let mut schema = ProjectSchema::new("p");
        let g = schema.add_group("G", "multiplot");
        let h = schema.add_group("H", "");
        schema.add_dataset(g, descriptor("A", 1)).unwrap();
        schema.add_dataset(h, descriptor("Z", 2)).unwrap();

        let copy = schema.duplicate_group(g).unwrap();
        let groups: Vec<&str> = schema.groups().map(|(_, g)| g.title.as_str()).collect();
        assert_eq!(groups, vec!["G", "G (Copy)", "H"]);
        assert_eq!(schema.group(copy).unwrap().widget, "multiplot");
        assert_eq!(schema.dataset_count(), 3);

        let member = schema.group(copy).unwrap().datasets()[0];
        assert_eq!(schema.dataset_group(member), Some(copy));
        assert_eq!(schema.dataset(member).unwrap().index, 3);
    }

    #[test]
    fn test_delete_cascades() {
        let mut schema = ProjectSchema::new("p");
        let g = schema.add_group("G", "");
        let h = schema.add_group("H", "");
        let a = schema.add_dataset(g, descriptor("A", 1)).unwrap();
        let b = schema.add_dataset(h, descriptor("B", 2)).unwrap();

        schema.delete_group(g).unwrap();
        assert!(schema.dataset(a).is_none());
        assert_eq!(schema.group_count(), 1);
        assert_eq!(titles(&schema), vec!["B"]);

        schema.delete_dataset(b).unwrap();
        assert_eq!(schema.dataset_count(), 0);
        assert!(schema.delete_dataset(b).is_err());
        assert!(schema.add_dataset(g, descriptor("C", 1)).is_err());
    }

    #[test]
    fn test_project_file_roundtrip() {
        let json = r#"{
            "title": "Rover",
            "frameParser": "function parse(frame) return {} end",
            "groups": [
                {"title": "Motors", "widget": "bar", "datasets": [
                    {"title": "Left", "units": "rpm", "index": 1, "max": 3000, "alarm": 2800},
                    {"title": "Right", "units": "rpm", "index": 2}
                ]},
                {"title": "Power", "datasets": [
                    {"title": "Voltage", "units": "V", "index": 3, "key": "bat.v"}
                ]}
            ]
        }"#;

        let schema = ProjectSchema::from_json(json).unwrap();
        assert_eq!(schema.title(), "Rover");
        assert!(schema.frame_parser().unwrap().contains("parse"));
        assert_eq!(titles(&schema), vec!["Left", "Right", "Voltage"]);
        let (_, left) = schema.find_by_index(1).unwrap();
        assert_eq!(left.alarm, Some(2800.0));
        assert_eq!(schema.find_by_index(3).unwrap().1.key.as_deref(), Some("bat.v"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rover.json");
        schema.save(&path).unwrap();
        let reloaded = ProjectSchema::load(&path).unwrap();
        assert_eq!(titles(&reloaded), titles(&schema));
        assert_eq!(reloaded.frame_parser(), schema.frame_parser());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ProjectSchema::load("/nonexistent/project.json").unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }
}
