use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("Failed to read label file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse label file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Class id to name lookup, as found under `names:` in a YOLO dataset yaml.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    names: HashMap<usize, String>,
}

#[derive(Deserialize)]
struct LabelFile {
    names: Names,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Names {
    List(Vec<String>),
    Map(BTreeMap<usize, String>),
}

impl LabelTable {
    pub fn load(path: &Path) -> Result<Self, LabelError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, LabelError> {
        let file: LabelFile = serde_yaml::from_str(contents)?;
        let names = match file.names {
            Names::List(list) => list.into_iter().enumerate().collect(),
            Names::Map(map) => map.into_iter().collect(),
        };
        Ok(Self { names })
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(&class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(usize, S)> for LabelTable {
    fn from_iter<I: IntoIterator<Item = (usize, S)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(|(id, name)| (id, name.into())).collect(),
        }
    }
}
