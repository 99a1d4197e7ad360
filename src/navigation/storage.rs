use std::fs::File;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::navigation::tool::NavigationTool;

/// Ordered collection of tool descriptors. Identifiers and names are unique,
/// duplicates are rejected at insertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigationToolStorage {
    tools: Vec<NavigationTool>,
}

impl NavigationToolStorage {
    pub fn new() -> Self {
        Self { tools: vec![] }
    }

    pub fn from_tools(tools: Vec<NavigationTool>) -> Result<Self, TrackingError> {
        let mut storage = NavigationToolStorage::new();
        for tool in tools {
            storage.add_tool(tool)?;
        }
        Ok(storage)
    }

    pub fn add_tool(&mut self, tool: NavigationTool) -> Result<(), TrackingError> {
        if self.tool_by_identifier(&tool.identifier).is_some() {
            return Err(TrackingError::Config(format!(
                "a tool with identifier '{}' is already in the storage",
                tool.identifier
            )));
        }
        if self.tool_by_name(&tool.name).is_some() {
            return Err(TrackingError::Config(format!(
                "a tool named '{}' is already in the storage",
                tool.name
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn tool(&self, index: usize) -> Option<&NavigationTool> {
        self.tools.get(index)
    }

    pub fn tool_by_identifier(&self, identifier: &str) -> Option<&NavigationTool> {
        self.tools.iter().find(|t| t.identifier == identifier)
    }

    pub fn tool_by_name(&self, name: &str) -> Option<&NavigationTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn delete_tool(&mut self, index: usize) -> bool {
        if index < self.tools.len() {
            self.tools.remove(index);
            true
        } else {
            false
        }
    }

    pub fn delete_all_tools(&mut self) {
        self.tools.clear();
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NavigationTool> {
        self.tools.iter()
    }

    pub fn save(&self, file_path: &Path) -> Result<(), TrackingError> {
        let file = File::create(file_path).map_err(|e| {
            TrackingError::Config(format!(
                "unable to create tool storage file {}: {e}",
                file_path.display()
            ))
        })?;
        serde_json::to_writer_pretty(file, self).map_err(|e| {
            TrackingError::Config(format!("unable to write tool storage: {e}"))
        })?;
        info!("saved {} tools to {}", self.tools.len(), file_path.display());
        Ok(())
    }

    pub fn load(file_path: &Path) -> Result<Self, TrackingError> {
        let file = File::open(file_path).map_err(|e| {
            TrackingError::Config(format!(
                "unable to open tool storage file {}: {e}",
                file_path.display()
            ))
        })?;
        let storage: NavigationToolStorage = serde_json::from_reader(file).map_err(|e| {
            TrackingError::Config(format!("unable to parse tool storage: {e}"))
        })?;
        // re-run the insertion checks, the file may have been edited by hand
        NavigationToolStorage::from_tools(storage.tools)
    }
}
