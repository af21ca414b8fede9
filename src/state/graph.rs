//! Directed privilege graph.
//!
//! Nodes are group names; an edge `parent -> child` means `parent` inherits
//! every capability of `child`. The graph is kept acyclic by checking
//! reachability before each insertion, so `grants` always terminates.

use crate::db::GroupRecord;
use crate::error::{EngineError, EngineResult};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// In-memory privilege graph, mirrored to the privilege repository.
#[derive(Debug, Default)]
pub struct PrivilegeGraph {
    /// name -> row id, for write-through persistence.
    groups: BTreeMap<String, i64>,
    /// parent -> children.
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl PrivilegeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted rows. Edges naming unknown ids are dropped.
    pub fn from_records(groups: &[GroupRecord], edge_ids: &[(i64, i64)]) -> Self {
        let mut graph = Self::new();
        let mut by_id: BTreeMap<i64, &str> = BTreeMap::new();
        for group in groups {
            by_id.insert(group.id, group.name.as_str());
            graph.groups.insert(group.name.clone(), group.id);
        }
        for &(parent_id, child_id) in edge_ids {
            if let (Some(parent), Some(child)) = (by_id.get(&parent_id), by_id.get(&child_id)) {
                graph
                    .edges
                    .entry((*parent).to_string())
                    .or_default()
                    .insert((*child).to_string());
            }
        }
        graph
    }

    /// Register a group; the name must be free.
    pub fn add_group(&mut self, name: &str, id: i64) -> EngineResult<()> {
        if self.groups.contains_key(name) {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        self.groups.insert(name.to_string(), id);
        Ok(())
    }

    pub fn group_id(&self, name: &str) -> Option<i64> {
        self.groups.get(name).copied()
    }

    pub fn group_name(&self, id: i64) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, gid)| **gid == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Group names in sorted order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Every edge as (parent, child), sorted.
    pub fn edge_list(&self) -> Vec<(String, String)> {
        self.edges
            .iter()
            .flat_map(|(parent, children)| {
                children
                    .iter()
                    .map(move |child| (parent.clone(), child.clone()))
            })
            .collect()
    }

    /// True when `required` is reachable from `holder`.
    ///
    /// Every group grants itself, known to the graph or not.
    pub fn grants(&self, holder: &str, required: &str) -> bool {
        if holder == required {
            return true;
        }
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(holder);
        seen.insert(holder);
        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.edges.get(current) {
                for child in children {
                    if child == required {
                        return true;
                    }
                    if seen.insert(child) {
                        queue.push_back(child);
                    }
                }
            }
        }
        false
    }

    /// Every group reachable from `holder`, including itself.
    pub fn reachable_from(&self, holder: &str) -> BTreeSet<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(holder);
        seen.insert(holder.to_string());
        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.edges.get(current) {
                for child in children {
                    if seen.insert(child.clone()) {
                        queue.push_back(child);
                    }
                }
            }
        }
        seen
    }

    /// Insert `parent -> child`, rejecting self-edges and cycles.
    /// Inserting an existing edge is a no-op.
    pub fn add_edge(&mut self, parent: &str, child: &str) -> EngineResult<()> {
        if !self.groups.contains_key(parent) {
            return Err(EngineError::InvalidConfiguration(format!(
                "no such group: {parent}"
            )));
        }
        if !self.groups.contains_key(child) {
            return Err(EngineError::InvalidConfiguration(format!(
                "no such group: {child}"
            )));
        }
        // grants() covers parent == child, since every group reaches itself.
        if self.grants(child, parent) {
            return Err(EngineError::CycleError {
                parent: parent.to_string(),
                child: child.to_string(),
            });
        }
        self.edges
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
        Ok(())
    }

    /// Remove `parent -> child`; a missing edge is a no-op.
    pub fn remove_edge(&mut self, parent: &str, child: &str) {
        if let Some(children) = self.edges.get_mut(parent) {
            children.remove(child);
            if children.is_empty() {
                self.edges.remove(parent);
            }
        }
    }
}
