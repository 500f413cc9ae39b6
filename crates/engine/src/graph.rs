//! Field dependency graph.
//!
//! Nodes are fields, identified by their primary key. An edge runs from a
//! parent to every field whose option source depends on it. Parents may be
//! referenced by any key a field owns, so the second key of a date range
//! resolves to the same node as the first.

use std::collections::{HashMap, HashSet, VecDeque};

use formflow_types::FieldSchema;
use indexmap::IndexMap;

use crate::error::SchemaError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Field primary key -> declared parent keys, in schema order.
    parents: IndexMap<String, Vec<String>>,
    /// Field primary key -> dependent field primary keys, in schema order.
    children: IndexMap<String, Vec<String>>,
    /// Any owned key -> owning field's primary key.
    owners: HashMap<String, String>,
}

impl DependencyGraph {
    /// Builds the graph, rejecting unknown parents, self references, and cycles.
    pub fn build(fields: &[FieldSchema]) -> Result<Self, SchemaError> {
        let mut graph = Self::default();
        for field in fields {
            let primary = field.primary_key().to_string();
            for key in field.keys() {
                graph.owners.insert(key.to_string(), primary.clone());
            }
            graph.parents.insert(primary.clone(), field.dependencies().to_vec());
            graph.children.insert(primary, Vec::new());
        }

        for field in fields {
            let child = field.primary_key();
            for parent in field.dependencies() {
                let owner = graph.owners.get(parent).cloned().ok_or_else(|| SchemaError::UnknownDependency {
                    field: child.to_string(),
                    parent: parent.clone(),
                })?;
                if owner == child {
                    return Err(SchemaError::SelfDependency(child.to_string()));
                }
                if let Some(children) = graph.children.get_mut(&owner)
                    && !children.iter().any(|existing| existing == child)
                {
                    children.push(child.to_string());
                }
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(SchemaError::DependencyCycle(cycle));
        }
        Ok(graph)
    }

    /// Kahn's algorithm; any node left unprocessed sits on or behind a cycle.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut in_degree: IndexMap<&str, usize> = self.children.keys().map(|key| (key.as_str(), 0)).collect();
        for children in self.children.values() {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child.as_str()) {
                    *degree += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(key, _)| *key)
            .collect();
        let mut processed: HashSet<&str> = HashSet::new();
        while let Some(node) = queue.pop_front() {
            processed.insert(node);
            for child in self.children.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child.as_str());
                    }
                }
            }
        }

        let start = in_degree.keys().find(|key| !processed.contains(*key))?;
        Some(self.trace_cycle(start, &processed))
    }

    /// Follows parent edges among unprocessed nodes until a node repeats.
    fn trace_cycle(&self, start: &str, processed: &HashSet<&str>) -> Vec<String> {
        let mut path: Vec<String> = Vec::new();
        let mut current = start.to_string();
        loop {
            if let Some(position) = path.iter().position(|seen| *seen == current) {
                let mut cycle = path.split_off(position);
                cycle.push(current);
                cycle.reverse();
                return cycle;
            }
            path.push(current.clone());
            let next = self
                .parents_of(&current)
                .iter()
                .filter_map(|parent| self.owners.get(parent))
                .find(|owner| !processed.contains(owner.as_str()));
            match next {
                Some(owner) => current = owner.clone(),
                None => return path,
            }
        }
    }

    /// Primary key of the field owning `key`.
    pub fn owner_of(&self, key: &str) -> Option<&str> {
        self.owners.get(key).map(String::as_str)
    }

    /// Declared parent keys of a field.
    pub fn parents_of(&self, field: &str) -> &[String] {
        self.parents.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fields whose options depend directly on the field owning `key`.
    pub fn direct_dependents(&self, key: &str) -> &[String] {
        self.owner_of(key)
            .and_then(|owner| self.children.get(owner))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every field reachable from `key` through dependency edges, nearest first.
    ///
    /// Each field appears once even when several paths reach it.
    pub fn transitive_dependents(&self, key: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut ordered: Vec<String> = Vec::new();
        let mut worklist: VecDeque<&str> = self.direct_dependents(key).iter().map(String::as_str).collect();

        while let Some(field) = worklist.pop_front() {
            if !visited.insert(field) {
                continue;
            }
            ordered.push(field.to_string());
            worklist.extend(self.direct_dependents(field).iter().map(String::as_str));
        }
        ordered
    }

    /// Every field ordered so parents precede their dependents.
    pub fn topological_order(&self) -> Vec<String> {
        let mut ordered: Vec<String> = Vec::with_capacity(self.parents.len());
        let mut placed: HashSet<&str> = HashSet::new();
        while ordered.len() < self.parents.len() {
            let before = ordered.len();
            for (field, parents) in &self.parents {
                if placed.contains(field.as_str()) {
                    continue;
                }
                let ready = parents
                    .iter()
                    .filter_map(|parent| self.owner_of(parent))
                    .all(|owner| placed.contains(owner));
                if ready {
                    placed.insert(field.as_str());
                    ordered.push(field.clone());
                }
            }
            if ordered.len() == before {
                break;
            }
        }
        ordered
    }
}
