//! Dependency ordering of an experiment's tasks.

use std::collections::{HashMap, HashSet};

use benchtop_core::TaskConfig;

/// Result of ordering a task graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Tasks in an order where every task follows its dependencies
    Ordered(Vec<TaskConfig>),
    /// A task depends on an id that is not part of the graph
    Missing {
        /// Dependent task
        task: String,
        /// Unknown dependency
        dependency: String,
    },
    /// Tasks that form or sit behind a cycle
    Circular(Vec<String>),
}

/// Orders tasks so that dependencies run first.
#[derive(Debug, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Order `tasks`. Among tasks that are ready at the same time the
    /// configured order is kept.
    pub fn order(&self, tasks: &[TaskConfig]) -> Resolution {
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        for task in tasks {
            if let Some(dep) = task.dependencies.iter().find(|d| !ids.contains(d.as_str())) {
                return Resolution::Missing {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                };
            }
        }

        let mut remaining: HashMap<&str, usize> = tasks
            .iter()
            .map(|t| (t.id.as_str(), t.dependencies.len()))
            .collect();
        let mut done: HashSet<&str> = HashSet::new();
        let mut ordered = Vec::with_capacity(tasks.len());

        while ordered.len() < tasks.len() {
            let Some(next) = tasks
                .iter()
                .find(|t| !done.contains(t.id.as_str()) && remaining[t.id.as_str()] == 0)
            else {
                let stuck = tasks
                    .iter()
                    .filter(|t| !done.contains(t.id.as_str()))
                    .map(|t| t.id.clone())
                    .collect();
                return Resolution::Circular(stuck);
            };

            done.insert(next.id.as_str());
            for task in tasks {
                let count = task.dependencies.iter().filter(|d| **d == next.id).count();
                if count > 0 {
                    if let Some(r) = remaining.get_mut(task.id.as_str()) {
                        *r -= count;
                    }
                }
            }
            ordered.push(next.clone());
        }

        Resolution::Ordered(ordered)
    }
}
