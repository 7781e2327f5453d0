//! Research tree (spec §4.7), grounded in
//! `original_source/agent/workflows/research_tree.py`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::providers::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub query: String,
    pub result: String,
    pub ts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchNode {
    pub id: String,
    pub topic: String,
    pub depth: u32,
    pub parent_id: Option<String>,
    pub children_ids: Vec<String>,
    pub status: NodeStatus,
    pub findings: Vec<Finding>,
    pub sources: Vec<SearchResult>,
    pub summary: String,
    pub queries: Vec<String>,
    pub relevance_score: f64,
    pub created_at: u64,
    pub completed_at: Option<u64>,
    pub error: Option<String>,
}

impl ResearchNode {
    fn new(topic: impl Into<String>, depth: u32, parent_id: Option<String>, relevance_score: f64, now: u64) -> Self {
        ResearchNode {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            depth,
            parent_id,
            children_ids: Vec::new(),
            status: NodeStatus::Pending,
            findings: Vec::new(),
            sources: Vec::new(),
            summary: String::new(),
            queries: Vec::new(),
            relevance_score,
            created_at: now,
            completed_at: None,
            error: None,
        }
    }
}

/// `{root_id?, nodes, max_depth, max_branches, created_at}` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTree {
    pub root_id: Option<String>,
    pub nodes: HashMap<String, ResearchNode>,
    pub max_depth: u32,
    pub max_branches: u32,
    pub created_at: u64,
}

impl ResearchTree {
    pub fn new(max_depth: u32, max_branches: u32, now: u64) -> Self {
        ResearchTree { root_id: None, nodes: HashMap::new(), max_depth, max_branches, created_at: now }
    }

    /// Root's `relevance_score` defaults to `1.0` (spec §4.7 [ADD]).
    pub fn create_root(&mut self, topic: impl Into<String>, now: u64) -> String {
        let node = ResearchNode::new(topic, 0, None, 1.0, now);
        let id = node.id.clone();
        self.root_id = Some(id.clone());
        self.nodes.insert(id.clone(), node);
        id
    }

    /// Rejected silently (returns `None`) if `parent.depth >= max_depth` or
    /// `parent.children.len() >= max_branches` (spec §3).
    pub fn add_child(&mut self, parent_id: &str, topic: impl Into<String>, relevance: f64, now: u64) -> Option<String> {
        let (depth, child_count) = {
            let parent = self.nodes.get(parent_id)?;
            (parent.depth, parent.children_ids.len() as u32)
        };

        if depth >= self.max_depth || child_count >= self.max_branches {
            return None;
        }

        let node = ResearchNode::new(topic, depth + 1, Some(parent_id.to_string()), relevance, now);
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        self.nodes.get_mut(parent_id).unwrap().children_ids.push(id.clone());
        Some(id)
    }

    pub fn node(&self, id: &str) -> Option<&ResearchNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut ResearchNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes_at_depth(&self, depth: u32) -> Vec<&ResearchNode> {
        self.nodes.values().filter(|n| n.depth == depth).collect()
    }

    pub fn completed_nodes(&self) -> Vec<&ResearchNode> {
        self.nodes.values().filter(|n| n.status == NodeStatus::Completed).collect()
    }

    pub fn pending_nodes(&self) -> Vec<&ResearchNode> {
        self.nodes.values().filter(|n| n.status == NodeStatus::Pending).collect()
    }

    /// Exact-URL-string dedup via `HashSet` — coarser than the canonical
    /// dedup `providers::dedup::canonical_url_key` applies at the
    /// `SearchResult` layer (spec §4.7 [ADD]).
    pub fn all_sources(&self) -> Vec<SearchResult> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for node in self.nodes.values() {
            for source in &node.sources {
                if seen.insert(source.url.clone()) {
                    out.push(source.clone());
                }
            }
        }
        out
    }

    pub fn all_findings(&self) -> Vec<Finding> {
        self.nodes.values().flat_map(|n| n.findings.clone()).collect()
    }

    /// Depth-first, two-space indent per level, skipping non-completed
    /// nodes (spec §4.7 [ADD]).
    pub fn merged_summary(&self) -> String {
        let Some(root_id) = &self.root_id else { return String::new() };
        let mut lines = Vec::new();
        self.walk_summary(root_id, &mut lines);
        lines.join("\n")
    }

    fn walk_summary(&self, node_id: &str, lines: &mut Vec<String>) {
        let Some(node) = self.nodes.get(node_id) else { return };
        if node.status == NodeStatus::Completed {
            let indent = "  ".repeat(node.depth as usize);
            lines.push(format!("{indent}{}: {}", node.topic, node.summary));
        }
        for child_id in &node.children_ids {
            self.walk_summary(child_id, lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_depth_zero_and_full_relevance() {
        let mut tree = ResearchTree::new(2, 4, 0);
        let root_id = tree.create_root("topic", 0);
        let root = tree.node(&root_id).unwrap();
        assert_eq!(root.depth, 0);
        assert_eq!(root.relevance_score, 1.0);
        assert!(root.parent_id.is_none());
    }

    #[test]
    fn add_child_rejected_beyond_max_branches() {
        let mut tree = ResearchTree::new(2, 1, 0);
        let root_id = tree.create_root("topic", 0);
        assert!(tree.add_child(&root_id, "child 1", 0.8, 1).is_some());
        assert!(tree.add_child(&root_id, "child 2", 0.8, 1).is_none());
    }

    #[test]
    fn add_child_rejected_beyond_max_depth() {
        let mut tree = ResearchTree::new(0, 4, 0);
        let root_id = tree.create_root("topic", 0);
        assert!(tree.add_child(&root_id, "child", 0.8, 1).is_none());
    }

    #[test]
    fn all_sources_dedups_by_exact_url() {
        let mut tree = ResearchTree::new(2, 4, 0);
        let root_id = tree.create_root("topic", 0);
        let source = SearchResult {
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            snippet: "s".to_string(),
            raw_excerpt: "r".to_string(),
            score: 0.5,
            published_date: None,
            provider: "tavily".to_string(),
        };
        tree.node_mut(&root_id).unwrap().sources.push(source.clone());
        tree.node_mut(&root_id).unwrap().sources.push(source);
        assert_eq!(tree.all_sources().len(), 1);
    }

    #[test]
    fn merged_summary_skips_non_completed_nodes_and_indents_by_depth() {
        let mut tree = ResearchTree::new(2, 4, 0);
        let root_id = tree.create_root("root topic", 0);
        tree.node_mut(&root_id).unwrap().status = NodeStatus::Completed;
        tree.node_mut(&root_id).unwrap().summary = "root summary".to_string();

        let child_id = tree.add_child(&root_id, "child topic", 0.8, 1).unwrap();
        tree.node_mut(&child_id).unwrap().status = NodeStatus::Failed;

        let summary = tree.merged_summary();
        assert!(summary.contains("root topic: root summary"));
        assert!(!summary.contains("child topic"));
    }
}
