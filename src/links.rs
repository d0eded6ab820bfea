// 🔗 Account Links - secondary accounts billed under a primary identity
//
// Edges are `secondary → primary` and form a one-level forest:
// - a secondary has at most one outgoing edge
// - a primary is never itself a secondary
//
// Chains are flattened when the link is made, so resolution is a single
// lookup and never recurses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("cannot link account {0} to itself")]
    SelfLink(String),

    #[error("account {secondary} is already linked to {existing}")]
    AlreadyLinked { secondary: String, existing: String },

    /// The would-be secondary already has secondaries of its own
    #[error("account {0} is a primary for other accounts and cannot become a secondary")]
    HasAliases(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// The identical edge already existed
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountLinkGraph {
    edges: BTreeMap<String, String>,
}

impl AccountLinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `secondary` to `primary`.
    ///
    /// If `primary` is itself a secondary, the edge points at its primary
    /// instead (flattening). The stored primary is returned via `resolve`.
    pub fn link(&mut self, secondary: &str, primary: &str) -> Result<LinkOutcome, LinkError> {
        let target = self.resolve(primary).to_string();

        if secondary == target {
            return Err(LinkError::SelfLink(secondary.to_string()));
        }

        if let Some(existing) = self.edges.get(secondary) {
            if *existing == target {
                return Ok(LinkOutcome::Unchanged);
            }
            return Err(LinkError::AlreadyLinked {
                secondary: secondary.to_string(),
                existing: existing.clone(),
            });
        }

        if self.is_primary(secondary) {
            return Err(LinkError::HasAliases(secondary.to_string()));
        }

        self.edges.insert(secondary.to_string(), target);
        Ok(LinkOutcome::Linked)
    }

    /// Billing identity for `id` (one hop at most)
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.edges.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Remove the outgoing edge of `secondary`, returning its former primary
    pub fn unlink(&mut self, secondary: &str) -> Option<String> {
        self.edges.remove(secondary)
    }

    /// Drop every edge pointing at `primary`; returns the detached secondaries
    pub fn remove_primary(&mut self, primary: &str) -> Vec<String> {
        let detached = self.secondaries_of(primary);
        self.edges.retain(|_, p| p != primary);
        detached
    }

    pub fn secondaries_of(&self, primary: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, p)| p.as_str() == primary)
            .map(|(s, _)| s.clone())
            .collect()
    }

    pub fn is_secondary(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    pub fn is_primary(&self, id: &str) -> bool {
        self.edges.values().any(|p| p == id)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All edges as (secondary, primary), ordered by secondary
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().map(|(s, p)| (s.as_str(), p.as_str()))
    }

    /// Rebuild a graph from raw edges, keeping only those that respect the
    /// one-level forest. Rejected edges are returned for the caller to report.
    pub fn from_edges<I>(edges: I) -> (Self, Vec<(String, String)>)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut raw: Vec<(String, String)> = edges.into_iter().collect();
        raw.sort();

        let primaries: std::collections::BTreeSet<&str> =
            raw.iter().map(|(_, p)| p.as_str()).collect();

        let mut graph = AccountLinkGraph::new();
        let mut rejected = Vec::new();

        for (secondary, primary) in &raw {
            // A chain (secondary that is also someone's primary) cannot be
            // stored as-is; quarantine it rather than guess the intent.
            let chained = primaries.contains(secondary.as_str())
                || raw.iter().any(|(s, _)| s == primary);
            if secondary == primary || chained {
                rejected.push((secondary.clone(), primary.clone()));
                continue;
            }
            if graph.link(secondary, primary).is_err() {
                rejected.push((secondary.clone(), primary.clone()));
            }
        }

        (graph, rejected)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_then_resolve() {
        let mut graph = AccountLinkGraph::new();
        assert_eq!(graph.link("alt", "main").unwrap(), LinkOutcome::Linked);

        assert_eq!(graph.resolve("alt"), "main");
        assert_eq!(graph.resolve("main"), "main");
        assert_eq!(graph.resolve("stranger"), "stranger");
    }

    #[test]
    fn test_identical_link_is_idempotent() {
        let mut graph = AccountLinkGraph::new();
        graph.link("alt", "main").unwrap();
        assert_eq!(graph.link("alt", "main").unwrap(), LinkOutcome::Unchanged);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_relinking_to_different_primary_fails() {
        let mut graph = AccountLinkGraph::new();
        graph.link("alt", "main").unwrap();

        let err = graph.link("alt", "other").unwrap_err();
        assert_eq!(
            err,
            LinkError::AlreadyLinked {
                secondary: "alt".to_string(),
                existing: "main".to_string(),
            }
        );
        assert_eq!(graph.resolve("alt"), "main");
    }

    #[test]
    fn test_self_link_rejected() {
        let mut graph = AccountLinkGraph::new();
        assert!(matches!(graph.link("a", "a"), Err(LinkError::SelfLink(_))));

        // Linking a primary to its own secondary collapses to a self link
        graph.link("alt", "main").unwrap();
        assert!(matches!(graph.link("main", "alt"), Err(LinkError::SelfLink(_))));
    }

    #[test]
    fn test_chain_is_flattened_at_link_time() {
        let mut graph = AccountLinkGraph::new();
        graph.link("alt", "main").unwrap();
        graph.link("alt2", "alt").unwrap();

        assert_eq!(graph.resolve("alt2"), "main");
        assert!(!graph.is_primary("alt"));
        assert_eq!(graph.secondaries_of("main"), vec!["alt", "alt2"]);
    }

    #[test]
    fn test_primary_cannot_become_secondary() {
        let mut graph = AccountLinkGraph::new();
        graph.link("alt", "main").unwrap();

        let err = graph.link("main", "boss").unwrap_err();
        assert_eq!(err, LinkError::HasAliases("main".to_string()));
        assert_eq!(graph.resolve("main"), "main");
    }

    #[test]
    fn test_remove_primary_drops_its_edges() {
        let mut graph = AccountLinkGraph::new();
        graph.link("a1", "main").unwrap();
        graph.link("a2", "main").unwrap();
        graph.link("b1", "other").unwrap();

        let detached = graph.remove_primary("main");
        assert_eq!(detached, vec!["a1", "a2"]);
        assert_eq!(graph.resolve("a1"), "a1");
        assert_eq!(graph.resolve("b1"), "other");
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_from_edges_quarantines_chains() {
        let (graph, rejected) = AccountLinkGraph::from_edges(vec![
            ("alt".to_string(), "main".to_string()),
            ("deep".to_string(), "alt".to_string()),
            ("loop".to_string(), "loop".to_string()),
            ("ok".to_string(), "other".to_string()),
        ]);

        assert_eq!(graph.resolve("ok"), "other");
        assert_eq!(graph.resolve("deep"), "deep");
        assert_eq!(graph.resolve("alt"), "alt");
        assert_eq!(rejected.len(), 3);
    }
}
