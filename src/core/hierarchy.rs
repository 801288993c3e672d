use crate::domain::model::{HierarchyNode, NodeKind, NomenclatureTree};
use crate::domain::ports::NomenclatureRepository;
use crate::utils::error::{HelpdeskError, Result};
use chrono::Utc;
use std::collections::HashMap;

/// In-memory view over one tree's nodes for parent-pointer walks.
#[derive(Debug, Default)]
pub struct NomenclatureIndex {
    nodes: HashMap<i64, HierarchyNode>,
    by_code: HashMap<String, Vec<i64>>,
}

impl NomenclatureIndex {
    pub fn new(nodes: Vec<HierarchyNode>) -> Self {
        let mut index = Self::default();
        for node in nodes {
            index
                .by_code
                .entry(node.code.clone())
                .or_default()
                .push(node.id);
            index.nodes.insert(node.id, node);
        }
        index
    }

    pub fn load<R: NomenclatureRepository + ?Sized>(repository: &R, region: &str) -> Result<Self> {
        let tree = active_tree(repository, region)?;
        Ok(Self::new(repository.nodes(tree.id)?))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&HierarchyNode> {
        self.nodes.get(&id)
    }

    /// Parents of `id`, nearest first, ending with the section.
    pub fn ancestors(&self, id: i64) -> Result<Vec<&HierarchyNode>> {
        let mut current = self.nodes.get(&id).ok_or_else(|| broken(id, "node not found"))?;
        let mut chain = Vec::new();

        while current.kind != NodeKind::Section {
            let parent_id = current
                .parent_id
                .ok_or_else(|| broken(current.id, "chain ends before reaching a section"))?;
            let parent = self
                .nodes
                .get(&parent_id)
                .ok_or_else(|| broken(current.id, &format!("parent {} is missing", parent_id)))?;

            if chain.len() > self.nodes.len() {
                return Err(broken(id, "cycle in parent chain"));
            }

            chain.push(parent);
            current = parent;
        }

        Ok(chain)
    }

    pub fn heading_of(&self, id: i64) -> Result<Option<&HierarchyNode>> {
        if let Some(node) = self.nodes.get(&id).filter(|n| n.kind == NodeKind::Heading) {
            return Ok(Some(node));
        }
        Ok(self
            .ancestors(id)?
            .into_iter()
            .find(|node| node.kind == NodeKind::Heading))
    }

    pub fn section_of(&self, id: i64) -> Result<&HierarchyNode> {
        if let Some(node) = self.nodes.get(&id).filter(|n| n.kind == NodeKind::Section) {
            return Ok(node);
        }
        self.ancestors(id)?
            .pop()
            .ok_or_else(|| broken(id, "no section above node"))
    }

    /// First of `kinds` with a node for `code`. Nodes sharing a code differ by
    /// product-line suffix; the most indented one is lowest in the tree.
    pub fn find_by_code(&self, code: &str, kinds: &[NodeKind]) -> Option<&HierarchyNode> {
        let ids = self.by_code.get(code)?;

        kinds.iter().find_map(|kind| {
            ids.iter()
                .filter_map(|id| self.nodes.get(id))
                .filter(|node| node.kind == *kind)
                .max_by_key(|node| node.number_indents)
        })
    }
}

fn broken(node_id: i64, reason: &str) -> HelpdeskError {
    HelpdeskError::BrokenHierarchy {
        node_id,
        reason: reason.to_string(),
    }
}

pub fn active_tree<R: NomenclatureRepository + ?Sized>(
    repository: &R,
    region: &str,
) -> Result<NomenclatureTree> {
    repository
        .active_tree(region)?
        .ok_or_else(|| HelpdeskError::NoActiveTree {
            region: region.to_string(),
        })
}

/// End-dates the active tree of `region` and activates the most recent one.
/// Keeps the one-active-tree-per-region invariant.
pub fn swap_tree<R: NomenclatureRepository + ?Sized>(
    repository: &R,
    region: &str,
) -> Result<NomenclatureTree> {
    let trees = repository.trees(region)?;
    let latest = trees
        .iter()
        .max_by_key(|tree| (tree.start_date, tree.id))
        .cloned()
        .ok_or_else(|| HelpdeskError::NoActiveTree {
            region: region.to_string(),
        })?;

    let now = Utc::now();
    for tree in trees.iter().filter(|t| t.is_active() && t.id != latest.id) {
        tracing::info!("Deactivating nomenclature tree {} ({})", tree.id, region);
        repository.set_tree_end_date(tree.id, Some(now))?;
    }

    if !latest.is_active() {
        repository.set_tree_end_date(latest.id, None)?;
    }
    tracing::info!("Nomenclature tree {} is now active for {}", latest.id, region);

    Ok(NomenclatureTree {
        end_date: None,
        ..latest
    })
}

/// Deletes end-dated trees of `region` older than the active one, keeping
/// the `keep` most recent of them. Pending trees are never touched.
pub fn delete_outdated_trees<R: NomenclatureRepository + ?Sized>(
    repository: &R,
    region: &str,
    keep: usize,
) -> Result<usize> {
    let trees = repository.trees(region)?;
    let Some(active) = trees.iter().find(|tree| tree.is_active()).cloned() else {
        tracing::warn!("No active nomenclature tree for {}, nothing deleted", region);
        return Ok(0);
    };

    let mut outdated: Vec<NomenclatureTree> = trees
        .into_iter()
        .filter(|tree| !tree.is_active() && tree.start_date < active.start_date)
        .collect();
    outdated.sort_by_key(|tree| std::cmp::Reverse(tree.start_date));

    let mut deleted = 0;
    for tree in outdated.into_iter().skip(keep) {
        tracing::info!("Deleting outdated nomenclature tree {} ({})", tree.id, region);
        repository.delete_tree(tree.id)?;
        deleted += 1;
    }
    Ok(deleted)
}
