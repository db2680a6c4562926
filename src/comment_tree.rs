//! Arena of comment nodes keyed by id.
//!
//! Parents own their children through id lists; the parent link on a node is
//! a plain id used for lookups and count propagation, so the tree has no
//! ownership cycles. Siblings are kept in their upstream order no matter
//! which one arrived first.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::InsertError;
use crate::models::{Comment, ItemId};

#[derive(Debug, Clone)]
struct CommentNode {
    comment: Arc<Comment>,
    parent: Option<ItemId>,
    children: Vec<ItemId>,
    /// Upstream position of each child id.
    child_rank: HashMap<ItemId, usize>,
    depth: usize,
    descendant_count: usize,
    collapsed: bool,
}

/// A display row: one comment plus its place in the tree.
///
/// Equality and hashing go by comment id only.
#[derive(Debug, Clone)]
pub struct CommentViewModel {
    pub comment: Arc<Comment>,
    pub parent_id: Option<ItemId>,
    /// Loaded children, in upstream order.
    pub child_ids: Vec<ItemId>,
    pub depth: usize,
    /// Loaded descendants at any depth.
    pub descendant_count: usize,
    pub collapsed: bool,
}

impl CommentViewModel {
    pub fn id(&self) -> ItemId {
        self.comment.id
    }
}

impl PartialEq for CommentViewModel {
    fn eq(&self, other: &Self) -> bool {
        self.comment.id == other.comment.id
    }
}

impl Eq for CommentViewModel {}

impl Hash for CommentViewModel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.comment.id.hash(state);
    }
}

#[derive(Debug, Default, Clone)]
pub struct CommentTree {
    nodes: HashMap<ItemId, CommentNode>,
    top_level: Vec<ItemId>,
    /// Upstream position of each top-level id.
    root_order: HashMap<ItemId, usize>,
}

impl CommentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree whose top-level comments sort by their position in `root_ids`.
    pub fn with_root_order(root_ids: &[ItemId]) -> Self {
        Self {
            root_order: rank_map(root_ids),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn top_level_ids(&self) -> &[ItemId] {
        &self.top_level
    }

    /// Attach `comment` under `parent` (or at the top level) and bump the
    /// descendant count of every ancestor.
    ///
    /// Returns the new node's depth, or `None` if the id was already present,
    /// in which case nothing changes.
    pub fn insert(
        &mut self,
        comment: Comment,
        parent: Option<ItemId>,
    ) -> Result<Option<usize>, InsertError> {
        if self.nodes.contains_key(&comment.id) {
            return Ok(None);
        }

        let id = comment.id;
        let depth = match parent {
            Some(parent_id) => {
                let parent_node = self
                    .nodes
                    .get_mut(&parent_id)
                    .ok_or(InsertError::MissingParent(parent_id))?;
                let ranks = &parent_node.child_rank;
                insert_ranked(&mut parent_node.children, id, |child| rank_in(ranks, child));
                parent_node.depth + 1
            }
            None => {
                let ranks = &self.root_order;
                insert_ranked(&mut self.top_level, id, |top| rank_in(ranks, top));
                0
            }
        };

        let child_rank = rank_map(comment.child_ids());
        self.nodes.insert(
            id,
            CommentNode {
                comment: Arc::new(comment),
                parent,
                children: Vec::new(),
                child_rank,
                depth,
                descendant_count: 0,
                collapsed: false,
            },
        );

        let mut ancestor = parent;
        while let Some(ancestor_id) = ancestor {
            match self.nodes.get_mut(&ancestor_id) {
                Some(node) => {
                    node.descendant_count += 1;
                    ancestor = node.parent;
                }
                None => break,
            }
        }

        Ok(Some(depth))
    }

    pub fn get(&self, id: ItemId) -> Option<CommentViewModel> {
        self.nodes.get(&id).map(view_model)
    }

    /// Ids from the top-level ancestor down to `id`'s parent.
    pub fn ancestors(&self, id: ItemId) -> Vec<ItemId> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(ancestor_id) = current {
            chain.push(ancestor_id);
            current = self.nodes.get(&ancestor_id).and_then(|n| n.parent);
        }
        chain.reverse();
        chain
    }

    /// Flip the collapsed flag; returns the new state.
    pub fn toggle_collapsed(&mut self, id: ItemId) -> Option<bool> {
        let node = self.nodes.get_mut(&id)?;
        node.collapsed = !node.collapsed;
        Some(node.collapsed)
    }

    /// Pre-order walk: parent before children, siblings in upstream order.
    /// Descendants of collapsed nodes are left out.
    pub fn flatten(&self) -> Vec<CommentViewModel> {
        let mut rows = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<ItemId> = self.top_level.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            rows.push(view_model(node));
            if !node.collapsed {
                stack.extend(node.children.iter().rev().copied());
            }
        }

        rows
    }
}

fn rank_map(ids: &[ItemId]) -> HashMap<ItemId, usize> {
    let mut ranks = HashMap::with_capacity(ids.len());
    for (index, id) in ids.iter().enumerate() {
        // A repeated id keeps its first position
        ranks.entry(*id).or_insert(index);
    }
    ranks
}

/// Ids missing from the upstream list sort last.
fn rank_in(ranks: &HashMap<ItemId, usize>, id: ItemId) -> usize {
    ranks.get(&id).copied().unwrap_or(usize::MAX)
}

/// Insert `id` into `ids`, which is kept sorted by rank. Equal ranks keep
/// arrival order.
fn insert_ranked(ids: &mut Vec<ItemId>, id: ItemId, rank_of: impl Fn(ItemId) -> usize) {
    let rank = rank_of(id);
    let position = ids.partition_point(|existing| rank_of(*existing) <= rank);
    ids.insert(position, id);
}

fn view_model(node: &CommentNode) -> CommentViewModel {
    CommentViewModel {
        comment: Arc::clone(&node.comment),
        parent_id: node.parent,
        child_ids: node.children.clone(),
        depth: node.depth,
        descendant_count: node.descendant_count,
        collapsed: node.collapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn comment(id: ItemId, parent: ItemId, kids: &[ItemId]) -> Comment {
        Comment {
            id,
            author: format!("user{}", id),
            parent_id: parent,
            child_ids: if kids.is_empty() { None } else { Some(kids.to_vec()) },
            body_text: format!("comment {}", id),
            created_at: Utc::now(),
        }
    }

    fn ids(rows: &[CommentViewModel]) -> Vec<ItemId> {
        rows.iter().map(|row| row.id()).collect()
    }

    #[test]
    fn flattens_depth_first_regardless_of_arrival_order() {
        let mut tree = CommentTree::with_root_order(&[1, 2]);
        tree.insert(comment(2, 100, &[]), None).unwrap();
        tree.insert(comment(1, 100, &[3, 4]), None).unwrap();
        tree.insert(comment(4, 1, &[]), Some(1)).unwrap();
        tree.insert(comment(3, 1, &[]), Some(1)).unwrap();

        let rows = tree.flatten();
        assert_eq!(ids(&rows), vec![1, 3, 4, 2]);
        assert_eq!(rows.iter().map(|r| r.depth).collect::<Vec<_>>(), vec![0, 1, 1, 0]);
        assert_eq!(rows[0].child_ids, vec![3, 4]);
        assert_eq!(rows[1].parent_id, Some(1));
    }

    #[test]
    fn counts_propagate_to_every_ancestor() {
        let mut tree = CommentTree::with_root_order(&[1]);
        tree.insert(comment(1, 100, &[2]), None).unwrap();
        tree.insert(comment(2, 1, &[3]), Some(1)).unwrap();
        tree.insert(comment(3, 2, &[]), Some(2)).unwrap();

        assert_eq!(tree.get(1).unwrap().descendant_count, 2);
        assert_eq!(tree.get(2).unwrap().descendant_count, 1);
        assert_eq!(tree.get(3).unwrap().descendant_count, 0);
        assert_eq!(tree.get(3).unwrap().depth, 2);
        assert_eq!(tree.ancestors(3), vec![1, 2]);
    }

    #[test]
    fn missing_parent_is_rejected() {
        let mut tree = CommentTree::new();
        let err = tree.insert(comment(5, 4, &[]), Some(4)).unwrap_err();
        assert_eq!(err, InsertError::MissingParent(4));
        assert!(tree.is_empty());
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut tree = CommentTree::with_root_order(&[1]);
        tree.insert(comment(1, 100, &[2]), None).unwrap();
        assert_eq!(tree.insert(comment(2, 1, &[]), Some(1)), Ok(Some(1)));
        assert_eq!(tree.insert(comment(2, 1, &[]), Some(1)), Ok(None));
        // A node listed among its own children is not attached twice
        assert_eq!(tree.insert(comment(1, 100, &[2]), Some(1)), Ok(None));

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(1).unwrap().descendant_count, 1);
        assert_eq!(ids(&tree.flatten()), vec![1, 2]);
    }

    #[test]
    fn collapsed_nodes_hide_descendants() {
        let mut tree = CommentTree::with_root_order(&[1, 2]);
        tree.insert(comment(1, 100, &[3]), None).unwrap();
        tree.insert(comment(2, 100, &[]), None).unwrap();
        tree.insert(comment(3, 1, &[]), Some(1)).unwrap();

        assert_eq!(tree.toggle_collapsed(1), Some(true));
        assert_eq!(ids(&tree.flatten()), vec![1, 2]);
        assert_eq!(tree.toggle_collapsed(1), Some(false));
        assert_eq!(ids(&tree.flatten()), vec![1, 3, 2]);
        assert_eq!(tree.toggle_collapsed(99), None);
    }

    #[test]
    fn unknown_top_level_ids_go_last() {
        let mut tree = CommentTree::with_root_order(&[1, 2]);
        tree.insert(comment(9, 100, &[]), None).unwrap();
        tree.insert(comment(2, 100, &[]), None).unwrap();
        tree.insert(comment(1, 100, &[]), None).unwrap();
        assert_eq!(ids(&tree.flatten()), vec![1, 2, 9]);
    }

    #[test]
    fn wide_sibling_lists_follow_upstream_order() {
        let kids: Vec<ItemId> = (10..510).collect();
        let mut tree = CommentTree::with_root_order(&[1]);
        tree.insert(comment(1, 100, &kids), None).unwrap();
        for id in kids.iter().rev() {
            tree.insert(comment(*id, 1, &[]), Some(1)).unwrap();
        }

        assert_eq!(tree.get(1).unwrap().child_ids, kids);
        assert_eq!(tree.get(1).unwrap().descendant_count, 500);
    }

    #[test]
    fn view_models_compare_by_id() {
        let mut tree = CommentTree::new();
        tree.insert(comment(1, 100, &[]), None).unwrap();
        let mut a = tree.get(1).unwrap();
        let b = tree.get(1).unwrap();
        a.collapsed = true;
        assert_eq!(a, b);
    }
}
