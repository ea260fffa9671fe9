//! Parameter-kind registration for the genetic search (spec.md §9): each
//! non-deterministic rewrite rule is a `ParamKind` impl exposing
//! analyze/generate/mutate over the candidate node IDs the deterministic
//! pass leaves behind.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::tree::{Node, NodeId, NodeKind};

/// One entry of a `filter_params` permutation: either a single conjunct
/// index, cascaded alone, or a preserved group of conjunct indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterParamItem {
    Single(usize),
    Group(Vec<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocChoice {
    Left,
    Right,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMethod {
    NestedLoop,
    Hash,
    IndexNestedLoop,
}

/// The full parameter set a candidate plan carries, keyed by the
/// deterministic-pass node IDs it was generated against.
#[derive(Debug, Clone, Default)]
pub struct PlanParams {
    pub filter_params: HashMap<NodeId, Vec<FilterParamItem>>,
    pub join_fold_params: HashMap<NodeId, bool>,
    pub join_child_params: HashMap<NodeId, bool>,
    pub join_assoc_params: HashMap<NodeId, AssocChoice>,
    pub join_method_params: HashMap<NodeId, JoinMethod>,
}

/// Candidate node IDs for each parameter family, collected once per tree by
/// `analyze`.
#[derive(Debug, Default)]
pub struct Candidates {
    /// `(filter_node_id, conjunct_count)`
    pub filters: Vec<(NodeId, usize)>,
    pub joins: Vec<NodeId>,
    pub join_assoc_roots: Vec<NodeId>,
    /// IDs of `FILTER` nodes sitting immediately above a non-`NATURAL`
    /// `JOIN`: the selection-into-join candidates (`join_fold_params`),
    /// keyed by the *filter's* ID since that's the node the fold decision
    /// consumes or leaves standing.
    pub fold_candidates: Vec<NodeId>,
}

pub fn analyze(tree: &Node) -> Candidates {
    let mut candidates = Candidates::default();
    analyze_node(tree, &mut candidates);
    candidates
}

fn analyze_node(node: &Node, out: &mut Candidates) {
    if node.kind == NodeKind::Filter {
        let cond = &node.children[1];
        if cond.kind == NodeKind::Operator && cond.value.as_op() == Some("AND") && cond.children.len() >= 2 {
            out.filters.push((node.id, cond.children.len()));
        }
        if node.children[0].kind == NodeKind::Join && node.children[0].value.as_op() != Some("NATURAL") {
            out.fold_candidates.push(node.id);
        }
    }
    if node.kind == NodeKind::Join {
        out.joins.push(node.id);
        if node.children.len() >= 2
            && (node.children[0].kind == NodeKind::Join || node.children[1].kind == NodeKind::Join)
        {
            out.join_assoc_roots.push(node.id);
        }
    }
    for c in &node.children {
        analyze_node(c, out);
    }
}

/// Generates a random valid parameter set over `candidates`.
pub fn generate_random(candidates: &Candidates, rng: &mut impl Rng) -> PlanParams {
    let mut params = PlanParams::default();

    for &(filter_id, n) in &candidates.filters {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        let items = order.into_iter().map(FilterParamItem::Single).collect();
        params.filter_params.insert(filter_id, items);
    }

    for &filter_id in &candidates.fold_candidates {
        params.join_fold_params.insert(filter_id, rng.gen_bool(0.5));
    }

    for &join_id in &candidates.joins {
        params.join_child_params.insert(join_id, rng.gen_bool(0.5));
        params.join_method_params.insert(join_id, JoinMethod::NestedLoop);
    }

    for &root in &candidates.join_assoc_roots {
        let choice = match rng.gen_range(0..3) {
            0 => AssocChoice::Left,
            1 => AssocChoice::Right,
            _ => AssocChoice::None,
        };
        params.join_assoc_params.insert(root, choice);
    }

    params
}

/// Uniform crossover: each parameter family inherits per-candidate entries
/// from one parent or the other. `filter_params` and `join_fold_params`
/// inherit jointly per spec.md §4.5.c, since folding a filter into a join
/// depends on which conjuncts survived as a standalone `FILTER`. The two
/// maps can share a key (a `FILTER` can be both an AND-cascade candidate and
/// sit directly above a join), in which case the same parent supplies both;
/// otherwise each is inherited on its own coin flip.
pub fn crossover(a: &PlanParams, b: &PlanParams, rng: &mut impl Rng) -> PlanParams {
    let mut child = PlanParams::default();

    let mut coupled_keys: std::collections::HashSet<NodeId> = a.filter_params.keys().copied().collect();
    coupled_keys.extend(a.join_fold_params.keys().copied());
    for key in coupled_keys {
        let src = if rng.gen_bool(0.5) { a } else { b };
        if let Some(v) = src.filter_params.get(&key) {
            child.filter_params.insert(key, v.clone());
        }
        if let Some(v) = src.join_fold_params.get(&key) {
            child.join_fold_params.insert(key, *v);
        }
    }

    for key in a.join_child_params.keys() {
        let src = if rng.gen_bool(0.5) { a } else { b };
        if let Some(v) = src.join_child_params.get(key) {
            child.join_child_params.insert(*key, *v);
        }
    }
    for key in a.join_assoc_params.keys() {
        let src = if rng.gen_bool(0.5) { a } else { b };
        if let Some(v) = src.join_assoc_params.get(key) {
            child.join_assoc_params.insert(*key, *v);
        }
    }
    for key in a.join_method_params.keys() {
        let src = if rng.gen_bool(0.5) { a } else { b };
        if let Some(v) = src.join_method_params.get(key) {
            child.join_method_params.insert(*key, *v);
        }
    }

    child
}

/// Per-parameter mutators, applied with probability `mutation_rate` per
/// candidate entry.
pub fn mutate(params: &mut PlanParams, candidates: &Candidates, mutation_rate: f64, rng: &mut impl Rng) {
    for &(filter_id, _) in &candidates.filters {
        if rng.gen_bool(mutation_rate) {
            if let Some(items) = params.filter_params.get_mut(&filter_id) {
                mutate_filter_items(items, rng);
            }
        }
    }

    for &filter_id in &candidates.fold_candidates {
        if rng.gen_bool(mutation_rate) {
            if let Some(v) = params.join_fold_params.get_mut(&filter_id) {
                *v = !*v;
            }
        }
    }

    for &join_id in &candidates.joins {
        if rng.gen_bool(mutation_rate) {
            if let Some(v) = params.join_child_params.get_mut(&join_id) {
                *v = !*v;
            }
        }
        if rng.gen_bool(mutation_rate) {
            if let Some(v) = params.join_method_params.get_mut(&join_id) {
                *v = cycle_method(*v);
            }
        }
    }

    for &root in &candidates.join_assoc_roots {
        if rng.gen_bool(mutation_rate) {
            if let Some(v) = params.join_assoc_params.get_mut(&root) {
                *v = cycle_assoc(*v);
            }
        }
    }
}

fn mutate_filter_items(items: &mut Vec<FilterParamItem>, rng: &mut impl Rng) {
    if items.len() < 2 {
        return;
    }
    match rng.gen_range(0..3) {
        // swap two cascade positions
        0 => {
            let i = rng.gen_range(0..items.len());
            let j = rng.gen_range(0..items.len());
            items.swap(i, j);
        }
        // group two adjacent single entries into one preserved AND group
        1 => {
            let i = rng.gen_range(0..items.len() - 1);
            if let (FilterParamItem::Single(a), FilterParamItem::Single(b)) = (&items[i], &items[i + 1]) {
                let merged = FilterParamItem::Group(vec![*a, *b]);
                items.splice(i..=i + 1, [merged]);
            }
        }
        // ungroup a preserved group back into singles
        _ => {
            if let Some(idx) = items.iter().position(|it| matches!(it, FilterParamItem::Group(g) if g.len() > 1)) {
                if let FilterParamItem::Group(g) = items.remove(idx) {
                    for (offset, i) in g.into_iter().enumerate() {
                        items.insert(idx + offset, FilterParamItem::Single(i));
                    }
                }
            }
        }
    }
}

fn cycle_method(m: JoinMethod) -> JoinMethod {
    match m {
        JoinMethod::NestedLoop => JoinMethod::Hash,
        JoinMethod::Hash => JoinMethod::IndexNestedLoop,
        JoinMethod::IndexNestedLoop => JoinMethod::NestedLoop,
    }
}

fn cycle_assoc(a: AssocChoice) -> AssocChoice {
    match a {
        AssocChoice::Left => AssocChoice::Right,
        AssocChoice::Right => AssocChoice::None,
        AssocChoice::None => AssocChoice::Left,
    }
}

/// Rejects parameter sets the genetic search must not propose: duplicated or
/// missing indices in a `filter_params` permutation, or a join method choice
/// incompatible with the join shape (checked by the caller, which knows
/// which joins have an indexed inner side; this function only checks the
/// shape-independent structural invariant).
pub fn validate_filter_permutation(items: &[FilterParamItem], conjunct_count: usize) -> bool {
    let mut seen = vec![false; conjunct_count];
    let mut flat_count = 0;
    for item in items {
        let indices: Vec<usize> = match item {
            FilterParamItem::Single(i) => vec![*i],
            FilterParamItem::Group(g) => g.clone(),
        };
        for i in indices {
            if i >= conjunct_count || seen[i] {
                return false;
            }
            seen[i] = true;
            flat_count += 1;
        }
    }
    flat_count == conjunct_count
}
