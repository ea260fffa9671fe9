//! Genetic search over the non-deterministic rewrite-parameter space
//! (spec.md §4.5.c): population of `(params, fitness, lazy plan)`
//! individuals, evolved by elitism + tournament selection + uniform
//! crossover + per-parameter mutation.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::tree::{Node, NodeKind, NodeValue};

use super::cost::{self, Cost, StatsProvider};
use super::params::{self, AssocChoice, Candidates, FilterParamItem, JoinMethod, PlanParams};
use super::rules;

#[derive(Debug, Clone, Copy)]
pub struct GeneticConfig {
    pub population: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub elitism: usize,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self { population: 50, generations: 100, mutation_rate: 0.1, crossover_rate: 0.8, elitism: 2 }
    }
}

/// A fitness function scores a materialized physical plan. Must be
/// deterministic on a given tree; the default delegates to the cost model.
pub type FitnessFn<'a> = dyn Fn(&Node) -> f64 + 'a;

struct Individual {
    params: PlanParams,
    fitness: f64,
}

/// Runs the deterministic pass, then searches the non-deterministic
/// parameter space for the lowest-cost materialization, returning that plan.
pub fn optimize(tree: &Node, stats: &dyn StatsProvider, config: GeneticConfig) -> Node {
    optimize_with_fitness(tree, config, &|plan| default_fitness(plan, stats))
}

pub fn optimize_with_fitness(tree: &Node, config: GeneticConfig, fitness: &FitnessFn) -> Node {
    let base = super::apply_deterministic_rules(tree);
    let candidates = params::analyze(&base);

    if candidates.filters.is_empty() && candidates.joins.is_empty() {
        return base;
    }

    let mut rng = rand::thread_rng();
    let mut population: Vec<Individual> = (0..config.population)
        .map(|_| {
            let p = params::generate_random(&candidates, &mut rng);
            let plan = materialize(&base, &p);
            let fitness_value = fitness(&plan);
            Individual { params: p, fitness: fitness_value }
        })
        .collect();

    for _ in 0..config.generations {
        population.sort_by(|a, b| a.fitness.partial_cmp(&b.fitness).unwrap_or(std::cmp::Ordering::Equal));

        let mut next_gen: Vec<Individual> = population.drain(0..config.elitism.min(population.len())).collect();

        while next_gen.len() < config.population {
            let parent_a = tournament_select(&population, &mut rng);
            let parent_b = tournament_select(&population, &mut rng);
            let mut child_params = if rng.gen_bool(config.crossover_rate) {
                params::crossover(&parent_a.params, &parent_b.params, &mut rng)
            } else {
                parent_a.params.clone()
            };
            params::mutate(&mut child_params, &candidates, config.mutation_rate, &mut rng);

            let plan = materialize(&base, &child_params);
            let fitness_value = fitness(&plan);
            next_gen.push(Individual { params: child_params, fitness: fitness_value });
        }

        population = next_gen;
    }

    population.sort_by(|a, b| a.fitness.partial_cmp(&b.fitness).unwrap_or(std::cmp::Ordering::Equal));
    let best = population.into_iter().next().expect("population is never empty");
    materialize(&base, &best.params)
}

fn tournament_select<'a>(population: &'a [Individual], rng: &mut impl Rng) -> &'a Individual {
    let mut best: Option<&Individual> = None;
    for _ in 0..3 {
        let candidate = population.choose(rng).expect("population is never empty");
        best = match best {
            Some(current) if current.fitness <= candidate.fitness => Some(current),
            _ => Some(candidate),
        };
    }
    best.expect("at least one tournament draw")
}

/// Applies a `PlanParams` instance to the deterministic-pass tree, producing
/// the physical plan the fitness function scores.
pub fn materialize(tree: &Node, params: &PlanParams) -> Node {
    match tree.kind {
        NodeKind::Filter => {
            let cond = &tree.children[1];

            // Selection-into-join (spec.md §4.5.a): fold this filter's whole
            // condition into the join immediately below it as a theta
            // condition, dropping the standalone FILTER, instead of keeping
            // it separate (and possibly cascading it, below).
            if params.join_fold_params.get(&tree.id).copied().unwrap_or(false) && tree.children[0].kind == NodeKind::Join {
                let folded = fold_condition_into_join(&tree.children[0], cond);
                return materialize(&folded, params);
            }

            let source = materialize(&tree.children[0], params);
            if let Some(items) = params.filter_params.get(&tree.id) {
                if cond.kind == NodeKind::Operator && cond.value.as_op() == Some("AND") {
                    return materialize_filter_cascade(source, &cond.children, items);
                }
            }
            Node::new(NodeKind::Filter, NodeValue::None, vec![source, cond.clone()])
        }
        NodeKind::Join => {
            // Join associativity (spec.md §4.5.a): reassociate a
            // `JOIN(JOIN(A,B),C)`/`JOIN(A,JOIN(B,C))` pattern to the other
            // shape before descending, redistributing each side's theta
            // conjuncts by table reference so no conjunct ends up needing a
            // relation not yet materialized at its new position.
            let choice = params.join_assoc_params.get(&tree.id).copied();
            let restructured = choice.and_then(|c| rules::reassociate(tree, c));
            let working = restructured.as_ref().unwrap_or(tree);

            let mut left = materialize(&working.children[0], params);
            let mut right = materialize(&working.children[1], params);
            if params.join_child_params.get(&tree.id).copied().unwrap_or(false) {
                std::mem::swap(&mut left, &mut right);
            }
            let method = params.join_method_params.get(&tree.id).copied().unwrap_or(JoinMethod::NestedLoop);
            let tag = match working.value.as_op().unwrap_or("INNER") {
                "NATURAL" => format!("NATURAL|{}", method_tag(method)),
                other => format!("{}|{}", other, method_tag(method)),
            };
            let mut children = vec![left, right];
            if working.children.len() == 3 {
                children.push(working.children[2].clone());
            }
            Node::new(NodeKind::Join, NodeValue::Op(tag), children)
        }
        _ => {
            let children = tree.children.iter().map(|c| materialize(c, params)).collect();
            Node::new(tree.kind, tree.value.clone(), children)
        }
    }
}

/// Merges a filter's condition into a join's own theta condition (ANDed with
/// whatever condition the join already carries, or installed as the join's
/// only condition if it had none). The join's left/right children and
/// method/associativity parameters are otherwise untouched: the caller
/// re-enters `materialize` on the result so those still apply normally.
fn fold_condition_into_join(join: &Node, filter_cond: &Node) -> Node {
    let mut children = join.children.clone();
    if children.len() >= 3 {
        let merged = Node::new(NodeKind::Operator, NodeValue::Op("AND".into()), vec![children[2].clone(), filter_cond.clone()]);
        children[2] = merged;
    } else {
        children.push(filter_cond.clone());
    }
    // Keep the join's own ID so `join_child_params`/`join_method_params`/
    // `join_assoc_params` (all keyed by the original join's ID) still
    // resolve once `materialize` re-enters on this folded node.
    Node { id: join.id, kind: NodeKind::Join, value: join.value.clone(), children }
}

fn method_tag(method: JoinMethod) -> &'static str {
    match method {
        JoinMethod::NestedLoop => "NESTED_LOOP",
        JoinMethod::Hash => "HASH",
        JoinMethod::IndexNestedLoop => "INDEX_NESTED_LOOP",
    }
}

fn materialize_filter_cascade(source: Node, conjuncts: &[Node], items: &[FilterParamItem]) -> Node {
    if !params::validate_filter_permutation(items, conjuncts.len()) {
        // An invalid permutation (should have been rejected before reaching
        // here) falls back to the untouched conjunction rather than drop
        // predicates silently.
        let cond = Node::new(NodeKind::Operator, NodeValue::Op("AND".into()), conjuncts.to_vec());
        return Node::new(NodeKind::Filter, NodeValue::None, vec![source, cond]);
    }

    let mut plan = source;
    for item in items.iter().rev() {
        let cond = match item {
            FilterParamItem::Single(i) => conjuncts[*i].clone(),
            FilterParamItem::Group(g) => {
                let group_conds: Vec<Node> = g.iter().map(|i| conjuncts[*i].clone()).collect();
                Node::new(NodeKind::Operator, NodeValue::Op("AND".into()), group_conds)
            }
        };
        plan = Node::new(NodeKind::Filter, NodeValue::None, vec![plan, cond]);
    }
    plan
}

/// The built-in fitness function: total cost of the plan, consulting
/// `stats` at every table scan leaf.
fn default_fitness(plan: &Node, stats: &dyn StatsProvider) -> f64 {
    estimate_cost(plan, stats).total()
}

fn estimate_cost(node: &Node, stats: &dyn StatsProvider) -> Cost {
    match node.kind {
        NodeKind::Relation => {
            let table = node.value.as_ident().unwrap_or("");
            stats.stats(table).map(|s| cost::table_scan_cost(&s)).unwrap_or_default()
        }
        NodeKind::Alias => node.children.first().map(|c| estimate_cost(c, stats)).unwrap_or_default(),
        NodeKind::Filter => {
            let source_cost = estimate_cost(&node.children[0], stats);
            let conjuncts = conjunct_count(&node.children[1]);
            let rows = estimate_rows(&node.children[0], stats);
            source_cost + cost::filter_cost(rows, conjuncts)
        }
        NodeKind::Join => {
            let left_cost = estimate_cost(&node.children[0], stats);
            let right_cost = estimate_cost(&node.children[1], stats);
            let b_outer = estimate_rows(&node.children[0], stats).max(1);
            let b_inner = estimate_rows(&node.children[1], stats).max(1);
            let method = node.value.as_op().unwrap_or("").split('|').nth(1).unwrap_or("NESTED_LOOP");
            let join_cost = match method {
                "HASH" => cost::hash_join_cost(left_cost, right_cost, b_inner),
                "INDEX_NESTED_LOOP" => cost::index_nested_loop_join_cost(left_cost, b_outer, right_cost, b_inner),
                _ => cost::nested_loop_join_cost(b_outer, b_inner),
            };
            left_cost + right_cost + join_cost
        }
        NodeKind::Sort => {
            let source_cost = estimate_cost(&node.children[0], stats);
            let n = estimate_rows(&node.children[0], stats);
            cost::sort_cost(n, (n / super::cost::SEQUENTIAL_IO.max(1.0) as u64).max(1), 1, source_cost)
        }
        _ => node.children.iter().map(|c| estimate_cost(c, stats)).fold(Cost::default(), |a, b| a + b),
    }
}

/// Row-count propagation: a `Relation` leaf reports its real
/// `Statistic::row_count`; a `Filter` scales its source's estimate down by
/// `estimate_selectivity` of its own condition. This is what lets the
/// genetic search actually distinguish between filter-cascade permutations:
/// the most selective predicate, placed innermost, shrinks every outer
/// filter's row count and therefore its CPU cost, so the search converges on
/// evaluating it first.
fn estimate_rows(node: &Node, stats: &dyn StatsProvider) -> u64 {
    match node.kind {
        NodeKind::Relation => {
            let table = node.value.as_ident().unwrap_or("");
            stats.stats(table).map(|s| s.row_count).unwrap_or(1)
        }
        NodeKind::Alias => node.children.first().map(|c| estimate_rows(c, stats)).unwrap_or(1),
        NodeKind::Filter => {
            let source_rows = estimate_rows(&node.children[0], stats) as f64;
            let table = table_name_of(&node.children[0]);
            let sel = estimate_selectivity(&node.children[1], table, stats);
            ((source_rows * sel).ceil() as u64).max(1)
        }
        NodeKind::Join => {
            let l = estimate_rows(&node.children[0], stats);
            let r = estimate_rows(&node.children[1], stats);
            l.saturating_mul(r).max(1)
        }
        _ => node.children.first().map(|c| estimate_rows(c, stats)).unwrap_or(1),
    }
}

/// The table a `Relation`/`Alias` subtree scans, when it is a plain
/// single-table source (not a join), enough to resolve `Statistic`'s
/// per-column `distinct_values` for an equality predicate's selectivity.
fn table_name_of(node: &Node) -> Option<&str> {
    match node.kind {
        NodeKind::Relation => node.value.as_ident(),
        NodeKind::Alias => node.children.first().and_then(table_name_of),
        _ => None,
    }
}

/// Structural selectivity estimate for a predicate, used to scale row counts
/// through a filter cascade. Equality against a known column on a
/// single-table source consults `Statistic::distinct_values`
/// (`cost::selectivity::equality`); every other predicate kind falls back to
/// `cost::selectivity`'s fixed per-kind estimate, the same defaults the cost
/// model already uses for index/join planning.
fn estimate_selectivity(cond: &Node, table: Option<&str>, stats: &dyn StatsProvider) -> f64 {
    match cond.kind {
        NodeKind::Comparison => match cond.value.as_op().unwrap_or("=") {
            "=" => equality_selectivity(cond, table, stats),
            "<>" => 1.0 - equality_selectivity(cond, table, stats),
            _ => cost::selectivity::range(),
        },
        NodeKind::BetweenExpr => cost::selectivity::between(),
        NodeKind::LikeExpr => cost::selectivity::like(),
        NodeKind::InExpr => cost::selectivity::in_list(),
        NodeKind::NotInExpr => 1.0 - cost::selectivity::in_list(),
        NodeKind::IsNullExpr => 0.1,
        NodeKind::IsNotNullExpr => 0.9,
        NodeKind::ExistsExpr => cost::selectivity::exists(),
        NodeKind::NotExistsExpr => 1.0 - cost::selectivity::exists(),
        NodeKind::Operator => match cond.value.as_op().unwrap_or("") {
            "AND" => cost::selectivity::and(
                &cond.children.iter().map(|c| estimate_selectivity(c, table, stats)).collect::<Vec<_>>(),
            ),
            "OR" => cost::selectivity::or(
                &cond.children.iter().map(|c| estimate_selectivity(c, table, stats)).collect::<Vec<_>>(),
            ),
            "NOT" => 1.0 - estimate_selectivity(&cond.children[0], table, stats),
            _ => 0.33,
        },
        NodeKind::LiteralBoolean => {
            if matches!(cond.value, NodeValue::Bool(true)) {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.33,
    }
}

fn equality_selectivity(cond: &Node, table: Option<&str>, stats: &dyn StatsProvider) -> f64 {
    let column = cond.children.iter().find_map(|c| match c.kind {
        NodeKind::ColumnName => c.value.as_ident(),
        NodeKind::ColumnRef => c.children.first().and_then(|cc| cc.value.as_ident()),
        _ => None,
    });
    match (table, column) {
        (Some(t), Some(c)) => stats
            .stats(t)
            .ok()
            .and_then(|s| s.distinct_values.get(c).copied())
            .map(cost::selectivity::equality)
            .unwrap_or(0.1),
        _ => 0.1,
    }
}

fn conjunct_count(cond: &Node) -> u64 {
    if cond.kind == NodeKind::Operator && cond.value.as_op() == Some("AND") {
        cond.children.len() as u64
    } else {
        1
    }
}

pub fn assoc_choice_is_valid(_choice: AssocChoice) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::types::Statistic;
    use std::collections::HashMap;

    struct FixedStats(HashMap<String, Statistic>);

    impl StatsProvider for FixedStats {
        fn stats(&self, table: &str) -> Result<Statistic> {
            self.0
                .get(table)
                .cloned()
                .ok_or_else(|| crate::error::DbError::table_not_found(table))
        }
    }

    fn stat(row_count: u64, block_count: u64) -> Statistic {
        Statistic { row_count, block_count, distinct_values: HashMap::new(), indexes: vec![] }
    }

    #[test]
    fn materialize_cascades_filter_per_permutation() {
        let source = Node::leaf(NodeKind::Relation, NodeValue::Ident("t".into()));
        let c0 = Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(true));
        let c1 = Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(true));
        let and = Node::new(NodeKind::Operator, NodeValue::Op("AND".into()), vec![c0, c1]);
        let filter = Node::new(NodeKind::Filter, NodeValue::None, vec![source, and]);

        let mut p = PlanParams::default();
        p.filter_params.insert(filter.id, vec![FilterParamItem::Single(1), FilterParamItem::Single(0)]);

        let materialized = materialize(&filter, &p);
        assert_eq!(materialized.kind, NodeKind::Filter);
        assert_eq!(materialized.children[0].kind, NodeKind::Filter);
    }

    #[test]
    fn fold_params_true_merges_filter_into_join_condition() {
        let left = Node::leaf(NodeKind::Relation, NodeValue::Ident("a".into()));
        let right = Node::leaf(NodeKind::Relation, NodeValue::Ident("b".into()));
        let join_cond = Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(true));
        let join = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![left, right, join_cond]);
        let extra_cond = Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(false));
        let filter = Node::new(NodeKind::Filter, NodeValue::None, vec![join, extra_cond]);

        let mut p = PlanParams::default();
        p.join_fold_params.insert(filter.id, true);

        let materialized = materialize(&filter, &p);
        // the standalone FILTER is gone; the join's condition absorbed it.
        assert_eq!(materialized.kind, NodeKind::Join);
        assert_eq!(materialized.children.len(), 3);
        assert_eq!(materialized.children[2].kind, NodeKind::Operator);
        assert_eq!(materialized.children[2].value.as_op(), Some("AND"));
    }

    #[test]
    fn fold_params_false_keeps_filter_standalone() {
        let left = Node::leaf(NodeKind::Relation, NodeValue::Ident("a".into()));
        let right = Node::leaf(NodeKind::Relation, NodeValue::Ident("b".into()));
        let join_cond = Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(true));
        let join = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![left, right, join_cond]);
        let extra_cond = Node::leaf(NodeKind::LiteralBoolean, NodeValue::Bool(false));
        let filter = Node::new(NodeKind::Filter, NodeValue::None, vec![join, extra_cond]);

        let mut p = PlanParams::default();
        p.join_fold_params.insert(filter.id, false);

        let materialized = materialize(&filter, &p);
        assert_eq!(materialized.kind, NodeKind::Filter);
        assert_eq!(materialized.children[0].kind, NodeKind::Join);
    }

    #[test]
    fn optimize_picks_the_most_selective_predicate_first() {
        let mut stats_map = HashMap::new();
        let mut distinct = HashMap::new();
        // equality on "id" is the most selective conjunct: 1/1000.
        distinct.insert("id".to_string(), 1000u64);
        let mut t = stat(1000, 16);
        t.distinct_values = distinct;
        stats_map.insert("t".to_string(), t);
        let stats = FixedStats(stats_map);

        let source = Node::leaf(NodeKind::Relation, NodeValue::Ident("t".into()));
        let id_eq = Node::new(
            NodeKind::Comparison,
            NodeValue::Op("=".into()),
            vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident("id".into())), Node::leaf(NodeKind::LiteralNumber, NodeValue::Int(1))],
        );
        // IN-list and LIKE both fall back to fixed, less selective defaults
        // (0.3 and 0.05 respectively) that are still far less selective than
        // the 0.001 equality above.
        let status_in = Node::new(
            NodeKind::InExpr,
            NodeValue::None,
            vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident("status".into()))],
        );
        let name_like = Node::new(
            NodeKind::LikeExpr,
            NodeValue::None,
            vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident("name".into()))],
        );
        let and = Node::new(NodeKind::Operator, NodeValue::Op("AND".into()), vec![status_in, name_like, id_eq]);
        let tree = Node::new(NodeKind::Filter, NodeValue::None, vec![source, and]);

        let config = GeneticConfig { population: 20, generations: 20, ..GeneticConfig::default() };
        let best = optimize(&tree, &stats, config);
        assert_eq!(best.kind, NodeKind::Filter);

        // Walk to the innermost Filter in the cascade: its condition must be
        // the equality on "id", the most selective conjunct, since it is
        // evaluated first against the full unfiltered row set.
        let mut innermost = &best;
        while innermost.children[0].kind == NodeKind::Filter {
            innermost = &innermost.children[0];
        }
        assert_eq!(innermost.children[1].kind, NodeKind::Comparison);
        assert_eq!(innermost.children[1].value.as_op(), Some("="));
    }

    #[test]
    fn estimate_selectivity_ranks_predicate_kinds_by_default_magnitude() {
        let mut stats_map = HashMap::new();
        let mut distinct = HashMap::new();
        distinct.insert("id".to_string(), 500u64);
        let mut t = stat(500, 8);
        t.distinct_values = distinct;
        stats_map.insert("t".to_string(), t);
        let stats = FixedStats(stats_map);

        let eq = Node::new(
            NodeKind::Comparison,
            NodeValue::Op("=".into()),
            vec![Node::leaf(NodeKind::ColumnName, NodeValue::Ident("id".into())), Node::leaf(NodeKind::LiteralNumber, NodeValue::Int(1))],
        );
        let like = Node::new(NodeKind::LikeExpr, NodeValue::None, vec![]);
        let in_list = Node::new(NodeKind::InExpr, NodeValue::None, vec![]);
        let is_not_null = Node::new(NodeKind::IsNotNullExpr, NodeValue::None, vec![]);

        let sel_eq = estimate_selectivity(&eq, Some("t"), &stats);
        let sel_like = estimate_selectivity(&like, Some("t"), &stats);
        let sel_in = estimate_selectivity(&in_list, Some("t"), &stats);
        let sel_not_null = estimate_selectivity(&is_not_null, Some("t"), &stats);

        assert!(sel_eq < sel_like);
        assert!(sel_like < sel_in);
        assert!(sel_in < sel_not_null);
    }
}
