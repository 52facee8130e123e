//! Cost-based query planner.
//!
//! Pipeline: normalize the predicate, extract per-field constraints,
//! enumerate candidate plans (full scan fallback, index seeks/scans,
//! intersections, unions over indexed disjunctions, specialized operators),
//! estimate each with the cost model, and pick the cheapest with
//! deterministic tie-breaking (fewer operators, then index name).

use super::cost::CostModel;
use super::plan::{Bound, PlanNode, QueryPlan, ScanRange, SortSpec};
use super::predicate::{ComparisonOp, Predicate};
use crate::error::{Error, Result};
use crate::schema::index::{IndexDescriptor, IndexKind};
use crate::schema::TypeDescriptor;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum PlanHint {
    UseIndex(String),
    ForceScan,
}

#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub predicate: Predicate,
    pub sort: Vec<SortSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub hint: Option<PlanHint>,
    /// Indexes the planner may read. `None` means every declared index; the
    /// store narrows this to exclude write-only and disabled indexes.
    pub readable_indexes: Option<HashSet<String>>,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self { predicate: Predicate::True, sort: Vec::new(), limit: None, offset: 0, hint: None, readable_indexes: None }
    }
}

/// One candidate access path plus which conjuncts it absorbed.
struct Candidate {
    access: PlanNode,
    consumed: Vec<usize>,
    ordering_satisfied: bool,
    /// Index backing the access, for covering analysis.
    index: Option<String>,
}

pub struct Planner {
    pub cost: CostModel,
}

impl Default for Planner {
    fn default() -> Self { Self { cost: CostModel::default() } }
}

impl Planner {
    pub fn new(cost: CostModel) -> Self { Self { cost } }

    pub fn plan(&self, descriptor: &TypeDescriptor, spec: &QuerySpec) -> Result<QueryPlan> {
        spec.predicate.validate()?;
        let normalized = spec.predicate.clone().normalize();

        if let Some(hint) = &spec.hint {
            return self.plan_hinted(descriptor, spec, &normalized, hint);
        }

        let mut candidates: Vec<Candidate> = Vec::new();

        // The fallback: a full scan filtered by everything.
        candidates.push(Candidate { access: PlanNode::FullScan, consumed: Vec::new(), ordering_satisfied: false, index: None });

        if let Predicate::Or(disjuncts) = &normalized {
            if let Some(union) = self.union_candidate(descriptor, spec, disjuncts)? {
                candidates.push(union);
            }
        }

        let conjuncts = normalized.conjuncts();
        for index in self.usable_indexes(descriptor, spec) {
            match index.kind {
                IndexKind::Ordered | IndexKind::Unique => {
                    if let Some(candidate) = self.match_ordered(index, &conjuncts, &spec.sort) {
                        candidates.push(candidate);
                    }
                }
                IndexKind::Text => candidates.extend(self.match_text(index, &conjuncts)),
                IndexKind::Vector => candidates.extend(self.match_vector(index, &conjuncts)),
                IndexKind::Spatial => candidates.extend(self.match_spatial(index, &conjuncts)),
                _ => {}
            }
        }

        if let Some(candidate) = self.intersection_candidate(descriptor, spec, &conjuncts) {
            candidates.push(candidate);
        }

        let mut best: Option<(QueryPlan, f64, usize)> = None;
        for candidate in candidates {
            let plan = self.finish(descriptor, spec, &conjuncts, candidate);
            let operators = plan.root.operator_count();
            let replace = match &best {
                None => true,
                Some((current, cost, ops)) => {
                    plan.estimated_cost < *cost
                        || (plan.estimated_cost == *cost
                            && (operators < *ops
                                || (operators == *ops
                                    && plan.root.first_index().unwrap_or("") < current.root.first_index().unwrap_or(""))))
                }
            };
            if replace {
                best = Some((plan.clone(), plan.estimated_cost, operators));
            }
        }

        // Enumeration always seeds the full scan, so a plan always exists.
        Ok(best.map(|(plan, _, _)| plan).unwrap())
    }

    fn plan_hinted(&self, descriptor: &TypeDescriptor, spec: &QuerySpec, normalized: &Predicate, hint: &PlanHint) -> Result<QueryPlan> {
        let conjuncts = normalized.conjuncts();
        let candidate = match hint {
            PlanHint::ForceScan => Candidate { access: PlanNode::FullScan, consumed: Vec::new(), ordering_satisfied: false, index: None },
            PlanHint::UseIndex(name) => {
                let index = descriptor.index_named(name).ok_or_else(|| Error::UnknownIndex(name.clone()))?;
                let matched = match index.kind {
                    IndexKind::Ordered | IndexKind::Unique => self.match_ordered(index, &conjuncts, &spec.sort),
                    IndexKind::Text => self.match_text(index, &conjuncts).into_iter().next(),
                    IndexKind::Vector => self.match_vector(index, &conjuncts).into_iter().next(),
                    IndexKind::Spatial => self.match_spatial(index, &conjuncts).into_iter().next(),
                    other => {
                        return Err(Error::InvalidQuery(format!("index {name} of kind {} cannot serve a record query", other.label())))
                    }
                };
                // A forced index is used even with nothing to push down: an
                // unbounded scan over it.
                matched.unwrap_or(Candidate {
                    access: PlanNode::IndexScan { index: name.clone(), range: ScanRange::default(), reverse: false },
                    consumed: Vec::new(),
                    ordering_satisfied: false,
                    index: Some(name.clone()),
                })
            }
        };
        Ok(self.finish(descriptor, spec, &conjuncts, candidate))
    }

    fn usable_indexes<'a>(&self, descriptor: &'a TypeDescriptor, spec: &QuerySpec) -> impl Iterator<Item = &'a IndexDescriptor> + 'a {
        let readable = spec.readable_indexes.clone();
        descriptor.indexes.iter().filter(move |index| readable.as_ref().map(|set| set.contains(&index.name)).unwrap_or(true))
    }

    /// Match a leading prefix of the index's key paths against equality
    /// constraints, then at most one IN (multi-seek) or one range.
    fn match_ordered(&self, index: &IndexDescriptor, conjuncts: &[Predicate], sort: &[SortSpec]) -> Option<Candidate> {
        let mut prefix: Vec<crate::value::Value> = Vec::new();
        let mut consumed: Vec<usize> = Vec::new();
        let mut in_values: Option<Vec<crate::value::Value>> = None;
        let mut low: Option<Bound> = None;
        let mut high: Option<Bound> = None;
        let mut bounded = false;

        'columns: for path in &index.key_paths {
            // Equality first.
            for (position, conjunct) in conjuncts.iter().enumerate() {
                if consumed.contains(&position) {
                    continue;
                }
                if let Predicate::Compare { field, op: ComparisonOp::Eq, value } = conjunct {
                    if field == path {
                        prefix.push(value.clone());
                        consumed.push(position);
                        continue 'columns;
                    }
                }
            }
            // Then one IN (multi-seek) or one range on this column, and stop.
            for (position, conjunct) in conjuncts.iter().enumerate() {
                if consumed.contains(&position) {
                    continue;
                }
                match conjunct {
                    Predicate::In { field, values } if field == path => {
                        in_values = Some(values.clone());
                        consumed.push(position);
                        break 'columns;
                    }
                    Predicate::Compare { field, op, value } if field == path => {
                        let bound = Bound { value: value.clone(), inclusive: matches!(op, ComparisonOp::LtEq | ComparisonOp::GtEq) };
                        match op {
                            ComparisonOp::Lt | ComparisonOp::LtEq if high.is_none() => {
                                high = Some(bound);
                                consumed.push(position);
                            }
                            ComparisonOp::Gt | ComparisonOp::GtEq if low.is_none() => {
                                low = Some(bound);
                                consumed.push(position);
                            }
                            _ => {}
                        }
                    }
                    Predicate::StartsWith { field, prefix: string_prefix } if field == path && low.is_none() && high.is_none() => {
                        // A string prefix narrows to a contiguous key range;
                        // the exact check stays in the residual filter.
                        low = Some(Bound { value: crate::value::Value::from(string_prefix.as_str()), inclusive: true });
                        let mut upper = string_prefix.clone();
                        upper.push(char::MAX);
                        high = Some(Bound { value: crate::value::Value::from(upper), inclusive: false });
                        bounded = true;
                    }
                    _ => {}
                }
            }
            break 'columns;
        }

        if consumed.is_empty() && !bounded && sort.is_empty() {
            return None;
        }

        // Multi-seek output concatenates per-seek scans and is never globally
        // ordered.
        let ordering_satisfied =
            in_values.is_none() && self.ordering_satisfied(index, &prefix, low.is_none() && high.is_none(), sort);
        let reverse = ordering_satisfied && !sort.is_empty() && sort.iter().all(|s| s.descending);

        let access = if let Some(values) = in_values {
            let seeks = values
                .into_iter()
                .map(|value| {
                    let mut seek = prefix.clone();
                    seek.push(value);
                    seek
                })
                .collect();
            PlanNode::IndexSeek { index: index.name.clone(), seeks }
        } else if prefix.len() == index.key_paths.len() && low.is_none() && high.is_none() {
            PlanNode::IndexSeek { index: index.name.clone(), seeks: vec![prefix] }
        } else if !consumed.is_empty() || bounded || ordering_satisfied {
            PlanNode::IndexScan { index: index.name.clone(), range: ScanRange { prefix, low, high }, reverse }
        } else {
            return None;
        };

        Some(Candidate { access, consumed, ordering_satisfied, index: Some(index.name.clone()) })
    }

    /// An index satisfies the requested order when, after the bound equality
    /// prefix, its remaining key paths lead with the sort fields in order
    /// and the directions are uniform (ascending forward, descending via a
    /// reverse scan). Multi-seek and ranged accesses only satisfy ordering
    /// for a sort on the ranged column itself.
    fn ordering_satisfied(&self, index: &IndexDescriptor, prefix: &[crate::value::Value], exact: bool, sort: &[SortSpec]) -> bool {
        if sort.is_empty() {
            return true;
        }
        if !exact && sort.len() > 1 {
            return false;
        }
        let remaining = &index.key_paths[prefix.len().min(index.key_paths.len())..];
        if sort.len() > remaining.len() {
            return false;
        }
        let fields_match = sort.iter().zip(remaining).all(|(s, path)| &s.field == path);
        let uniform = sort.iter().all(|s| s.descending) || sort.iter().all(|s| !s.descending);
        fields_match && uniform
    }

    fn match_text(&self, index: &IndexDescriptor, conjuncts: &[Predicate]) -> Option<Candidate> {
        conjuncts.iter().enumerate().find_map(|(position, conjunct)| match conjunct {
            Predicate::TextSearch { field, op, query } if *field == index.key_paths[0] => Some(Candidate {
                access: PlanNode::FullTextScan { index: index.name.clone(), op: *op, query: query.clone() },
                consumed: vec![position],
                ordering_satisfied: false,
                index: Some(index.name.clone()),
            }),
            _ => None,
        })
    }

    fn match_vector(&self, index: &IndexDescriptor, conjuncts: &[Predicate]) -> Option<Candidate> {
        conjuncts.iter().enumerate().find_map(|(position, conjunct)| match conjunct {
            Predicate::NearestTo { field, target, k } if *field == index.key_paths[0] => Some(Candidate {
                access: PlanNode::VectorSearch { index: index.name.clone(), target: target.clone(), k: *k },
                consumed: vec![position],
                ordering_satisfied: false,
                index: Some(index.name.clone()),
            }),
            _ => None,
        })
    }

    fn match_spatial(&self, index: &IndexDescriptor, conjuncts: &[Predicate]) -> Option<Candidate> {
        conjuncts.iter().find_map(|conjunct| match conjunct {
            Predicate::WithinBox { lat_field, lng_field, min, max }
                if *lat_field == index.key_paths[0] && *lng_field == index.key_paths[1] =>
            {
                // The cell cover is approximate: the box stays in the
                // residual filter rather than being consumed.
                Some(Candidate {
                    access: PlanNode::SpatialScan { index: index.name.clone(), min: *min, max: *max },
                    consumed: Vec::new(),
                    ordering_satisfied: false,
                    index: Some(index.name.clone()),
                })
            }
            _ => None,
        })
    }

    /// Children for a deduplicating union: one indexed access per disjunct,
    /// each filtered by its disjunct's residue. Bail if any disjunct has no
    /// usable index.
    fn union_candidate(&self, descriptor: &TypeDescriptor, spec: &QuerySpec, disjuncts: &[Predicate]) -> Result<Option<Candidate>> {
        if disjuncts.len() < 2 {
            return Ok(None);
        }
        let mut children = Vec::with_capacity(disjuncts.len());
        for disjunct in disjuncts {
            let conjuncts = disjunct.clone().normalize().conjuncts();
            let mut best: Option<(PlanNode, f64)> = None;
            for index in self.usable_indexes(descriptor, spec) {
                let matched = match index.kind {
                    IndexKind::Ordered | IndexKind::Unique => self.match_ordered(index, &conjuncts, &[]),
                    IndexKind::Text => self.match_text(index, &conjuncts),
                    _ => None,
                };
                if let Some(candidate) = matched {
                    if candidate.consumed.is_empty() {
                        continue;
                    }
                    let residual: Vec<Predicate> = conjuncts
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !candidate.consumed.contains(i))
                        .map(|(_, c)| c.clone())
                        .collect();
                    let child = if residual.is_empty() {
                        candidate.access
                    } else {
                        PlanNode::Filter {
                            child: Box::new(candidate.access),
                            predicate: Predicate::And(residual).normalize(),
                        }
                    };
                    let cost = self.cost.estimate(&child, false).cost;
                    if best.as_ref().map(|(_, c)| cost < *c).unwrap_or(true) {
                        best = Some((child, cost));
                    }
                }
            }
            match best {
                Some((child, _)) => children.push(child),
                None => return Ok(None),
            }
        }
        Ok(Some(Candidate {
            access: PlanNode::Union { children, deduplicate: true },
            consumed: Vec::new(),
            ordering_satisfied: false,
            index: None,
        }))
    }

    /// Intersection of independently-indexed equality constraints. Children
    /// are ranked by uniqueness (x100), leading-prefix match (x10) and
    /// inverse equality selectivity.
    fn intersection_candidate(&self, descriptor: &TypeDescriptor, spec: &QuerySpec, conjuncts: &[Predicate]) -> Option<Candidate> {
        let mut children: Vec<(f64, PlanNode, usize)> = Vec::new();
        for (position, conjunct) in conjuncts.iter().enumerate() {
            let (field, value) = match conjunct {
                Predicate::Compare { field, op: ComparisonOp::Eq, value } => (field, value),
                _ => continue,
            };
            let mut best: Option<(f64, PlanNode)> = None;
            for index in self.usable_indexes(descriptor, spec) {
                if !matches!(index.kind, IndexKind::Ordered | IndexKind::Unique) || index.key_paths.first() != Some(field) {
                    continue;
                }
                let mut score = 10.0; // leading-prefix match by construction
                if index.is_unique() {
                    score += 100.0;
                }
                score += 1.0 / self.cost.equality_selectivity();
                let access = if index.key_paths.len() == 1 {
                    PlanNode::IndexSeek { index: index.name.clone(), seeks: vec![vec![value.clone()]] }
                } else {
                    PlanNode::IndexScan {
                        index: index.name.clone(),
                        range: ScanRange { prefix: vec![value.clone()], low: None, high: None },
                        reverse: false,
                    }
                };
                if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                    best = Some((score, access));
                }
            }
            if let Some((score, access)) = best {
                children.push((score, access, position));
            }
        }
        if children.len() < 2 {
            return None;
        }
        children.sort_by(|a, b| b.0.total_cmp(&a.0));
        let consumed = children.iter().map(|(_, _, position)| *position).collect();
        let children = children.into_iter().map(|(_, access, _)| access).collect();
        Some(Candidate { access: PlanNode::Intersection { children }, consumed, ordering_satisfied: false, index: None })
    }

    /// Wrap an access candidate with residual filter, sort and limit, and
    /// estimate it.
    fn finish(&self, descriptor: &TypeDescriptor, spec: &QuerySpec, conjuncts: &[Predicate], candidate: Candidate) -> QueryPlan {
        let mut root = candidate.access;

        let residual: Vec<Predicate> = if matches!(root, PlanNode::Union { .. }) {
            // The union already folded the whole disjunction in.
            Vec::new()
        } else {
            conjuncts.iter().enumerate().filter(|(i, _)| !candidate.consumed.contains(i)).map(|(_, c)| c.clone()).collect()
        };
        if !residual.is_empty() {
            root = PlanNode::Filter { child: Box::new(root), predicate: Predicate::And(residual).normalize() };
        }

        let ordering_satisfied = candidate.ordering_satisfied;
        if !spec.sort.is_empty() && !ordering_satisfied {
            root = PlanNode::Sort { child: Box::new(root), order: spec.sort.clone() };
        }
        if spec.limit.is_some() || spec.offset > 0 {
            root = PlanNode::Limit { child: Box::new(root), limit: spec.limit, offset: spec.offset };
        }

        let covering = candidate
            .index
            .as_ref()
            .and_then(|name| descriptor.index_named(name))
            .map(|index| {
                let mut referenced = Vec::new();
                spec.predicate.referenced_fields(&mut referenced);
                for sort in &spec.sort {
                    if !referenced.contains(&sort.field) {
                        referenced.push(sort.field.clone());
                    }
                }
                // The primary key is always recoverable from the entry key
                // suffix, so only the referenced fields decide coverage.
                referenced.iter().all(|field| index.key_paths.contains(field) || index.stored_fields.contains(field))
            })
            .unwrap_or(false);

        let estimate = self.cost.estimate(&root, covering);
        QueryPlan { root, estimated_cost: estimate.cost, ordering_satisfied: ordering_satisfied || spec.sort.is_empty() }
    }
}
