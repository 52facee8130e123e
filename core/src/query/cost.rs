//! Cost model: weighted resource estimate per plan operator.
//!
//! Costs are unitless. Index entry reads weigh 1, record fetches 10,
//! post-filter evaluations 0.1, starting a range scan 50, deduplicating an
//! item 0.5, and sorting 0.01 per item. Selectivities are coarse static
//! estimates; the intersection survival ratio is deliberately tunable.

use super::plan::PlanNode;
use super::predicate::Predicate;

#[derive(Debug, Clone)]
pub struct CostModel {
    pub index_read: f64,
    pub record_fetch: f64,
    pub filter_eval: f64,
    pub range_init: f64,
    pub dedup_item: f64,
    pub sort_item: f64,
    /// Estimated fraction of the smallest child surviving an intersection.
    pub intersection_survival: f64,
    /// Default distinct-value count behind equality selectivity.
    pub default_distinct: f64,
    pub range_selectivity: f64,
    pub pattern_selectivity: f64,
    pub null_selectivity: f64,
    /// Assumed table cardinality when no statistics exist.
    pub assumed_rows: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            index_read: 1.0,
            record_fetch: 10.0,
            filter_eval: 0.1,
            range_init: 50.0,
            dedup_item: 0.5,
            sort_item: 0.01,
            intersection_survival: 0.1,
            default_distinct: 100.0,
            range_selectivity: 0.3,
            pattern_selectivity: 0.1,
            null_selectivity: 0.05,
            assumed_rows: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Estimate {
    pub rows: f64,
    pub cost: f64,
}

impl CostModel {
    pub fn equality_selectivity(&self) -> f64 { 1.0 / self.default_distinct }

    /// Selectivity of one residual conjunct.
    pub fn predicate_selectivity(&self, predicate: &Predicate) -> f64 {
        match predicate {
            Predicate::True => 1.0,
            Predicate::Compare { op, .. } => match op {
                super::predicate::ComparisonOp::Eq => self.equality_selectivity(),
                super::predicate::ComparisonOp::NotEq => 1.0 - self.equality_selectivity(),
                _ => self.range_selectivity,
            },
            Predicate::In { values, .. } => (values.len() as f64 * self.equality_selectivity()).min(1.0),
            Predicate::IsNull { .. } => self.null_selectivity,
            Predicate::IsNotNull { .. } => 1.0 - self.null_selectivity,
            Predicate::StartsWith { .. } => self.pattern_selectivity,
            Predicate::TextSearch { .. } => self.pattern_selectivity,
            Predicate::WithinBox { .. } => self.range_selectivity,
            Predicate::NearestTo { .. } => 1.0,
            Predicate::And(children) => children.iter().map(|c| self.predicate_selectivity(c)).product(),
            Predicate::Or(children) => children.iter().map(|c| self.predicate_selectivity(c)).sum::<f64>().min(1.0),
            Predicate::Not(inner) => 1.0 - self.predicate_selectivity(inner),
        }
    }

    /// Recursive estimate. `covering` marks plans whose index entries carry
    /// every referenced field, eliding record fetches below sort/filter.
    pub fn estimate(&self, node: &PlanNode, covering: bool) -> Estimate {
        let fetch = if covering { 0.0 } else { self.record_fetch };
        match node {
            PlanNode::FullScan => {
                let rows = self.assumed_rows;
                Estimate { rows, cost: self.range_init + rows * (self.index_read + self.record_fetch) }
            }
            PlanNode::IndexSeek { seeks, .. } => {
                let depth = seeks.first().map(|s| s.len()).unwrap_or(1) as i32;
                let per_seek = (self.assumed_rows * self.equality_selectivity().powi(depth)).max(1.0);
                let rows = (seeks.len() as f64 * per_seek).max(1.0);
                Estimate { rows, cost: rows * (self.index_read + fetch) }
            }
            PlanNode::IndexScan { range, .. } => {
                let mut selectivity = self.equality_selectivity().powi(range.prefix.len() as i32);
                if range.low.is_some() || range.high.is_some() {
                    selectivity *= self.range_selectivity;
                }
                let rows = (self.assumed_rows * selectivity).max(1.0);
                Estimate { rows, cost: self.range_init + rows * (self.index_read + fetch) }
            }
            PlanNode::Union { children, deduplicate } => {
                let mut rows = 0.0;
                let mut cost = 0.0;
                for child in children {
                    let estimate = self.estimate(child, covering);
                    rows += estimate.rows;
                    cost += estimate.cost + self.range_init;
                }
                if *deduplicate {
                    cost += rows * self.dedup_item;
                }
                Estimate { rows, cost }
            }
            PlanNode::Intersection { children } => {
                let mut smallest = f64::INFINITY;
                let mut cost = 0.0;
                for child in children {
                    // Children are index accesses; record fetch happens once,
                    // after the id sets intersect.
                    let estimate = self.estimate(child, true);
                    smallest = smallest.min(estimate.rows);
                    cost += estimate.cost;
                }
                let rows = (smallest * self.intersection_survival).max(1.0);
                cost += rows * self.record_fetch;
                Estimate { rows, cost }
            }
            PlanNode::Filter { child, predicate } => {
                let input = self.estimate(child, covering);
                let rows = (input.rows * self.predicate_selectivity(predicate)).max(0.0);
                Estimate { rows, cost: input.cost + input.rows * self.filter_eval }
            }
            PlanNode::Sort { child, .. } => {
                let input = self.estimate(child, covering);
                Estimate { rows: input.rows, cost: input.cost + input.rows * self.sort_item }
            }
            PlanNode::Limit { child, limit, offset } => {
                let input = self.estimate(child, covering);
                let cap = limit.map(|l| (l + offset) as f64).unwrap_or(input.rows);
                Estimate { rows: input.rows.min(cap), cost: input.cost }
            }
            PlanNode::FullTextScan { .. } => {
                let rows = (self.assumed_rows * self.pattern_selectivity).max(1.0);
                Estimate { rows, cost: self.range_init + rows * (self.index_read + self.record_fetch) }
            }
            PlanNode::VectorSearch { k, .. } => {
                let rows = *k as f64;
                Estimate { rows, cost: self.range_init + rows * (self.index_read + self.record_fetch) }
            }
            PlanNode::SpatialScan { .. } => {
                let rows = (self.assumed_rows * self.range_selectivity).max(1.0);
                Estimate { rows, cost: self.range_init + rows * (self.index_read + self.record_fetch) }
            }
        }
    }
}
