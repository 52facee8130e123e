//! Executable plan trees and their rendered form for `explain()`.

use super::predicate::{Predicate, TextOp};
use crate::value::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

/// One half-open/closed bound on the first unbound key column.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

/// Scan range over an index: a fully-bound equality prefix, then at most one
/// range on the next key column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanRange {
    pub prefix: Vec<Value>,
    pub low: Option<Bound>,
    pub high: Option<Bound>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    FullScan,
    /// Point lookups, one per seek tuple.
    IndexSeek { index: String, seeks: Vec<Vec<Value>> },
    IndexScan { index: String, range: ScanRange, reverse: bool },
    Union { children: Vec<PlanNode>, deduplicate: bool },
    Intersection { children: Vec<PlanNode> },
    Filter { child: Box<PlanNode>, predicate: Predicate },
    Sort { child: Box<PlanNode>, order: Vec<SortSpec> },
    Limit { child: Box<PlanNode>, limit: Option<usize>, offset: usize },
    FullTextScan { index: String, op: TextOp, query: String },
    VectorSearch { index: String, target: Vec<f32>, k: usize },
    SpatialScan { index: String, min: (f64, f64), max: (f64, f64) },
}

impl PlanNode {
    pub fn operator_count(&self) -> usize {
        1 + match self {
            PlanNode::Union { children, .. } | PlanNode::Intersection { children } => {
                children.iter().map(PlanNode::operator_count).sum()
            }
            PlanNode::Filter { child, .. } | PlanNode::Sort { child, .. } | PlanNode::Limit { child, .. } => child.operator_count(),
            _ => 0,
        }
    }

    /// Name of the first index this plan reads, for deterministic
    /// tie-breaking.
    pub fn first_index(&self) -> Option<&str> {
        match self {
            PlanNode::IndexSeek { index, .. }
            | PlanNode::IndexScan { index, .. }
            | PlanNode::FullTextScan { index, .. }
            | PlanNode::VectorSearch { index, .. }
            | PlanNode::SpatialScan { index, .. } => Some(index),
            PlanNode::Union { children, .. } | PlanNode::Intersection { children } => {
                children.iter().find_map(PlanNode::first_index)
            }
            PlanNode::Filter { child, .. } | PlanNode::Sort { child, .. } | PlanNode::Limit { child, .. } => child.first_index(),
            PlanNode::FullScan => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            PlanNode::FullScan => "FullScan".to_string(),
            PlanNode::IndexSeek { index, seeks } => format!("IndexSeek[{index}] seeks={}", seeks.len()),
            PlanNode::IndexScan { index, range, reverse } => {
                let mut out = format!("IndexScan[{index}] prefix={}", range.prefix.len());
                if let Some(low) = &range.low {
                    out.push_str(&format!(" low{}{}", if low.inclusive { ">=" } else { ">" }, low.value));
                }
                if let Some(high) = &range.high {
                    out.push_str(&format!(" high{}{}", if high.inclusive { "<=" } else { "<" }, high.value));
                }
                if *reverse {
                    out.push_str(" reverse");
                }
                out
            }
            PlanNode::Union { deduplicate, .. } => format!("Union deduplicate={deduplicate}"),
            PlanNode::Intersection { .. } => "Intersection".to_string(),
            PlanNode::Filter { predicate, .. } => format!("Filter {predicate}"),
            PlanNode::Sort { order, .. } => {
                let fields: Vec<String> =
                    order.iter().map(|s| format!("{}{}", s.field, if s.descending { " desc" } else { "" })).collect();
                format!("Sort by {}", fields.join(", "))
            }
            PlanNode::Limit { limit, offset, .. } => format!("Limit limit={limit:?} offset={offset}"),
            PlanNode::FullTextScan { index, op, query } => format!("FullTextScan[{index}] {op:?} {query:?}"),
            PlanNode::VectorSearch { index, k, .. } => format!("VectorSearch[{index}] k={k}"),
            PlanNode::SpatialScan { index, min, max } => format!("SpatialScan[{index}] [{min:?}..{max:?}]"),
        }
    }

    fn render(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.describe());
        out.push('\n');
        match self {
            PlanNode::Union { children, .. } | PlanNode::Intersection { children } => {
                for child in children {
                    child.render(depth + 1, out);
                }
            }
            PlanNode::Filter { child, .. } | PlanNode::Sort { child, .. } | PlanNode::Limit { child, .. } => {
                child.render(depth + 1, out);
            }
            _ => {}
        }
    }
}

/// A selected plan with its estimate, as returned by the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub root: PlanNode,
    pub estimated_cost: f64,
    /// Whether the plan yields the required order without an explicit sort.
    pub ordering_satisfied: bool,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.root.render(0, &mut out);
        write!(f, "{}cost={:.2} ordered={}", out, self.estimated_cost, self.ordering_satisfied)
    }
}
