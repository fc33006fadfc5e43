//! Grammar: resolved operator sets, leaf library and the validity predicate.

use crate::compute::expr::{Expr, ExprKind, UnaryOp};
use crate::schema::{ConfigError, TreeConfig, parse_kinds};

/// A resolved, immutable grammar.
#[derive(Debug, Clone)]
pub struct Grammar {
    roots: Vec<ExprKind>,
    nodes: Vec<ExprKind>,
    non_trig: Vec<ExprKind>,
    vars: Vec<usize>,
    leaves: Vec<Expr>,
    min_size: usize,
    max_size: usize,
    min_height: usize,
    max_height: usize,
}

impl Grammar {
    /// Resolve a tree configuration for a problem with `num_vars` variables.
    pub fn new(config: &TreeConfig, num_vars: usize) -> Result<Self, ConfigError> {
        config.validate(num_vars)?;

        let vars = config.resolved_vars(num_vars);
        let mut leaves = Vec::new();
        for kind in parse_kinds(&config.leafs)? {
            match kind {
                ExprKind::Var => leaves.extend(vars.iter().map(|&i| Expr::var(i))),
                ExprKind::Time => leaves.push(Expr::Time),
                ExprKind::System => leaves.extend((0..config.num_system).map(Expr::System)),
                ExprKind::Coeff => leaves.push(Expr::coeff()),
                ExprKind::Literal => leaves.push(Expr::Literal(1.0)),
                _ => return Err(ConfigError::IllegalLeaf(kind.name().to_string())),
            }
        }

        Ok(Self {
            roots: parse_kinds(&config.roots)?,
            nodes: parse_kinds(&config.nodes)?,
            non_trig: parse_kinds(&config.non_trig)?,
            vars,
            leaves,
            min_size: config.min_size,
            max_size: config.max_size,
            min_height: config.min_height,
            max_height: config.max_height,
        })
    }

    /// Whether `expr` lies within the size and height bounds.
    pub fn is_valid(&self, expr: &Expr) -> bool {
        let size = expr.size();
        let height = expr.height();
        (self.min_size..=self.max_size).contains(&size)
            && (self.min_height..=self.max_height).contains(&height)
    }

    pub fn roots(&self) -> &[ExprKind] {
        &self.roots
    }

    /// Interior node kinds (unary functions and division).
    pub fn nodes(&self) -> &[ExprKind] {
        &self.nodes
    }

    pub fn non_trig(&self) -> &[ExprKind] {
        &self.non_trig
    }

    /// Usable variable indices.
    pub fn vars(&self) -> &[usize] {
        &self.vars
    }

    /// Leaf library: one expression per usable leaf.
    pub fn leaves(&self) -> &[Expr] {
        &self.leaves
    }

    /// Unary functions among the interior nodes.
    pub fn functions(&self) -> impl Iterator<Item = UnaryOp> + '_ {
        self.nodes.iter().filter_map(|&k| UnaryOp::from_kind(k))
    }

    /// Every `c*f(leaf)` or `c/leaf` term built from the node and leaf libraries.
    pub fn node_terms(&self) -> Vec<Expr> {
        let mut terms = Vec::with_capacity(self.nodes.len() * self.leaves.len());
        for &kind in &self.nodes {
            for leaf in &self.leaves {
                let term = match kind {
                    ExprKind::Div => Expr::div(Expr::coeff(), leaf.clone()),
                    other => match UnaryOp::from_kind(other) {
                        Some(op) => Expr::scaled(Expr::unary(op, leaf.clone())),
                        None => continue,
                    },
                };
                terms.push(term);
            }
        }
        terms
    }
}
