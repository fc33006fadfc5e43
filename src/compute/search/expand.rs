//! Candidate expansion.
//!
//! Three strategies grow a peeled candidate into its children:
//!
//! - [`GrowMethod::Structural`]: add a term to every sum, widen every product
//!   and re-shape every variable (into a sum, a product or a function argument).
//! - [`GrowMethod::Basis`]: append basis terms to the top-level sum, or
//!   multiply one of its terms by a basis term.
//! - [`GrowMethod::BasisNested`]: as `Basis`, and also nest basis terms inside
//!   the argument of scaled function terms. Under a trig function only the
//!   grammar's non-trig functions may appear.
//!
//! Every child is converted (numeric leaves become free coefficients) and
//! simplified before it leaves the expander; children that fail to simplify
//! are dropped.

use log::trace;

use super::Grammar;
use crate::compute::expr::{Expr, ExprKind, UnaryOp};
use crate::schema::{GrowMethod, InitMethod, SimpRules};

/// Largest integer power in the basis library.
const MAX_BASIS_POWER: i32 = 4;

/// Grows candidates under a fixed grammar and strategy.
#[derive(Debug, Clone)]
pub struct Expander {
    grammar: Grammar,
    method: GrowMethod,
    rules: SimpRules,
    bases: Vec<Expr>,
    max_basis_factors: usize,
}

impl Expander {
    pub fn new(
        grammar: Grammar,
        method: GrowMethod,
        rules: SimpRules,
        max_basis_factors: usize,
    ) -> Self {
        let bases = basis_library(&grammar);
        Self {
            grammar,
            method,
            rules,
            bases,
            max_basis_factors,
        }
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn method(&self) -> GrowMethod {
        self.method
    }

    /// Precomputed basis terms.
    pub fn bases(&self) -> &[Expr] {
        &self.bases
    }

    /// Initial candidates, converted and simplified.
    pub fn initial(&self, method: InitMethod) -> Vec<Expr> {
        let raw = match method {
            InitMethod::Templates => self.templates(),
            InitMethod::Basis => self.bases.clone(),
        };
        raw.iter().filter_map(|e| self.finalize(e)).collect()
    }

    /// One small template per root kind and usable variable.
    fn templates(&self) -> Vec<Expr> {
        let vars = self.grammar.vars();
        let mut out = Vec::new();
        for &root in self.grammar.roots() {
            match root {
                ExprKind::Add => {
                    out.push(Expr::Add(vec![Expr::coeff()]));
                    out.extend(
                        vars.iter()
                            .map(|&v| Expr::Add(vec![Expr::scaled(Expr::var(v))])),
                    );
                }
                ExprKind::Mul => out.extend(vars.iter().map(|&v| Expr::scaled(Expr::var(v)))),
                ExprKind::Div => {
                    out.extend(vars.iter().map(|&v| Expr::div(Expr::coeff(), Expr::var(v))))
                }
                _ => {}
            }
        }
        out
    }

    /// Children of `expr` under the configured strategy.
    pub fn expand(&self, expr: &Expr) -> Vec<Expr> {
        let mut seed = expr.clone();
        seed.sort();

        let raw = match self.method {
            GrowMethod::Structural => self.grow_structural(&seed),
            GrowMethod::Basis => self.grow_basis(&top_terms(&seed)),
            GrowMethod::BasisNested => {
                let terms = top_terms(&seed);
                let mut out = self.grow_basis(&terms);
                out.extend(self.nest_basis(&terms));
                out
            }
        };
        raw.iter().filter_map(|e| self.finalize(e)).collect()
    }

    /// Convert literals to coefficients and simplify; `None` when malformed.
    pub fn finalize(&self, expr: &Expr) -> Option<Expr> {
        let mut guess = Vec::new();
        let converted = expr.convert_to_coefficients(&mut guess);
        match converted.simplify(&self.rules) {
            Ok(mut out) => {
                out.index_coefficients();
                Some(out)
            }
            Err(err) => {
                trace!("Dropping malformed candidate {expr}: {err}");
                None
            }
        }
    }

    // ========================================================================
    // Structural growth
    // ========================================================================

    fn grow_structural(&self, seed: &Expr) -> Vec<Expr> {
        let mut out = Vec::new();
        for pos in 0..seed.node_count() {
            match seed.subtree(pos) {
                Some(Expr::Add(terms)) => out.extend(self.add_term(seed, pos, terms)),
                Some(Expr::Mul(_)) => out.extend(self.widen_term(seed, pos)),
                Some(node @ Expr::Var(_)) => out.extend(self.deepen_term(seed, pos, node)),
                _ => {}
            }
        }
        out
    }

    /// `c*leaf` terms followed by `c*f(leaf)` and `c/leaf` terms.
    fn new_terms(&self) -> Vec<Expr> {
        let mut terms: Vec<Expr> = self
            .grammar
            .leaves()
            .iter()
            .map(|l| Expr::scaled(l.clone()))
            .collect();
        terms.extend(self.grammar.node_terms());
        terms
    }

    /// Append a new term to the sum at `pos`, skipping terms already present.
    fn add_term(&self, seed: &Expr, pos: usize, existing: &[Expr]) -> Vec<Expr> {
        let mut out = Vec::new();
        for term in self.new_terms() {
            if existing.iter().any(|t| t.is_almost_same(&term)) {
                continue;
            }
            let mut child = seed.clone();
            if let Some(Expr::Add(terms)) = child.subtree_mut(pos) {
                terms.push(term);
                terms.sort_by(|a, b| a.cmp_structure(b));
            }
            if self.grammar.is_valid(&child) {
                out.push(child);
            }
        }
        out
    }

    /// Insert a leaf or a node term into the product at `pos`.
    fn widen_term(&self, seed: &Expr, pos: usize) -> Vec<Expr> {
        let factors = self
            .grammar
            .leaves()
            .iter()
            .cloned()
            .chain(self.grammar.node_terms());

        let mut out = Vec::new();
        for factor in factors {
            let mut child = seed.clone();
            if let Some(Expr::Mul(terms)) = child.subtree_mut(pos) {
                terms.push(factor);
                terms.sort_by(|a, b| a.cmp_structure(b));
            }
            if self.grammar.is_valid(&child) {
                out.push(child);
            }
        }
        out
    }

    /// Replace the variable at `pos` with a sum, a product or a function of it.
    fn deepen_term(&self, seed: &Expr, pos: usize, node: &Expr) -> Vec<Expr> {
        let mut shapes = self.add_term(
            &Expr::Add(vec![node.clone()]),
            0,
            std::slice::from_ref(node),
        );
        shapes.extend(self.widen_term(&Expr::Mul(vec![node.clone()]), 0));
        shapes.extend(self.grammar.functions().map(|op| Expr::unary(op, node.clone())));

        shapes
            .into_iter()
            .filter_map(|shape| {
                let mut child = seed.clone();
                child.replace_subtree(pos, shape).ok()?;
                Some(child)
            })
            .collect()
    }

    // ========================================================================
    // Basis extension
    // ========================================================================

    fn grow_basis(&self, terms: &[Expr]) -> Vec<Expr> {
        let mut out = Vec::new();

        for basis in &self.bases {
            if terms.iter().any(|t| t.is_same(basis)) {
                continue;
            }
            let mut grown = terms.to_vec();
            grown.push(basis.clone());
            self.push_if_valid(&mut out, grown);
        }

        for basis in &self.bases {
            for (i, term) in terms.iter().enumerate() {
                if let Expr::Mul(factors) = term
                    && factors.len() > self.max_basis_factors
                {
                    continue;
                }
                let mut grown = terms.to_vec();
                grown[i] = Expr::Mul(vec![term.clone(), basis.clone()]);
                self.push_if_valid(&mut out, grown);
            }
        }
        out
    }

    /// Nest basis terms inside `c*f(arg)` terms: `f(arg + b)` and `f(arg * b)`.
    ///
    /// A two-factor term whose second factor is not a nestable function gets
    /// the basis term added to that factor instead.
    fn nest_basis(&self, terms: &[Expr]) -> Vec<Expr> {
        let mut out = Vec::new();
        for (i, term) in terms.iter().enumerate() {
            let Expr::Mul(factors) = term else {
                continue;
            };
            if factors.len() != 2 || matches!(factors[1], Expr::Add(_)) {
                continue;
            }
            let nestable = matches!(&factors[1], Expr::Unary(op, _) if is_nestable(*op));
            let inside_trig = matches!(&factors[1], Expr::Unary(op, _) if is_trig(*op));

            for basis in &self.bases {
                if inside_trig && !self.allowed_in_trig(basis) {
                    continue;
                }
                let mut grown = terms.to_vec();
                if let Expr::Mul(fs) = &mut grown[i] {
                    let target = match &mut fs[1] {
                        Expr::Unary(op, arg) if is_nestable(*op) => arg.as_mut(),
                        other => other,
                    };
                    let inner = std::mem::replace(target, Expr::coeff());
                    *target = Expr::Add(vec![inner, basis.clone()]);
                }
                self.push_if_valid(&mut out, grown);

                if !nestable {
                    continue;
                }
                let mut grown = terms.to_vec();
                if let Expr::Mul(fs) = &mut grown[i]
                    && let Expr::Unary(_, arg) = &mut fs[1]
                {
                    let inner = std::mem::replace(arg.as_mut(), Expr::coeff());
                    **arg = Expr::Mul(vec![inner, basis.clone()]);
                }
                self.push_if_valid(&mut out, grown);
            }
        }
        out
    }

    /// Function bases nested under a trig function must be non-trig.
    fn allowed_in_trig(&self, basis: &Expr) -> bool {
        match basis {
            Expr::Mul(factors) => factors.iter().all(|f| match f {
                Expr::Unary(op, _) => self.grammar.non_trig().contains(&op.kind()),
                _ => true,
            }),
            _ => true,
        }
    }

    fn push_if_valid(&self, out: &mut Vec<Expr>, terms: Vec<Expr>) {
        let mut sum = Expr::Add(terms);
        sum.sort();
        if self.grammar.is_valid(&sum) {
            out.push(sum);
        }
    }
}

fn is_nestable(op: UnaryOp) -> bool {
    !matches!(op, UnaryOp::Neg | UnaryOp::Abs)
}

fn is_trig(op: UnaryOp) -> bool {
    matches!(op, UnaryOp::Sin | UnaryOp::Cos | UnaryOp::Tan)
}

/// Terms of a top-level sum; any other expression is a single term.
fn top_terms(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::Add(terms) => terms.clone(),
        other => vec![other.clone()],
    }
}

/// `c`, `c*x`, `c*x^±p` for `p` in `2..=4`, and `c*f(c*x)` per usable
/// variable and grammar function.
pub fn basis_library(grammar: &Grammar) -> Vec<Expr> {
    let vars = grammar.vars();
    let mut bases = vec![Expr::coeff()];
    bases.extend(vars.iter().map(|&v| Expr::scaled(Expr::var(v))));
    for p in 2..=MAX_BASIS_POWER {
        for &v in vars {
            bases.push(Expr::scaled(Expr::powi(Expr::var(v), p)));
            bases.push(Expr::scaled(Expr::powi(Expr::var(v), -p)));
        }
    }
    for op in grammar.functions() {
        for &v in vars {
            bases.push(Expr::scaled(Expr::unary(op, Expr::scaled(Expr::var(v)))));
        }
    }
    bases
}
