//! Expression trees manipulated by the search.
//!
//! The search never interprets the mathematics of a candidate beyond the
//! capabilities exposed here: deep cloning, canonical ordering, simplification,
//! size/height accounting, serialization into dedup tokens, preorder subtree
//! access and numeric evaluation.
//!
//! Free coefficients are represented by [`Expr::Coeff`] placeholders. A
//! placeholder is indexed into the coefficient vector once the tree has been
//! prepared for fitting (see [`Expr::convert_to_coefficients`]).
//!
//! Simplification rules are configured through [`crate::schema::SimpRules`].

mod simplify;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Node discriminant.
///
/// The declaration order is the canonical order used by
/// [`Expr::cmp_structure`]; coefficients therefore sort first inside products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExprKind {
    Coeff,
    Literal,
    Time,
    System,
    Var,
    Neg,
    Abs,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    PowI,
    Div,
    Mul,
    Add,
}

impl ExprKind {
    /// Token emitted into serial keys.
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Leaf kinds that may appear in a grammar's leaf set.
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            Self::Coeff | Self::Literal | Self::Time | Self::System | Self::Var
        )
    }

    /// Single-argument function kinds.
    pub fn is_unary(self) -> bool {
        UnaryOp::from_kind(self).is_some()
    }

    /// Name used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Coeff => "constant",
            Self::Literal => "constantf",
            Self::Time => "time",
            Self::System => "system",
            Self::Var => "var",
            Self::Neg => "neg",
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::PowI => "powi",
            Self::Div => "div",
            Self::Mul => "mul",
            Self::Add => "add",
        }
    }
}

impl fmt::Display for ExprKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExprKind {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "constant" | "coeff" => Self::Coeff,
            "constantf" | "literal" => Self::Literal,
            "time" => Self::Time,
            "system" => Self::System,
            "var" => Self::Var,
            "neg" => Self::Neg,
            "abs" => Self::Abs,
            "sqrt" => Self::Sqrt,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "powi" => Self::PowI,
            "div" => Self::Div,
            "mul" => Self::Mul,
            "add" => Self::Add,
            _ => return Err(ExprError::UnknownKind(s.to_string())),
        };
        Ok(kind)
    }
}

/// Single-argument functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
}

impl UnaryOp {
    pub fn from_kind(kind: ExprKind) -> Option<Self> {
        match kind {
            ExprKind::Neg => Some(Self::Neg),
            ExprKind::Abs => Some(Self::Abs),
            ExprKind::Sqrt => Some(Self::Sqrt),
            ExprKind::Sin => Some(Self::Sin),
            ExprKind::Cos => Some(Self::Cos),
            ExprKind::Tan => Some(Self::Tan),
            ExprKind::Exp => Some(Self::Exp),
            ExprKind::Log => Some(Self::Log),
            _ => None,
        }
    }

    pub fn kind(self) -> ExprKind {
        match self {
            Self::Neg => ExprKind::Neg,
            Self::Abs => ExprKind::Abs,
            Self::Sqrt => ExprKind::Sqrt,
            Self::Sin => ExprKind::Sin,
            Self::Cos => ExprKind::Cos,
            Self::Tan => ExprKind::Tan,
            Self::Exp => ExprKind::Exp,
            Self::Log => ExprKind::Log,
        }
    }

    #[inline]
    pub fn apply(self, v: f64) -> f64 {
        match self {
            Self::Neg => -v,
            Self::Abs => v.abs(),
            Self::Sqrt => v.sqrt(),
            Self::Sin => v.sin(),
            Self::Cos => v.cos(),
            Self::Tan => v.tan(),
            Self::Exp => v.exp(),
            Self::Log => v.ln(),
        }
    }
}

/// Errors raised while manipulating expression trees.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("Empty {0} node")]
    EmptyNode(ExprKind),
    #[error("Division by a zero literal")]
    DivisionByZero,
    #[error("Subtree position {0} is out of range")]
    PositionOutOfRange(usize),
    #[error("Unknown expression kind: {0}")]
    UnknownKind(String),
}

/// A symbolic expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Free coefficient, indexed into the fitted coefficient vector.
    Coeff(Option<usize>),
    /// Numeric literal.
    Literal(f64),
    /// Time (first independent column of differential-equation problems).
    Time,
    /// Independent variable by index.
    Var(usize),
    /// Per-dataset system value by index.
    System(usize),
    Unary(UnaryOp, Box<Expr>),
    PowI(Box<Expr>, i32),
    Div(Box<Expr>, Box<Expr>),
    Mul(Vec<Expr>),
    Add(Vec<Expr>),
}

impl Expr {
    /// Unindexed coefficient placeholder.
    pub fn coeff() -> Self {
        Self::Coeff(None)
    }

    pub fn var(index: usize) -> Self {
        Self::Var(index)
    }

    pub fn unary(op: UnaryOp, child: Expr) -> Self {
        Self::Unary(op, Box::new(child))
    }

    pub fn powi(base: Expr, power: i32) -> Self {
        Self::PowI(Box::new(base), power)
    }

    pub fn div(numer: Expr, denom: Expr) -> Self {
        Self::Div(Box::new(numer), Box::new(denom))
    }

    /// `c * term`
    pub fn scaled(term: Expr) -> Self {
        Self::Mul(vec![Self::coeff(), term])
    }

    pub fn kind(&self) -> ExprKind {
        match self {
            Self::Coeff(_) => ExprKind::Coeff,
            Self::Literal(_) => ExprKind::Literal,
            Self::Time => ExprKind::Time,
            Self::Var(_) => ExprKind::Var,
            Self::System(_) => ExprKind::System,
            Self::Unary(op, _) => op.kind(),
            Self::PowI(..) => ExprKind::PowI,
            Self::Div(..) => ExprKind::Div,
            Self::Mul(_) => ExprKind::Mul,
            Self::Add(_) => ExprKind::Add,
        }
    }

    /// Coefficient or literal.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Coeff(_) | Self::Literal(_))
    }

    /// Direct children, in preorder.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Unary(_, c) | Self::PowI(c, _) => vec![c.as_ref()],
            Self::Div(n, d) => vec![n.as_ref(), d.as_ref()],
            Self::Mul(cs) | Self::Add(cs) => cs.iter().collect(),
            _ => Vec::new(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Self::Unary(_, c) | Self::PowI(c, _) => vec![c.as_mut()],
            Self::Div(n, d) => vec![n.as_mut(), d.as_mut()],
            Self::Mul(cs) | Self::Add(cs) => cs.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    /// Rebuild this node with every child replaced by `f(child)`.
    fn map_children(&self, mut f: impl FnMut(&Expr) -> Expr) -> Expr {
        match self {
            Self::Unary(op, c) => Self::Unary(*op, Box::new(f(c))),
            Self::PowI(b, p) => Self::PowI(Box::new(f(b)), *p),
            Self::Div(n, d) => {
                let numer = f(n);
                let denom = f(d);
                Self::div(numer, denom)
            }
            Self::Mul(cs) => Self::Mul(cs.iter().map(&mut f).collect()),
            Self::Add(cs) => Self::Add(cs.iter().map(&mut f).collect()),
            leaf => leaf.clone(),
        }
    }

    /// Structural size. Coefficient placeholders are free, so `c*x` has size
    /// 2 and a lone coefficient still counts as 1.
    pub fn size(&self) -> usize {
        self.structural_size().max(1)
    }

    fn structural_size(&self) -> usize {
        match self {
            Self::Coeff(_) => 0,
            Self::Literal(_) | Self::Time | Self::Var(_) | Self::System(_) => 1,
            other => 1 + other.children().iter().map(|c| c.structural_size()).sum::<usize>(),
        }
    }

    /// Height of the tree; a leaf has height 1.
    pub fn height(&self) -> usize {
        1 + self
            .children()
            .iter()
            .map(|c| c.height())
            .max()
            .unwrap_or(0)
    }

    /// Total node count including coefficients (the range of preorder positions).
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(|c| c.node_count()).sum::<usize>()
    }

    pub fn coefficient_count(&self) -> usize {
        match self {
            Self::Coeff(_) => 1,
            other => other.children().iter().map(|c| c.coefficient_count()).sum(),
        }
    }

    /// Append the dedup key of this tree to `out`.
    ///
    /// Tokens are emitted in preorder; n-ary nodes also emit their arity so
    /// distinct trees never share a key. Coefficient values are not part of
    /// the key.
    pub fn serial(&self, out: &mut Vec<i32>) {
        out.push(self.kind().code());
        match self {
            Self::Var(i) | Self::System(i) => out.push(*i as i32),
            Self::Unary(_, c) => c.serial(out),
            Self::PowI(b, p) => {
                out.push(*p);
                b.serial(out);
            }
            Self::Div(n, d) => {
                n.serial(out);
                d.serial(out);
            }
            Self::Mul(cs) | Self::Add(cs) => {
                out.push(cs.len() as i32);
                for c in cs {
                    c.serial(out);
                }
            }
            _ => {}
        }
    }

    pub fn to_serial(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(64);
        self.serial(&mut out);
        out
    }

    /// Canonical total order over trees.
    ///
    /// Coefficient indices are ignored; literals compare by value.
    pub fn cmp_structure(&self, other: &Expr) -> Ordering {
        let by_kind = self.kind().cmp(&other.kind());
        if by_kind != Ordering::Equal {
            return by_kind;
        }
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a.total_cmp(b),
            (Self::Var(a), Self::Var(b)) | (Self::System(a), Self::System(b)) => a.cmp(b),
            (Self::Unary(_, a), Self::Unary(_, b)) => a.cmp_structure(b),
            (Self::PowI(a, p), Self::PowI(b, q)) => p.cmp(q).then_with(|| a.cmp_structure(b)),
            (Self::Div(an, ad), Self::Div(bn, bd)) => {
                an.cmp_structure(bn).then_with(|| ad.cmp_structure(bd))
            }
            (Self::Mul(a), Self::Mul(b)) | (Self::Add(a), Self::Add(b)) => cmp_terms(a, b),
            _ => Ordering::Equal,
        }
    }

    /// Structural equality (coefficient indices ignored).
    pub fn is_same(&self, other: &Expr) -> bool {
        self.cmp_structure(other) == Ordering::Equal
    }

    /// Structural equality where any two numeric leaves match.
    pub fn is_almost_same(&self, other: &Expr) -> bool {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (Self::Time, Self::Time) => true,
            (Self::Var(a), Self::Var(b)) | (Self::System(a), Self::System(b)) => a == b,
            (Self::Unary(a, x), Self::Unary(b, y)) => a == b && x.is_almost_same(y),
            (Self::PowI(x, p), Self::PowI(y, q)) => p == q && x.is_almost_same(y),
            (Self::Div(an, ad), Self::Div(bn, bd)) => an.is_almost_same(bn) && ad.is_almost_same(bd),
            (Self::Mul(a), Self::Mul(b)) | (Self::Add(a), Self::Add(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_almost_same(y))
            }
            _ => false,
        }
    }

    /// Sort the children of every sum and product into canonical order.
    pub fn sort(&mut self) {
        for child in self.children_mut() {
            child.sort();
        }
        if let Self::Mul(cs) | Self::Add(cs) = self {
            cs.sort_by(|a, b| a.cmp_structure(b));
        }
    }

    /// Subtree at a preorder position (the root is position 0).
    pub fn subtree(&self, pos: usize) -> Option<&Expr> {
        let mut remaining = pos;
        self.find(&mut remaining)
    }

    pub fn subtree_mut(&mut self, pos: usize) -> Option<&mut Expr> {
        let mut remaining = pos;
        self.find_mut(&mut remaining)
    }

    /// Replace the subtree at `pos`, returning the previous one.
    pub fn replace_subtree(&mut self, pos: usize, expr: Expr) -> Result<Expr, ExprError> {
        let slot = self
            .subtree_mut(pos)
            .ok_or(ExprError::PositionOutOfRange(pos))?;
        Ok(std::mem::replace(slot, expr))
    }

    fn find(&self, remaining: &mut usize) -> Option<&Expr> {
        if *remaining == 0 {
            return Some(self);
        }
        *remaining -= 1;
        for child in self.children() {
            if let Some(found) = child.find(remaining) {
                return Some(found);
            }
        }
        None
    }

    fn find_mut(&mut self, remaining: &mut usize) -> Option<&mut Expr> {
        if *remaining == 0 {
            return Some(self);
        }
        *remaining -= 1;
        for child in self.children_mut() {
            if let Some(found) = child.find_mut(remaining) {
                return Some(found);
            }
        }
        None
    }

    /// Evaluate at one point.
    ///
    /// Missing coefficients or variables evaluate to NaN rather than panicking.
    pub fn evaluate(&self, t: f64, x: &[f64], coeff: &[f64], sys: &[f64]) -> f64 {
        match self {
            Self::Coeff(Some(i)) => coeff.get(*i).copied().unwrap_or(f64::NAN),
            Self::Coeff(None) => f64::NAN,
            Self::Literal(v) => *v,
            Self::Time => t,
            Self::Var(i) => x.get(*i).copied().unwrap_or(f64::NAN),
            Self::System(i) => sys.get(*i).copied().unwrap_or(f64::NAN),
            Self::Unary(op, c) => op.apply(c.evaluate(t, x, coeff, sys)),
            Self::PowI(b, p) => b.evaluate(t, x, coeff, sys).powi(*p),
            Self::Div(n, d) => n.evaluate(t, x, coeff, sys) / d.evaluate(t, x, coeff, sys),
            Self::Mul(cs) => cs.iter().map(|c| c.evaluate(t, x, coeff, sys)).product(),
            Self::Add(cs) => cs.iter().map(|c| c.evaluate(t, x, coeff, sys)).sum(),
        }
    }

    /// Turn every numeric leaf into an indexed coefficient.
    ///
    /// Literal values become the initial guess for their coefficient;
    /// placeholders start at 1.0. Indices follow preorder.
    pub fn convert_to_coefficients(&self, guess: &mut Vec<f64>) -> Expr {
        match self {
            Self::Literal(v) => {
                guess.push(*v);
                Self::Coeff(Some(guess.len() - 1))
            }
            Self::Coeff(_) => {
                guess.push(1.0);
                Self::Coeff(Some(guess.len() - 1))
            }
            other => other.map_children(|c| c.convert_to_coefficients(guess)),
        }
    }

    /// Renumber coefficient placeholders in preorder, returning the count.
    pub fn index_coefficients(&mut self) -> usize {
        let mut next = 0;
        self.index_from(&mut next);
        next
    }

    fn index_from(&mut self, next: &mut usize) {
        if let Self::Coeff(idx) = self {
            *idx = Some(*next);
            *next += 1;
            return;
        }
        for child in self.children_mut() {
            child.index_from(next);
        }
    }

    /// Render with variable names and fitted coefficient values substituted.
    pub fn pretty(&self, names: &[String], coeff: &[f64]) -> String {
        let mut out = String::new();
        let ctx = PrintContext {
            names: Some(names),
            coeff: Some(coeff),
        };
        // Writing into a String cannot fail.
        let _ = self.write_to(&mut out, &ctx);
        out
    }

    fn write_to<W: fmt::Write>(&self, w: &mut W, ctx: &PrintContext<'_>) -> fmt::Result {
        match self {
            Self::Coeff(Some(i)) => match ctx.coeff.and_then(|c| c.get(*i)) {
                Some(v) => write!(w, "{v:.6}"),
                None => write!(w, "c{i}"),
            },
            Self::Coeff(None) => w.write_str("c"),
            Self::Literal(v) => write!(w, "{v}"),
            Self::Time => w.write_str("t"),
            Self::Var(i) => match ctx.names.and_then(|n| n.get(*i)) {
                Some(name) => w.write_str(name),
                None => write!(w, "x{i}"),
            },
            Self::System(i) => write!(w, "s{i}"),
            Self::Unary(UnaryOp::Neg, c) => {
                w.write_str("-")?;
                c.write_grouped(w, ctx)
            }
            Self::Unary(op, c) => {
                write!(w, "{}(", op.kind().name())?;
                c.write_to(w, ctx)?;
                w.write_str(")")
            }
            Self::PowI(b, p) => {
                b.write_grouped(w, ctx)?;
                write!(w, "^{p}")
            }
            Self::Div(n, d) => {
                n.write_grouped(w, ctx)?;
                w.write_str("/")?;
                d.write_grouped(w, ctx)
            }
            Self::Mul(cs) => {
                for (i, c) in cs.iter().enumerate() {
                    if i > 0 {
                        w.write_str("*")?;
                    }
                    c.write_grouped(w, ctx)?;
                }
                Ok(())
            }
            Self::Add(cs) => {
                for (i, c) in cs.iter().enumerate() {
                    if i > 0 {
                        w.write_str(" + ")?;
                    }
                    c.write_to(w, ctx)?;
                }
                Ok(())
            }
        }
    }

    /// Parenthesize anything that is not a leaf or function call.
    fn write_grouped<W: fmt::Write>(&self, w: &mut W, ctx: &PrintContext<'_>) -> fmt::Result {
        match self {
            Self::Add(_) | Self::Mul(_) | Self::Div(..) | Self::PowI(..) => {
                w.write_str("(")?;
                self.write_to(w, ctx)?;
                w.write_str(")")
            }
            _ => self.write_to(w, ctx),
        }
    }
}

fn cmp_terms(a: &[Expr], b: &[Expr]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.cmp_structure(y))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    })
}

#[derive(Default)]
struct PrintContext<'a> {
    names: Option<&'a [String]>,
    coeff: Option<&'a [f64]>,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f, &PrintContext::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cx(i: usize) -> Expr {
        Expr::scaled(Expr::var(i))
    }

    #[test]
    fn test_size_ignores_coefficients() {
        assert_eq!(cx(0).size(), 2);
        assert_eq!(Expr::coeff().size(), 1);
        let sum = Expr::Add(vec![cx(0), cx(1)]);
        assert_eq!(sum.size(), 5);
        assert_eq!(sum.height(), 3);
        assert_eq!(sum.node_count(), 7);
    }

    #[test]
    fn test_serial_distinguishes_arity() {
        let a = Expr::Add(vec![Expr::Mul(vec![Expr::var(0), Expr::var(1)]), Expr::var(2)]);
        let b = Expr::Add(vec![Expr::Mul(vec![Expr::var(0), Expr::var(1), Expr::var(2)])]);
        assert_ne!(a.to_serial(), b.to_serial());
    }

    #[test]
    fn test_serial_ignores_coefficient_values() {
        let a = Expr::Mul(vec![Expr::Coeff(Some(0)), Expr::var(0)]);
        let b = Expr::Mul(vec![Expr::Coeff(Some(3)), Expr::var(0)]);
        assert_eq!(a.to_serial(), b.to_serial());
        assert!(a.is_same(&b));
    }

    #[test]
    fn test_sort_puts_coefficient_first() {
        let mut e = Expr::Mul(vec![Expr::var(1), Expr::coeff(), Expr::var(0)]);
        e.sort();
        assert_eq!(e, Expr::Mul(vec![Expr::coeff(), Expr::var(0), Expr::var(1)]));
    }

    #[test]
    fn test_subtree_preorder() {
        let e = Expr::Add(vec![cx(0), cx(1)]);
        assert_eq!(e.subtree(0).map(Expr::kind), Some(ExprKind::Add));
        assert_eq!(e.subtree(1).map(Expr::kind), Some(ExprKind::Mul));
        assert_eq!(e.subtree(3), Some(&Expr::var(0)));
        assert_eq!(e.subtree(6), Some(&Expr::var(1)));
        assert!(e.subtree(7).is_none());
    }

    #[test]
    fn test_replace_subtree() {
        let mut e = Expr::Add(vec![cx(0)]);
        let old = e.replace_subtree(3, Expr::var(5)).unwrap();
        assert_eq!(old, Expr::var(0));
        assert_eq!(e, Expr::Add(vec![cx(5)]));
        assert_eq!(
            e.replace_subtree(10, Expr::Time),
            Err(ExprError::PositionOutOfRange(10))
        );
    }

    #[test]
    fn test_evaluate_and_convert() {
        let e = Expr::Add(vec![
            Expr::Mul(vec![Expr::Literal(2.0), Expr::var(0)]),
            Expr::coeff(),
        ]);
        let mut guess = Vec::new();
        let eqn = e.convert_to_coefficients(&mut guess);
        assert_eq!(guess, vec![2.0, 1.0]);
        assert_eq!(eqn.coefficient_count(), 2);
        let y = eqn.evaluate(0.0, &[3.0], &[2.0, 0.5], &[]);
        assert!((y - 6.5).abs() < 1e-12);
        assert!(Expr::coeff().evaluate(0.0, &[], &[], &[]).is_nan());
    }

    #[test]
    fn test_almost_same_matches_numeric_leaves() {
        let a = Expr::Mul(vec![Expr::Literal(3.0), Expr::var(0)]);
        let b = cx(0);
        assert!(a.is_almost_same(&b));
        assert!(!a.is_same(&b));
        assert!(!cx(0).is_almost_same(&cx(1)));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!("sin".parse::<ExprKind>(), Ok(ExprKind::Sin));
        assert_eq!("ADD".parse::<ExprKind>(), Ok(ExprKind::Add));
        assert!("frobnicate".parse::<ExprKind>().is_err());
    }

    #[test]
    fn test_pretty() {
        let mut e = Expr::Add(vec![cx(0), Expr::coeff()]);
        e.sort();
        e.index_coefficients();
        let names = vec!["v".to_string()];
        assert_eq!(e.pretty(&names, &[1.5, 2.0]), "1.500000 + 2.000000*v");
        assert_eq!(e.to_string(), "c0 + c1*x0");
    }

    fn arb_expr() -> impl Strategy<Value = Expr> {
        let leaf = prop_oneof![
            Just(Expr::coeff()),
            (0usize..3).prop_map(Expr::Var),
            Just(Expr::Time),
        ];
        leaf.prop_recursive(4, 24, 3, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4).prop_map(Expr::Add),
                prop::collection::vec(inner.clone(), 1..4).prop_map(Expr::Mul),
                inner.clone().prop_map(|e| Expr::unary(UnaryOp::Sin, e)),
                (inner.clone(), inner).prop_map(|(n, d)| Expr::div(n, d)),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_clone_is_isolated(e in arb_expr()) {
            let original = e.clone();
            let mut copy = e.clone();
            prop_assert!(original.is_same(&copy));
            let last = copy.node_count() - 1;
            copy.replace_subtree(last, Expr::System(9)).unwrap();
            prop_assert_eq!(&e, &original);
        }

        #[test]
        fn prop_sort_is_idempotent(e in arb_expr()) {
            let mut once = e.clone();
            once.sort();
            let mut twice = once.clone();
            twice.sort();
            prop_assert_eq!(once.to_serial(), twice.to_serial());
        }
    }
}
