//! Rule-based simplification.

use super::{Expr, ExprError, ExprKind, UnaryOp};
use crate::schema::SimpRules;

impl Expr {
    /// Simplify under `rules` and return the result in canonical order.
    ///
    /// Fails on malformed trees (empty sums or products, division by a zero
    /// literal). The input is never modified.
    pub fn simplify(&self, rules: &SimpRules) -> Result<Expr, ExprError> {
        let mut out = simplify_node(self, rules)?;
        out.sort();
        Ok(out)
    }
}

fn simplify_node(expr: &Expr, rules: &SimpRules) -> Result<Expr, ExprError> {
    match expr {
        Expr::Unary(op, child) => simplify_unary(*op, simplify_node(child, rules)?, rules),
        Expr::PowI(base, power) => Ok(simplify_pow(simplify_node(base, rules)?, *power, rules)),
        Expr::Div(numer, denom) => {
            simplify_div(simplify_node(numer, rules)?, simplify_node(denom, rules)?, rules)
        }
        Expr::Add(terms) => simplify_add(simplify_all(terms, rules)?, rules),
        Expr::Mul(factors) => simplify_mul(simplify_all(factors, rules)?, rules),
        leaf => Ok(leaf.clone()),
    }
}

fn simplify_all(children: &[Expr], rules: &SimpRules) -> Result<Vec<Expr>, ExprError> {
    children.iter().map(|c| simplify_node(c, rules)).collect()
}

/// The constant one under the active rules.
fn one(rules: &SimpRules) -> Expr {
    if rules.convert_consts {
        Expr::coeff()
    } else {
        Expr::Literal(1.0)
    }
}

fn simplify_unary(op: UnaryOp, child: Expr, rules: &SimpRules) -> Result<Expr, ExprError> {
    if rules.convert_consts && child.is_numeric() {
        return Ok(Expr::coeff());
    }
    let out = match (op, child) {
        (UnaryOp::Neg, Expr::Unary(UnaryOp::Neg, inner)) => *inner,
        (UnaryOp::Abs, Expr::Unary(UnaryOp::Abs, inner)) => Expr::Unary(UnaryOp::Abs, inner),
        (op, child) => Expr::unary(op, child),
    };
    Ok(out)
}

fn simplify_pow(base: Expr, power: i32, rules: &SimpRules) -> Expr {
    match power {
        0 => return one(rules),
        1 => return base,
        _ => {}
    }
    if rules.convert_consts && base.is_numeric() {
        return Expr::coeff();
    }
    match base {
        Expr::PowI(inner, p) if rules.collapse_powers => simplify_pow(*inner, p * power, rules),
        base => Expr::powi(base, power),
    }
}

fn simplify_div(numer: Expr, denom: Expr, rules: &SimpRules) -> Result<Expr, ExprError> {
    if let Expr::Literal(v) = denom
        && v == 0.0
    {
        return Err(ExprError::DivisionByZero);
    }
    if rules.convert_consts && numer.is_numeric() && denom.is_numeric() {
        return Ok(Expr::coeff());
    }
    if rules.collapse_powers && !numer.is_numeric() && numer.is_same(&denom) {
        return Ok(one(rules));
    }
    Ok(Expr::div(numer, denom))
}

fn simplify_add(terms: Vec<Expr>, rules: &SimpRules) -> Result<Expr, ExprError> {
    let mut flat = Vec::with_capacity(terms.len());
    for term in terms {
        match term {
            Expr::Add(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }

    if rules.convert_consts {
        let before = flat.len();
        flat.retain(|t| !t.is_numeric());
        if flat.len() != before {
            flat.push(Expr::coeff());
        }
    }

    if rules.group_add_terms {
        let mut kept: Vec<Expr> = Vec::with_capacity(flat.len());
        for term in flat {
            let redundant = is_scaled(&term)
                && kept
                    .iter()
                    .any(|k| is_scaled(k) && k.is_almost_same(&term));
            if !redundant {
                kept.push(term);
            }
        }
        flat = kept;
    }

    match flat.len() {
        0 => Err(ExprError::EmptyNode(ExprKind::Add)),
        1 => Ok(flat.remove(0)),
        _ => Ok(Expr::Add(flat)),
    }
}

/// Terms carrying their own numeric factor.
fn is_scaled(term: &Expr) -> bool {
    match term {
        Expr::Mul(factors) => factors.iter().any(Expr::is_numeric),
        Expr::Div(numer, _) => numer.is_numeric(),
        other => other.is_numeric(),
    }
}

fn simplify_mul(factors: Vec<Expr>, rules: &SimpRules) -> Result<Expr, ExprError> {
    if factors.is_empty() {
        return Err(ExprError::EmptyNode(ExprKind::Mul));
    }

    let mut flat = Vec::with_capacity(factors.len());
    for factor in factors {
        match factor {
            Expr::Mul(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }

    let mut numeric = Vec::new();
    if rules.convert_consts {
        let before = flat.len();
        flat.retain(|f| !f.is_numeric());
        if flat.len() != before {
            numeric.push(Expr::coeff());
        }
    }

    if rules.collapse_powers {
        // (base, accumulated exponent) in order of first appearance
        let mut powers: Vec<(Expr, i32)> = Vec::with_capacity(flat.len());
        for factor in flat {
            let (base, exp) = match factor {
                Expr::PowI(base, p) => (*base, p),
                other => (other, 1),
            };
            if base.is_numeric() {
                numeric.push(if exp == 1 { base } else { Expr::powi(base, exp) });
                continue;
            }
            match powers.iter_mut().find(|(b, _)| b.is_same(&base)) {
                Some((_, acc)) => *acc += exp,
                None => powers.push((base, exp)),
            }
        }
        flat = powers
            .into_iter()
            .filter(|(_, exp)| *exp != 0)
            .map(|(base, exp)| if exp == 1 { base } else { Expr::powi(base, exp) })
            .collect();
    }

    let mut out = numeric;
    out.extend(flat);
    match out.len() {
        0 => Ok(one(rules)),
        1 => Ok(out.remove(0)),
        _ => Ok(Expr::Mul(out)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cx(i: usize) -> Expr {
        Expr::scaled(Expr::var(i))
    }

    #[test]
    fn test_flattens_and_sorts() {
        let e = Expr::Add(vec![Expr::Add(vec![cx(1)]), cx(0)]);
        let s = e.simplify(&SimpRules::default()).unwrap();
        assert_eq!(s, Expr::Add(vec![cx(0), cx(1)]));
    }

    #[test]
    fn test_single_term_sum_collapses() {
        let e = Expr::Add(vec![cx(0)]);
        assert_eq!(e.simplify(&SimpRules::default()).unwrap(), cx(0));
    }

    #[test]
    fn test_merges_numeric_factors() {
        let e = Expr::Mul(vec![Expr::coeff(), Expr::var(0), Expr::Literal(2.0)]);
        assert_eq!(e.simplify(&SimpRules::default()).unwrap(), cx(0));
    }

    #[test]
    fn test_repeated_factors_become_power() {
        let e = Expr::Mul(vec![Expr::coeff(), Expr::var(0), Expr::var(0)]);
        let s = e.simplify(&SimpRules::default()).unwrap();
        assert_eq!(s, Expr::Mul(vec![Expr::coeff(), Expr::powi(Expr::var(0), 2)]));
    }

    #[test]
    fn test_unit_power_of_coefficient_is_bare() {
        let rules = SimpRules {
            convert_consts: false,
            ..SimpRules::default()
        };
        let s = cx(0).simplify(&rules).unwrap();
        assert_eq!(s, cx(0));
        assert_eq!(s.size(), cx(0).size());
    }

    #[test]
    fn test_cancelling_powers_leave_coefficient() {
        let e = Expr::Mul(vec![Expr::coeff(), Expr::var(0), Expr::powi(Expr::var(0), -1)]);
        assert_eq!(e.simplify(&SimpRules::default()).unwrap(), Expr::coeff());
    }

    #[test]
    fn test_nested_power_collapses() {
        let e = Expr::powi(Expr::powi(Expr::var(0), 2), 3);
        assert_eq!(
            e.simplify(&SimpRules::default()).unwrap(),
            Expr::powi(Expr::var(0), 6)
        );
    }

    #[test]
    fn test_function_of_constant_folds() {
        let e = Expr::Add(vec![cx(0), Expr::unary(UnaryOp::Sin, Expr::coeff())]);
        let s = e.simplify(&SimpRules::default()).unwrap();
        assert_eq!(s, Expr::Add(vec![Expr::coeff(), cx(0)]));
    }

    #[test]
    fn test_double_negation() {
        let e = Expr::unary(UnaryOp::Neg, Expr::unary(UnaryOp::Neg, Expr::var(0)));
        assert_eq!(e.simplify(&SimpRules::default()).unwrap(), Expr::var(0));
    }

    #[test]
    fn test_group_add_terms_drops_rescaled_duplicate() {
        let e = Expr::Add(vec![
            cx(0),
            Expr::Mul(vec![Expr::Literal(3.0), Expr::var(0)]),
            cx(1),
        ]);
        let s = e.simplify(&SimpRules::default()).unwrap();
        assert_eq!(s, Expr::Add(vec![cx(0), cx(1)]));

        let keep_all = SimpRules {
            group_add_terms: false,
            ..SimpRules::default()
        };
        let s = e.simplify(&keep_all).unwrap();
        assert!(matches!(s, Expr::Add(ref terms) if terms.len() == 3));
    }

    #[test]
    fn test_malformed_trees_fail() {
        let rules = SimpRules::default();
        assert_eq!(
            Expr::Add(vec![]).simplify(&rules),
            Err(ExprError::EmptyNode(ExprKind::Add))
        );
        assert_eq!(
            Expr::Mul(vec![]).simplify(&rules),
            Err(ExprError::EmptyNode(ExprKind::Mul))
        );
        assert_eq!(
            Expr::div(Expr::var(0), Expr::Literal(0.0)).simplify(&rules),
            Err(ExprError::DivisionByZero)
        );
    }

    #[test]
    fn test_input_untouched() {
        let e = Expr::Add(vec![Expr::Add(vec![cx(1)]), cx(0)]);
        let before = e.clone();
        let _ = e.simplify(&SimpRules::default());
        assert_eq!(e, before);
    }
}
