//! Just enough filter-expression evaluation for the in-memory backend:
//! conjunctions of `=` and `begins_with` clauses in substitution form.

use anyhow::Context;
use value::{
    AttributeValue,
    Item,
};

use crate::requests::{
    ExpressionNames,
    ExpressionValues,
};

pub fn evaluate_filter(
    expression: &str,
    names: Option<&ExpressionNames>,
    values: Option<&ExpressionValues>,
    item: &Item,
) -> anyhow::Result<bool> {
    eval_conjunction(expression.trim(), names, values, item)
}

fn eval_conjunction(
    expr: &str,
    names: Option<&ExpressionNames>,
    values: Option<&ExpressionValues>,
    item: &Item,
) -> anyhow::Result<bool> {
    if let Some(inner) = strip_outer_parens(expr) {
        return eval_conjunction(inner.trim(), names, values, item);
    }
    let clauses = split_top_level_and(expr);
    if clauses.len() > 1 {
        for clause in clauses {
            if !eval_conjunction(clause.trim(), names, values, item)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    eval_clause(expr, names, values, item)
}

fn eval_clause(
    expr: &str,
    names: Option<&ExpressionNames>,
    values: Option<&ExpressionValues>,
    item: &Item,
) -> anyhow::Result<bool> {
    if let Some(args) = expr
        .strip_prefix("begins_with(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let (name_token, value_token) = args
            .split_once(',')
            .context("begins_with needs two arguments")?;
        let name = resolve_name(name_token.trim(), names)?;
        let value = resolve_value(value_token.trim(), values)?;
        let (Some(AttributeValue::S(actual)), AttributeValue::S(prefix)) =
            (item.get(&name), &value)
        else {
            return Ok(false);
        };
        return Ok(actual.starts_with(prefix.as_str()));
    }
    if let Some((lhs, rhs)) = expr.split_once('=') {
        let name = resolve_name(lhs.trim(), names)?;
        let value = resolve_value(rhs.trim(), values)?;
        return Ok(item.get(&name) == Some(&value));
    }
    anyhow::bail!("unsupported filter clause '{expr}'")
}

fn strip_outer_parens(expr: &str) -> Option<&str> {
    let rest = expr.strip_prefix('(')?;
    let mut depth = 1usize;
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return (i == rest.len() - 1).then(|| &rest[..i]);
                }
            },
            _ => {},
        }
    }
    None
}

fn split_top_level_and(expr: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let bytes = expr.as_bytes();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b' ' if depth == 0 && expr[i..].starts_with(" AND ") => {
                clauses.push(&expr[start..i]);
                i += " AND ".len();
                start = i;
                continue;
            },
            _ => {},
        }
        i += 1;
    }
    clauses.push(&expr[start..]);
    clauses
}

pub(crate) fn resolve_name(
    token: &str,
    names: Option<&ExpressionNames>,
) -> anyhow::Result<String> {
    if token.starts_with('#') {
        let names = names.context("expression names map missing")?;
        return names
            .get(token)
            .cloned()
            .with_context(|| format!("unresolved name placeholder '{token}'"));
    }
    Ok(token.to_owned())
}

pub(crate) fn resolve_value(
    token: &str,
    values: Option<&ExpressionValues>,
) -> anyhow::Result<AttributeValue> {
    anyhow::ensure!(
        token.starts_with(':'),
        "expected a value placeholder, got '{token}'"
    );
    let values = values.context("expression values map missing")?;
    values
        .get(token)
        .cloned()
        .with_context(|| format!("unresolved value placeholder '{token}'"))
}

pub(crate) fn apply_update_expression(
    item: &mut Item,
    expression: &str,
    names: Option<&ExpressionNames>,
    values: Option<&ExpressionValues>,
) -> anyhow::Result<()> {
    let assignments = expression
        .trim()
        .strip_prefix("SET ")
        .context("test backend only supports SET update expressions")?;
    for assignment in assignments.split(',') {
        let (lhs, rhs) = assignment
            .split_once('=')
            .with_context(|| format!("malformed assignment '{assignment}'"))?;
        let name = resolve_name(lhs.trim(), names)?;
        let value = resolve_value(rhs.trim(), values)?;
        item.insert(name, value);
    }
    Ok(())
}
