use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, FunctionArgumentClause, FunctionArguments,
    Ident, OrderByExpr, Query, Value, WindowFrameBound, WindowType,
};

use crate::error::ValidationError;

/// A direct child of an expression node.
#[derive(Debug, Clone, Copy)]
pub enum Child<'a> {
    /// A nested scalar expression, evaluated in the same scope.
    Expr(&'a Expr),
    /// A subquery, evaluated in a new scope whose parent is the current one.
    Query(&'a Query),
}

/// Enumerate the direct children of `expr`.
///
/// This is the closed list of expression kinds the validator understands. Any
/// other kind is an opaque sub-node and fails with
/// [`ValidationError::UnsupportedConstruct`] instead of being skipped.
pub fn children(expr: &Expr) -> Result<Vec<Child<'_>>, ValidationError> {
    let mut out = Vec::new();
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) | Expr::Value(_) => {}
        Expr::TypedString { .. } => {}
        Expr::BinaryOp { left, right, .. }
        | Expr::IsDistinctFrom(left, right)
        | Expr::IsNotDistinctFrom(left, right)
        | Expr::AnyOp { left, right, .. }
        | Expr::AllOp { left, right, .. } => {
            out.push(Child::Expr(left));
            out.push(Child::Expr(right));
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsNotTrue(expr)
        | Expr::IsFalse(expr)
        | Expr::IsNotFalse(expr)
        | Expr::IsUnknown(expr)
        | Expr::IsNotUnknown(expr)
        | Expr::Cast { expr, .. }
        | Expr::Extract { expr, .. }
        | Expr::Ceil { expr, .. }
        | Expr::Floor { expr, .. }
        | Expr::Collate { expr, .. } => out.push(Child::Expr(expr)),
        Expr::InList { expr, list, .. } => {
            out.push(Child::Expr(expr));
            out.extend(list.iter().map(Child::Expr));
        }
        Expr::InSubquery { expr, subquery, .. } => {
            out.push(Child::Expr(expr));
            out.push(Child::Query(subquery));
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            out.push(Child::Expr(expr));
            out.push(Child::Expr(low));
            out.push(Child::Expr(high));
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. }
        | Expr::RLike { expr, pattern, .. } => {
            out.push(Child::Expr(expr));
            out.push(Child::Expr(pattern));
        }
        Expr::AtTimeZone {
            timestamp,
            time_zone,
        } => {
            out.push(Child::Expr(timestamp));
            out.push(Child::Expr(time_zone));
        }
        Expr::Position { expr, r#in } => {
            out.push(Child::Expr(expr));
            out.push(Child::Expr(r#in));
        }
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            out.push(Child::Expr(expr));
            out.extend(substring_from.iter().map(|e| Child::Expr(e)));
            out.extend(substring_for.iter().map(|e| Child::Expr(e)));
        }
        Expr::Trim {
            expr,
            trim_what,
            trim_characters,
            ..
        } => {
            out.push(Child::Expr(expr));
            out.extend(trim_what.iter().map(|e| Child::Expr(e)));
            out.extend(trim_characters.iter().flatten().map(Child::Expr));
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            out.extend(operand.iter().map(|e| Child::Expr(e)));
            for when in conditions {
                out.push(Child::Expr(&when.condition));
                out.push(Child::Expr(&when.result));
            }
            out.extend(else_result.iter().map(|e| Child::Expr(e)));
        }
        Expr::Exists { subquery, .. } => out.push(Child::Query(subquery)),
        Expr::Subquery(subquery) => out.push(Child::Query(subquery)),
        Expr::Function(function) => function_children(function, &mut out)?,
        Expr::Interval(interval) => out.push(Child::Expr(&interval.value)),
        Expr::Tuple(items) => out.extend(items.iter().map(Child::Expr)),
        Expr::Array(array) => out.extend(array.elem.iter().map(Child::Expr)),
        other => return Err(ValidationError::unsupported(format!("expression `{other}`"))),
    }
    Ok(out)
}

fn function_children<'a>(
    function: &'a Function,
    out: &mut Vec<Child<'a>>,
) -> Result<(), ValidationError> {
    if !matches!(function.parameters, FunctionArguments::None) {
        return Err(ValidationError::unsupported(format!(
            "parameterized function `{}`",
            function.name
        )));
    }
    match &function.args {
        FunctionArguments::None => {}
        FunctionArguments::Subquery(subquery) => out.push(Child::Query(subquery)),
        FunctionArguments::List(list) => {
            for arg in &list.args {
                match function_arg_expr(arg) {
                    Some(expr) => out.push(Child::Expr(expr)),
                    None if is_bare_wildcard(arg) => {}
                    None => {
                        return Err(ValidationError::unsupported(format!(
                            "argument `{arg}` of `{}`",
                            function.name
                        )));
                    }
                }
            }
            for clause in &list.clauses {
                match clause {
                    FunctionArgumentClause::OrderBy(order_by) => {
                        push_order_by(order_by, out);
                    }
                    FunctionArgumentClause::Limit(limit) => out.push(Child::Expr(limit)),
                    FunctionArgumentClause::IgnoreOrRespectNulls(_) => {}
                    other => {
                        return Err(ValidationError::unsupported(format!(
                            "function clause `{other}`"
                        )));
                    }
                }
            }
        }
    }
    out.extend(function.filter.iter().map(|e| Child::Expr(e)));
    push_order_by(&function.within_group, out);
    match &function.over {
        None | Some(WindowType::NamedWindow(_)) => {}
        Some(WindowType::WindowSpec(spec)) => {
            out.extend(spec.partition_by.iter().map(Child::Expr));
            push_order_by(&spec.order_by, out);
            if let Some(frame) = &spec.window_frame {
                push_frame_bound(&frame.start_bound, out);
                if let Some(end) = &frame.end_bound {
                    push_frame_bound(end, out);
                }
            }
        }
    }
    Ok(())
}

fn push_order_by<'a>(order_by: &'a [OrderByExpr], out: &mut Vec<Child<'a>>) {
    out.extend(order_by.iter().map(|o| Child::Expr(&o.expr)));
}

fn push_frame_bound<'a>(bound: &'a WindowFrameBound, out: &mut Vec<Child<'a>>) {
    match bound {
        WindowFrameBound::Preceding(Some(expr)) | WindowFrameBound::Following(Some(expr)) => {
            out.push(Child::Expr(expr));
        }
        _ => {}
    }
}

/// Extract the expression payload from a SQL function argument.
pub fn function_arg_expr(arg: &FunctionArg) -> Option<&Expr> {
    match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
        | FunctionArg::Named {
            arg: FunctionArgExpr::Expr(expr),
            ..
        }
        | FunctionArg::ExprNamed {
            arg: FunctionArgExpr::Expr(expr),
            ..
        } => Some(expr),
        _ => None,
    }
}

/// `count(*)`-style argument. A qualified `t.*` argument is not bare: it would
/// hand every column of `t` to the function.
fn is_bare_wildcard(arg: &FunctionArg) -> bool {
    matches!(arg, FunctionArg::Unnamed(FunctionArgExpr::Wildcard))
}

/// Name a projection item gets when it has no alias, when that name is knowable.
///
/// Plain and qualified column references are named after their terminal
/// identifier; function calls after the function.
pub fn implicit_output_name(expr: &Expr) -> Option<&Ident> {
    match expr {
        Expr::Identifier(ident) => Some(ident),
        Expr::CompoundIdentifier(parts) => parts.last(),
        Expr::Function(function) => function.name.0.last().and_then(|part| part.as_ident()),
        Expr::Cast { expr, .. } | Expr::Nested(expr) => implicit_output_name(expr),
        _ => None,
    }
}

/// Parse a non-negative integer literal.
pub fn number_literal(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::Number(digits, _) => digits.parse().ok(),
            _ => None,
        },
        _ => None,
    }
}

/// An unsigned integer literal expression.
pub fn number_expr(n: u64) -> Expr {
    Expr::value(Value::Number(n.to_string(), false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn parse_expr(sql: &str) -> Expr {
        Parser::new(&PostgreSqlDialect {})
            .try_with_sql(sql)
            .unwrap()
            .parse_expr()
            .unwrap()
    }

    #[test]
    fn children_cover_predicates_and_subqueries() {
        let expr = parse_expr("e.id IN (SELECT employee_id FROM salary) AND e.name LIKE 'G%'");
        let kids = children(&expr).unwrap();
        assert_eq!(kids.len(), 2);

        let Child::Expr(in_subquery) = kids[0] else {
            panic!("expected expression child");
        };
        let nested = children(in_subquery).unwrap();
        assert!(matches!(nested[0], Child::Expr(_)));
        assert!(matches!(nested[1], Child::Query(_)));
    }

    #[test]
    fn window_and_filter_parts_are_children() {
        let expr = parse_expr(
            "count(e.id) FILTER (WHERE e.active) OVER (PARTITION BY e.dept ORDER BY e.hired)",
        );
        assert_eq!(children(&expr).unwrap().len(), 4);
    }

    #[test]
    fn qualified_wildcard_arguments_are_unsupported() {
        let expr = parse_expr("row_to_json(e.*)");
        assert!(matches!(
            children(&expr),
            Err(ValidationError::UnsupportedConstruct(_))
        ));
        assert!(children(&parse_expr("count(*)")).unwrap().is_empty());
    }

    #[test]
    fn unknown_expression_kinds_fail_closed() {
        let expr = parse_expr("ARRAY[1, 2][1]");
        assert!(matches!(
            children(&expr),
            Err(ValidationError::UnsupportedConstruct(_))
        ));
    }

    #[test]
    fn output_names_follow_terminal_identifier() {
        let qualified = parse_expr("e.first_name");
        assert_eq!(
            implicit_output_name(&qualified).map(|i| i.value.as_str()),
            Some("first_name")
        );
        let function = parse_expr("count(*)");
        assert_eq!(
            implicit_output_name(&function).map(|i| i.value.as_str()),
            Some("count")
        );
        assert!(implicit_output_name(&parse_expr("1 + 2")).is_none());
    }

    #[test]
    fn number_literals_parse_only_plain_integers() {
        assert_eq!(number_literal(&parse_expr("999999999")), Some(999_999_999));
        assert_eq!(number_literal(&parse_expr("'10'")), None);
        assert_eq!(number_literal(&parse_expr("1.5")), None);
        assert_eq!(number_literal(&number_expr(1000)), Some(1000));
    }
}
