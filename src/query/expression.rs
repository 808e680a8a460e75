//! Expression binding and evaluation.
//!
//! [`resolve`] binds column names to positions in a table schema and
//! precompiles static `LIKE` patterns; [`ResolvedExpr::eval`] evaluates the
//! bound tree against one stored row with SQL three-valued logic.

use std::cmp::Ordering;

use regex::Regex;

use super::{
    ast::{BinaryOp, Expression, UnaryOp},
    error::{QueryError, QueryResult},
};
use crate::record::{TableSchema, Value};

/// Aggregate function names; rejected by [`resolve`].
pub(crate) const AGGREGATES: [&str; 5] = ["count", "sum", "min", "max", "avg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalarFn {
    Lower,
    Upper,
    Length,
    Abs,
    Coalesce,
}

impl ScalarFn {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "lower" => Some(ScalarFn::Lower),
            "upper" => Some(ScalarFn::Upper),
            "length" => Some(ScalarFn::Length),
            "abs" => Some(ScalarFn::Abs),
            "coalesce" => Some(ScalarFn::Coalesce),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum LikePattern {
    Static(Regex),
    Dynamic(Box<ResolvedExpr>),
}

/// An expression bound to a schema.
#[derive(Debug, Clone)]
pub(crate) enum ResolvedExpr {
    Literal(Value),
    Column(usize),
    Function(ScalarFn, Vec<ResolvedExpr>),
    Unary(UnaryOp, Box<ResolvedExpr>),
    Binary(BinaryOp, Box<ResolvedExpr>, Box<ResolvedExpr>),
    IsNull {
        expr: Box<ResolvedExpr>,
        negated: bool,
    },
    Like {
        expr: Box<ResolvedExpr>,
        pattern: LikePattern,
        negated: bool,
    },
    InList {
        expr: Box<ResolvedExpr>,
        list: Vec<ResolvedExpr>,
        negated: bool,
    },
    Between {
        expr: Box<ResolvedExpr>,
        low: Box<ResolvedExpr>,
        high: Box<ResolvedExpr>,
        negated: bool,
    },
}

/// Bind `expr` to `schema`. Without a schema, column references are rejected.
pub(crate) fn resolve(
    expr: &Expression,
    schema: Option<&TableSchema>,
) -> QueryResult<ResolvedExpr> {
    let bind = |e: &Expression| resolve(e, schema).map(Box::new);
    Ok(match expr {
        Expression::Literal(value) => ResolvedExpr::Literal(value.clone()),
        Expression::Column(name) => {
            let schema = schema.ok_or_else(|| {
                QueryError::semantic(format!("column reference {name} is not allowed here"))
            })?;
            let idx = schema.position(name).ok_or_else(|| {
                QueryError::semantic(format!(
                    "unknown column {name} in table {}",
                    schema.name()
                ))
            })?;
            ResolvedExpr::Column(idx)
        }
        Expression::Call {
            name,
            args,
            wildcard,
        } => {
            if AGGREGATES.contains(&name.as_str()) {
                return Err(QueryError::semantic(format!(
                    "aggregate function {name} is not allowed here"
                )));
            }
            let func = ScalarFn::lookup(name)
                .ok_or_else(|| QueryError::semantic(format!("unknown function {name}")))?;
            let arity_ok = match func {
                ScalarFn::Coalesce => !args.is_empty(),
                _ => args.len() == 1,
            };
            if *wildcard || !arity_ok {
                return Err(QueryError::semantic(format!(
                    "wrong number of arguments for {name}"
                )));
            }
            let args = args
                .iter()
                .map(|arg| resolve(arg, schema))
                .collect::<QueryResult<Vec<_>>>()?;
            ResolvedExpr::Function(func, args)
        }
        Expression::Unary(op, expr) => ResolvedExpr::Unary(*op, bind(expr)?),
        Expression::Binary(op, lhs, rhs) => ResolvedExpr::Binary(*op, bind(lhs)?, bind(rhs)?),
        Expression::IsNull { expr, negated } => ResolvedExpr::IsNull {
            expr: bind(expr)?,
            negated: *negated,
        },
        Expression::Like {
            expr,
            pattern,
            negated,
        } => {
            let pattern = match pattern.as_ref() {
                Expression::Literal(Value::Text(text)) => LikePattern::Static(like_regex(text)?),
                other => LikePattern::Dynamic(bind(other)?),
            };
            ResolvedExpr::Like {
                expr: bind(expr)?,
                pattern,
                negated: *negated,
            }
        }
        Expression::InList {
            expr,
            list,
            negated,
        } => ResolvedExpr::InList {
            expr: bind(expr)?,
            list: list
                .iter()
                .map(|item| resolve(item, schema))
                .collect::<QueryResult<Vec<_>>>()?,
            negated: *negated,
        },
        Expression::Between {
            expr,
            low,
            high,
            negated,
        } => ResolvedExpr::Between {
            expr: bind(expr)?,
            low: bind(low)?,
            high: bind(high)?,
            negated: *negated,
        },
    })
}

/// Evaluate an expression that may not reference columns.
pub(crate) fn eval_constant(expr: &Expression) -> QueryResult<Value> {
    resolve(expr, None)?.eval(&[])
}

/// Translate a `LIKE` pattern (`%`, `_`) into an anchored regex.
fn like_regex(pattern: &str) -> QueryResult<Regex> {
    let mut source = String::from("(?s)^");
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    source.push('$');
    Regex::new(&source)
        .map_err(|err| QueryError::semantic(format!("invalid LIKE pattern {pattern:?}: {err}")))
}

fn type_name(value: &Value) -> String {
    value
        .data_type()
        .map_or_else(|| "NULL".to_string(), |t| t.to_string())
}

fn truth(value: &Value) -> QueryResult<Option<bool>> {
    value
        .truth()
        .map_err(|found| QueryError::semantic(format!("expected BOOLEAN, found {found}")))
}

fn compare(lhs: &Value, rhs: &Value) -> QueryResult<Option<Ordering>> {
    lhs.sql_cmp(rhs)
        .map_err(|(a, b)| QueryError::semantic(format!("cannot compare {a} with {b}")))
}

fn as_float(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> QueryResult<Value> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        _ => "%",
    };
    let overflow = || QueryError::constraint(format!("integer overflow in {lhs} {symbol} {rhs}"));
    match (&lhs, &rhs) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Divide | BinaryOp::Remainder) && b == 0 {
                return Err(QueryError::constraint("division by zero"));
            }
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result.map(Value::Integer).ok_or_else(overflow)
        }
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let (a, b) = (as_float(&lhs), as_float(&rhs));
            if matches!(op, BinaryOp::Divide | BinaryOp::Remainder) && b == 0.0 {
                return Err(QueryError::constraint("division by zero"));
            }
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => a / b,
                _ => a % b,
            }))
        }
        _ => Err(QueryError::semantic(format!(
            "cannot apply {symbol} to {} and {}",
            type_name(&lhs),
            type_name(&rhs)
        ))),
    }
}

impl ResolvedExpr {
    /// Evaluate against a stored row laid out in schema order.
    pub(crate) fn eval(&self, row: &[Value]) -> QueryResult<Value> {
        match self {
            ResolvedExpr::Literal(value) => Ok(value.clone()),
            ResolvedExpr::Column(idx) => Ok(row[*idx].clone()),
            ResolvedExpr::Function(func, args) => eval_function(*func, args, row),
            ResolvedExpr::Unary(op, expr) => {
                let value = expr.eval(row)?;
                match (op, value) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Not, value) => Ok(Value::from(truth(&value)?.map(|b| !b))),
                    (UnaryOp::Negate, Value::Integer(i)) => i
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or_else(|| QueryError::constraint("integer overflow in negation")),
                    (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Identity, v @ (Value::Integer(_) | Value::Float(_))) => Ok(v),
                    (_, value) => Err(QueryError::semantic(format!(
                        "cannot apply unary operator to {}",
                        type_name(&value)
                    ))),
                }
            }
            ResolvedExpr::Binary(BinaryOp::And, lhs, rhs) => {
                let left = truth(&lhs.eval(row)?)?;
                if left == Some(false) {
                    return Ok(Value::Boolean(false));
                }
                let right = truth(&rhs.eval(row)?)?;
                Ok(match (left, right) {
                    (_, Some(false)) => Value::Boolean(false),
                    (Some(true), Some(true)) => Value::Boolean(true),
                    _ => Value::Null,
                })
            }
            ResolvedExpr::Binary(BinaryOp::Or, lhs, rhs) => {
                let left = truth(&lhs.eval(row)?)?;
                if left == Some(true) {
                    return Ok(Value::Boolean(true));
                }
                let right = truth(&rhs.eval(row)?)?;
                Ok(match (left, right) {
                    (_, Some(true)) => Value::Boolean(true),
                    (Some(false), Some(false)) => Value::Boolean(false),
                    _ => Value::Null,
                })
            }
            ResolvedExpr::Binary(op, lhs, rhs) => {
                let (left, right) = (lhs.eval(row)?, rhs.eval(row)?);
                let ordering = match op {
                    BinaryOp::Equal
                    | BinaryOp::NotEqual
                    | BinaryOp::LessThan
                    | BinaryOp::LessThanOrEqual
                    | BinaryOp::GreaterThan
                    | BinaryOp::GreaterThanOrEqual => compare(&left, &right)?,
                    _ => return arithmetic(*op, left, right),
                };
                Ok(Value::from(ordering.map(|ord| match op {
                    BinaryOp::Equal => ord == Ordering::Equal,
                    BinaryOp::NotEqual => ord != Ordering::Equal,
                    BinaryOp::LessThan => ord == Ordering::Less,
                    BinaryOp::LessThanOrEqual => ord != Ordering::Greater,
                    BinaryOp::GreaterThan => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                })))
            }
            ResolvedExpr::IsNull { expr, negated } => {
                Ok(Value::Boolean(expr.eval(row)?.is_null() != *negated))
            }
            ResolvedExpr::Like {
                expr,
                pattern,
                negated,
            } => {
                let value = expr.eval(row)?;
                let matched = match pattern {
                    LikePattern::Static(regex) => match &value {
                        Value::Null => None,
                        Value::Text(text) => Some(regex.is_match(text)),
                        other => return Err(like_operand_error(other)),
                    },
                    LikePattern::Dynamic(pattern) => match (&value, pattern.eval(row)?) {
                        (Value::Null, _) | (_, Value::Null) => None,
                        (Value::Text(text), Value::Text(pattern)) => {
                            Some(like_regex(&pattern)?.is_match(text))
                        }
                        (Value::Text(_), other) => return Err(like_operand_error(&other)),
                        (other, _) => return Err(like_operand_error(other)),
                    },
                };
                Ok(Value::from(matched.map(|m| m != *negated)))
            }
            ResolvedExpr::InList {
                expr,
                list,
                negated,
            } => {
                let value = expr.eval(row)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    match compare(&value, &item.eval(row)?)? {
                        Some(Ordering::Equal) => return Ok(Value::Boolean(!*negated)),
                        Some(_) => {}
                        None => saw_null = true,
                    }
                }
                Ok(if saw_null {
                    Value::Null
                } else {
                    Value::Boolean(*negated)
                })
            }
            ResolvedExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let value = expr.eval(row)?;
                let above = compare(&value, &low.eval(row)?)?.map(|o| o != Ordering::Less);
                let below = compare(&value, &high.eval(row)?)?.map(|o| o != Ordering::Greater);
                let inside = match (above, below) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
                Ok(Value::from(inside.map(|b| b != *negated)))
            }
        }
    }

    /// Evaluate as a filter: only `TRUE` keeps the row.
    pub(crate) fn matches(&self, row: &[Value]) -> QueryResult<bool> {
        Ok(truth(&self.eval(row)?)? == Some(true))
    }
}

fn like_operand_error(value: &Value) -> QueryError {
    QueryError::semantic(format!("LIKE expects TEXT, found {}", type_name(value)))
}

fn eval_function(func: ScalarFn, args: &[ResolvedExpr], row: &[Value]) -> QueryResult<Value> {
    if func == ScalarFn::Coalesce {
        for arg in args {
            let value = arg.eval(row)?;
            if !value.is_null() {
                return Ok(value);
            }
        }
        return Ok(Value::Null);
    }
    let value = args[0].eval(row)?;
    match (func, value) {
        (_, Value::Null) => Ok(Value::Null),
        (ScalarFn::Lower, Value::Text(s)) => Ok(Value::Text(s.to_lowercase())),
        (ScalarFn::Upper, Value::Text(s)) => Ok(Value::Text(s.to_uppercase())),
        (ScalarFn::Length, Value::Text(s)) => Ok(Value::Integer(s.chars().count() as i64)),
        (ScalarFn::Abs, Value::Integer(i)) => i
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| QueryError::constraint("integer overflow in abs")),
        (ScalarFn::Abs, Value::Float(f)) => Ok(Value::Float(f.abs())),
        (func, value) => Err(QueryError::semantic(format!(
            "{func:?} does not accept {}",
            type_name(&value)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{eval_constant, resolve};
    use crate::{
        query::{parser::Parser, QueryError},
        record::{Column, DataType, TableSchema, Value},
    };

    fn eval(text: &str) -> Result<Value, QueryError> {
        eval_constant(&Parser::parse_expression_text(text).unwrap())
    }

    #[test]
    fn three_valued_logic() {
        assert_eq!(eval("NULL AND FALSE"), Ok(Value::Boolean(false)));
        assert_eq!(eval("NULL AND TRUE"), Ok(Value::Null));
        assert_eq!(eval("NULL OR TRUE"), Ok(Value::Boolean(true)));
        assert_eq!(eval("NOT NULL"), Ok(Value::Null));
        assert_eq!(eval("1 = NULL"), Ok(Value::Null));
        assert_eq!(eval("NULL IS NULL"), Ok(Value::Boolean(true)));
        assert_eq!(eval("2 IN (1, NULL)"), Ok(Value::Null));
        assert_eq!(eval("2 NOT IN (1, 3)"), Ok(Value::Boolean(true)));
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert_eq!(eval("7 / 2"), Ok(Value::Integer(3)));
        assert_eq!(eval("7 / 2.0"), Ok(Value::Float(3.5)));
        assert_eq!(eval("-(2 + 3) * 2 % 4"), Ok(Value::Integer(-2)));
        assert_eq!(eval("1 < 1.5"), Ok(Value::Boolean(true)));
        assert_eq!(eval("'b' >= 'a'"), Ok(Value::Boolean(true)));
        assert_eq!(eval("5 BETWEEN 1 AND 5"), Ok(Value::Boolean(true)));
        assert!(matches!(eval("1 / 0"), Err(QueryError::Constraint(_))));
        assert!(matches!(
            eval("9223372036854775807 + 1"),
            Err(QueryError::Constraint(_))
        ));
        assert!(matches!(eval("1 = 'a'"), Err(QueryError::Semantic(_))));
        assert!(matches!(eval("1 AND TRUE"), Err(QueryError::Semantic(_))));
    }

    #[test]
    fn like_patterns() {
        assert_eq!(eval("'hello' LIKE 'h%o'"), Ok(Value::Boolean(true)));
        assert_eq!(eval("'hello' LIKE 'h_llo'"), Ok(Value::Boolean(true)));
        assert_eq!(eval("'h.llo' LIKE 'h.l%'"), Ok(Value::Boolean(true)));
        assert_eq!(eval("'hallo' LIKE 'h.l%'"), Ok(Value::Boolean(false)));
        assert_eq!(eval("'abc' NOT LIKE '%c'"), Ok(Value::Boolean(false)));
        assert_eq!(eval("NULL LIKE 'a'"), Ok(Value::Null));
    }

    #[test]
    fn scalar_functions() {
        assert_eq!(eval("upper('ab')"), Ok(Value::from("AB")));
        assert_eq!(eval("length('héllo')"), Ok(Value::Integer(5)));
        assert_eq!(eval("abs(-3)"), Ok(Value::Integer(3)));
        assert_eq!(eval("coalesce(NULL, NULL, 4)"), Ok(Value::Integer(4)));
        assert!(matches!(eval("nope(1)"), Err(QueryError::Semantic(_))));
        assert!(matches!(eval("count(*)"), Err(QueryError::Semantic(_))));
    }

    #[test]
    fn resolves_columns_against_schema() {
        let schema = TableSchema::new(
            "t",
            vec![
                Column::new("id", DataType::Integer),
                Column::new("v", DataType::Text),
            ],
        );
        let expr = Parser::parse_expression_text("id > 1 AND v LIKE 'a%'").unwrap();
        let resolved = resolve(&expr, Some(&schema)).unwrap();
        assert!(resolved
            .matches(&[Value::Integer(2), Value::from("abc")])
            .unwrap());
        assert!(!resolved
            .matches(&[Value::Integer(2), Value::Null])
            .unwrap());

        let unknown = Parser::parse_expression_text("missing = 1").unwrap();
        assert!(matches!(
            resolve(&unknown, Some(&schema)),
            Err(QueryError::Semantic(_))
        ));
        assert!(matches!(
            resolve(&Parser::parse_expression_text("id").unwrap(), None),
            Err(QueryError::Semantic(_))
        ));
    }
}
