//! `SELECT` execution: filter, order, project, de-duplicate, paginate.

use std::{cmp::Ordering, collections::HashSet, sync::Arc};

use super::{
    ast::{Direction, Expression, Projection, Select},
    error::{QueryError, QueryResult},
    expression::{resolve, ResolvedExpr, AGGREGATES},
};
use crate::{
    record::{Row, Value},
    table::Table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFn {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggregateFn::Count),
            "sum" => Some(AggregateFn::Sum),
            "min" => Some(AggregateFn::Min),
            "max" => Some(AggregateFn::Max),
            "avg" => Some(AggregateFn::Avg),
            _ => None,
        }
    }
}

enum Output {
    Scalar(ResolvedExpr),
    /// `arg` is `None` for `COUNT(*)`.
    Aggregate {
        func: AggregateFn,
        arg: Option<ResolvedExpr>,
    },
}

fn contains_aggregate(expr: &Expression) -> bool {
    match expr {
        Expression::Call { name, args, .. } => {
            AGGREGATES.contains(&name.as_str()) || args.iter().any(contains_aggregate)
        }
        Expression::Literal(_) | Expression::Column(_) => false,
        Expression::Unary(_, expr) | Expression::IsNull { expr, .. } => contains_aggregate(expr),
        Expression::Binary(_, lhs, rhs) => contains_aggregate(lhs) || contains_aggregate(rhs),
        Expression::Like { expr, pattern, .. } => {
            contains_aggregate(expr) || contains_aggregate(pattern)
        }
        Expression::InList { expr, list, .. } => {
            contains_aggregate(expr) || list.iter().any(contains_aggregate)
        }
        Expression::Between {
            expr, low, high, ..
        } => contains_aggregate(expr) || contains_aggregate(low) || contains_aggregate(high),
    }
}

fn output_name(expr: &Expression, alias: &Option<String>) -> String {
    match (alias, expr) {
        (Some(alias), _) => alias.clone(),
        (None, Expression::Column(name)) => name.clone(),
        (None, expr) => expr.to_string(),
    }
}

/// Run `select` against `table` and return its result rows.
pub(crate) fn execute(select: &Select, table: &Table) -> QueryResult<Vec<Row>> {
    let schema = table.schema();
    let mut names = Vec::new();
    let mut outputs = Vec::new();
    for item in &select.projection {
        match item {
            Projection::Wildcard => {
                for (idx, column) in schema.columns().iter().enumerate() {
                    names.push(column.name.clone());
                    outputs.push(Output::Scalar(ResolvedExpr::Column(idx)));
                }
            }
            Projection::Expr { expr, alias } => {
                names.push(output_name(expr, alias));
                outputs.push(bind_output(expr, table)?);
            }
        }
    }
    let columns: Arc<[String]> = names.into();

    let aggregated = outputs
        .iter()
        .any(|output| matches!(output, Output::Aggregate { .. }));
    if aggregated {
        return execute_aggregate(select, table, &outputs, columns);
    }

    let ids = table.matching(select.filter.as_ref())?;
    let order = bind_order(select, table, &columns)?;

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(stored) = table.row(id) else {
            continue;
        };
        let values = outputs
            .iter()
            .map(|output| match output {
                Output::Scalar(expr) => expr.eval(stored),
                Output::Aggregate { .. } => Ok(Value::Null),
            })
            .collect::<QueryResult<Vec<_>>>()?;
        let keys = order
            .iter()
            .map(|(key, _)| match key {
                OrderKey::Output(pos) => Ok(values[*pos].clone()),
                OrderKey::Expr(expr) => expr.eval(stored),
            })
            .collect::<QueryResult<Vec<_>>>()?;
        rows.push((keys, values));
    }

    if !order.is_empty() {
        rows.sort_by(|(a, _), (b, _)| compare_keys(a, b, &order));
    }

    let mut values = rows.into_iter().map(|(_, values)| values).collect::<Vec<_>>();
    if select.distinct {
        let mut seen = HashSet::new();
        values.retain(|row| seen.insert(row.clone()));
    }

    Ok(paginate(values, select)
        .map(|values| Row::new(columns.clone(), values))
        .collect())
}

fn bind_output(expr: &Expression, table: &Table) -> QueryResult<Output> {
    if let Expression::Call {
        name,
        args,
        wildcard,
    } = expr
    {
        if let Some(func) = AggregateFn::lookup(name) {
            if args.iter().any(contains_aggregate) {
                return Err(QueryError::semantic(format!(
                    "aggregate calls cannot be nested in {name}"
                )));
            }
            let arg = match (func, *wildcard, args.as_slice()) {
                (AggregateFn::Count, true, []) => None,
                (_, false, [arg]) => Some(resolve(arg, Some(table.schema()))?),
                _ => {
                    return Err(QueryError::semantic(format!(
                        "wrong number of arguments for {name}"
                    )))
                }
            };
            return Ok(Output::Aggregate { func, arg });
        }
    }
    if contains_aggregate(expr) {
        return Err(QueryError::semantic(format!(
            "aggregate calls must be the whole select item in {expr}"
        )));
    }
    Ok(Output::Scalar(resolve(expr, Some(table.schema()))?))
}

enum OrderKey {
    /// Position in the projection (alias or ordinal reference).
    Output(usize),
    Expr(ResolvedExpr),
}

fn bind_order(
    select: &Select,
    table: &Table,
    columns: &[String],
) -> QueryResult<Vec<(OrderKey, Direction)>> {
    let aliases = select
        .projection
        .iter()
        .flat_map(|item| match item {
            Projection::Wildcard => vec![None; table.schema().columns().len()],
            Projection::Expr { alias, .. } => vec![alias.as_deref()],
        })
        .collect::<Vec<_>>();
    select
        .order_by
        .iter()
        .map(|(expr, direction)| {
            let key = match expr {
                Expression::Literal(Value::Integer(n)) => {
                    let pos = usize::try_from(*n)
                        .ok()
                        .filter(|n| (1..=columns.len()).contains(n))
                        .ok_or_else(|| {
                            QueryError::semantic(format!("ORDER BY position {n} is out of range"))
                        })?;
                    OrderKey::Output(pos - 1)
                }
                Expression::Column(name) if aliases.contains(&Some(name.as_str())) => {
                    let pos = aliases
                        .iter()
                        .position(|alias| *alias == Some(name.as_str()))
                        .unwrap_or_default();
                    OrderKey::Output(pos)
                }
                expr if contains_aggregate(expr) => {
                    return Err(QueryError::semantic(
                        "ORDER BY cannot use aggregates without an aggregate select list",
                    ))
                }
                expr => OrderKey::Expr(resolve(expr, Some(table.schema()))?),
            };
            Ok((key, *direction))
        })
        .collect()
}

/// Order by each key in turn using the storage order, `NULL` first when
/// ascending.
fn compare_keys(a: &[Value], b: &[Value], order: &[(OrderKey, Direction)]) -> Ordering {
    for ((lhs, rhs), (_, direction)) in a.iter().zip(b).zip(order) {
        let ordering = match direction {
            Direction::Ascending => lhs.cmp(rhs),
            Direction::Descending => rhs.cmp(lhs),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn paginate(values: Vec<Vec<Value>>, select: &Select) -> impl Iterator<Item = Vec<Value>> {
    let offset = select.offset.map_or(0, |n| n as usize);
    let limit = select.limit.map_or(usize::MAX, |n| n as usize);
    values.into_iter().skip(offset).take(limit)
}

fn execute_aggregate(
    select: &Select,
    table: &Table,
    outputs: &[Output],
    columns: Arc<[String]>,
) -> QueryResult<Vec<Row>> {
    for output in outputs {
        if let Output::Scalar(expr) = output {
            if !matches!(expr, ResolvedExpr::Literal(_)) {
                return Err(QueryError::semantic(
                    "select list mixes aggregates with non-aggregated columns",
                ));
            }
        }
    }
    for (expr, _) in &select.order_by {
        if !contains_aggregate(expr) {
            resolve(expr, Some(table.schema()))?;
        }
    }

    let ids = table.matching(select.filter.as_ref())?;
    let rows = ids
        .iter()
        .filter_map(|id| table.row(*id))
        .collect::<Vec<_>>();
    let values = outputs
        .iter()
        .map(|output| match output {
            Output::Scalar(expr) => expr.eval(&[]),
            Output::Aggregate { func, arg } => aggregate(*func, arg.as_ref(), &rows),
        })
        .collect::<QueryResult<Vec<_>>>()?;

    Ok(paginate(vec![values], select)
        .map(|values| Row::new(columns.clone(), values))
        .collect())
}

fn aggregate(
    func: AggregateFn,
    arg: Option<&ResolvedExpr>,
    rows: &[&[Value]],
) -> QueryResult<Value> {
    let Some(arg) = arg else {
        return Ok(Value::Integer(rows.len() as i64));
    };
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let value = arg.eval(row)?;
        if !value.is_null() {
            values.push(value);
        }
    }

    match func {
        AggregateFn::Count => Ok(Value::Integer(values.len() as i64)),
        AggregateFn::Min => Ok(values.into_iter().min().unwrap_or(Value::Null)),
        AggregateFn::Max => Ok(values.into_iter().max().unwrap_or(Value::Null)),
        AggregateFn::Sum | AggregateFn::Avg => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let count = values.len();
            let mut int_sum: Option<i64> = Some(0);
            let mut float_sum = 0.0;
            for value in &values {
                match value {
                    Value::Integer(i) => {
                        int_sum = int_sum.and_then(|sum| sum.checked_add(*i));
                        float_sum += *i as f64;
                    }
                    Value::Float(f) => {
                        int_sum = None;
                        float_sum += f;
                    }
                    other => {
                        return Err(QueryError::semantic(format!(
                            "{func:?} expects numeric values, found {other}"
                        )))
                    }
                }
            }
            let all_integers = values.iter().all(|v| matches!(v, Value::Integer(_)));
            match func {
                AggregateFn::Avg => Ok(Value::Float(float_sum / count as f64)),
                _ if all_integers => int_sum
                    .map(Value::Integer)
                    .ok_or_else(|| QueryError::constraint("integer overflow in SUM")),
                _ => Ok(Value::Float(float_sum)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::execute;
    use crate::{
        query::{ast::Statement, parser::Parser, QueryError},
        record::{Row, Value},
        table::Table,
    };

    fn table() -> Table {
        let mut parsed = Parser::parse(
            "CREATE TABLE t (id INT PRIMARY KEY, name TEXT, score FLOAT);
             INSERT INTO t VALUES (1, 'b', 2.5), (2, 'a', NULL), (3, 'c', 1.0), (4, 'a', 4.0)",
        )
        .unwrap()
        .into_iter();
        let Some(Statement::CreateTable { name, columns, .. }) =
            parsed.next().map(|p| p.statement)
        else {
            panic!("expected CREATE TABLE");
        };
        let mut table = Table::create(&name, &columns).unwrap();
        let Some(Statement::Insert { values, .. }) = parsed.next().map(|p| p.statement) else {
            panic!("expected INSERT");
        };
        table.insert(None, &values).unwrap();
        table
    }

    fn select(sql: &str) -> Result<Vec<Row>, QueryError> {
        let Statement::Select(select) = Parser::parse(sql).unwrap().remove(0).statement else {
            panic!("expected SELECT");
        };
        execute(&select, &table())
    }

    fn column(rows: &[Row], name: &str) -> Vec<Value> {
        rows.iter().map(|row| row.get(name).unwrap().clone()).collect()
    }

    #[test]
    fn wildcard_keeps_insertion_order() {
        let rows = select("SELECT * FROM t").unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].columns(), ["id", "name", "score"]);
        assert_eq!(column(&rows, "id"), [1, 2, 3, 4].map(Value::Integer));
    }

    #[test]
    fn order_by_alias_ordinal_and_direction() {
        let rows = select("SELECT id, name AS n FROM t ORDER BY n, id DESC").unwrap();
        assert_eq!(column(&rows, "id"), [4, 2, 1, 3].map(Value::Integer));

        let rows = select("SELECT score FROM t ORDER BY 1 DESC LIMIT 2 OFFSET 1").unwrap();
        assert_eq!(column(&rows, "score"), [Value::Float(2.5), Value::Float(1.0)]);

        assert!(matches!(
            select("SELECT id FROM t ORDER BY 3"),
            Err(QueryError::Semantic(_))
        ));
    }

    #[test]
    fn distinct_and_expression_names() {
        let rows = select("SELECT DISTINCT name FROM t WHERE id > 1 ORDER BY name").unwrap();
        assert_eq!(column(&rows, "name"), [Value::from("a"), Value::from("c")]);

        let rows = select("SELECT id * 2 FROM t WHERE id = 2").unwrap();
        assert_eq!(rows[0].columns(), ["(id * 2)"]);
        assert_eq!(rows[0].values(), [Value::Integer(4)]);
    }

    #[test]
    fn aggregates() {
        let rows = select(
            "SELECT count(*), count(score), sum(id), min(name), max(score), avg(id) AS mean \
             FROM t",
        )
        .unwrap();
        assert_eq!(
            rows[0].values(),
            [
                Value::Integer(4),
                Value::Integer(3),
                Value::Integer(10),
                Value::from("a"),
                Value::Float(4.0),
                Value::Float(2.5),
            ]
        );
        assert_eq!(rows[0].columns()[0], "count(*)");

        let rows = select("SELECT count(*), sum(score) FROM t WHERE id > 10").unwrap();
        assert_eq!(rows[0].values(), [Value::Integer(0), Value::Null]);
    }

    #[test]
    fn rejects_invalid_aggregate_use() {
        for sql in [
            "SELECT id, count(*) FROM t",
            "SELECT count(*) FROM t WHERE count(*) > 1",
            "SELECT count(sum(id)) FROM t",
            "SELECT sum(*) FROM t",
            "SELECT sum(name) FROM t",
            "SELECT count(*) + 1 FROM t",
            "SELECT missing FROM t",
        ] {
            assert!(matches!(select(sql), Err(QueryError::Semantic(_))), "{sql}");
        }
    }
}
