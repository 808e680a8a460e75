//! Recursive-descent parser with precedence climbing for expressions.

use super::{
    ast::{
        BinaryOp, ColumnDef, Direction, Expression, Projection, Select, Statement, UnaryOp,
    },
    error::{QueryError, QueryResult},
    lexer::{Keyword, Lexer, Spanned, Token},
};
use crate::record::{DataType, Value};

/// Operator precedence; higher binds tighter.
type Precedence = u8;

const PREC_OR: Precedence = 1;
const PREC_AND: Precedence = 2;
const PREC_NOT: Precedence = 3;
const PREC_PREDICATE: Precedence = 4;
const PREC_COMPARE: Precedence = 5;
const PREC_ADDITIVE: Precedence = 6;
const PREC_MULTIPLICATIVE: Precedence = 7;
const PREC_PREFIX: Precedence = 10;

/// A statement together with the source text it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Parsed {
    pub(crate) statement: Statement,
    pub(crate) text: String,
}

pub(crate) struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> QueryResult<Self> {
        Ok(Self {
            input,
            tokens: Lexer::tokenize(input)?,
            pos: 0,
        })
    }

    /// Parse `;`-separated statements. Empty input yields no statements.
    pub(crate) fn parse(input: &'a str) -> QueryResult<Vec<Parsed>> {
        let mut parser = Self::new(input)?;
        let mut statements = Vec::new();
        loop {
            while parser.next_is(&Token::Semicolon) {}
            let Some(first) = parser.tokens.get(parser.pos) else {
                break;
            };
            let start = first.start;
            let statement = parser.parse_statement()?;
            let end = parser.tokens[parser.pos - 1].end;
            match parser.peek() {
                None | Some(Token::Semicolon) => {}
                Some(token) => {
                    return Err(QueryError::syntax(format!("unexpected token {token}")))
                }
            }
            statements.push(Parsed {
                statement,
                text: parser.input[start..end].to_string(),
            });
        }
        Ok(statements)
    }

    /// Parse a standalone expression such as a `WHERE` clause body.
    pub(crate) fn parse_expression_text(input: &'a str) -> QueryResult<Expression> {
        let mut parser = Self::new(input)?;
        let expr = parser.parse_expression()?;
        if let Some(token) = parser.peek() {
            return Err(QueryError::syntax(format!("unexpected token {token}")));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|spanned| &spanned.token)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|spanned| &spanned.token)
    }

    fn next(&mut self) -> QueryResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|spanned| spanned.token.clone())
            .ok_or_else(|| QueryError::syntax("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn next_is(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn next_is_keyword(&mut self, keyword: Keyword) -> bool {
        self.next_is(&Token::Keyword(keyword))
    }

    fn expect(&mut self, expected: Token) -> QueryResult<()> {
        let token = self.next()?;
        if token != expected {
            return Err(QueryError::syntax(format!(
                "expected {expected}, found {token}"
            )));
        }
        Ok(())
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> QueryResult<()> {
        self.expect(Token::Keyword(keyword))
    }

    /// Identifiers; a few non-reserved keywords are accepted as names.
    fn next_ident(&mut self) -> QueryResult<String> {
        match self.next()? {
            Token::Ident(name) => Ok(name),
            Token::Keyword(keyword @ (Keyword::Key | Keyword::Text | Keyword::Precision)) => {
                Ok(keyword.as_str().to_lowercase())
            }
            token => Err(QueryError::syntax(format!(
                "expected identifier, found {token}"
            ))),
        }
    }

    fn parse_if_exists(&mut self) -> QueryResult<bool> {
        if self.next_is_keyword(Keyword::If) {
            self.expect_keyword(Keyword::Exists)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_if_not_exists(&mut self) -> QueryResult<bool> {
        if self.next_is_keyword(Keyword::If) {
            self.expect_keyword(Keyword::Not)?;
            self.expect_keyword(Keyword::Exists)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_statement(&mut self) -> QueryResult<Statement> {
        match self.next()? {
            Token::Keyword(Keyword::Create) => self.parse_create(),
            Token::Keyword(Keyword::Drop) => self.parse_drop(),
            Token::Keyword(Keyword::Insert) => self.parse_insert(),
            Token::Keyword(Keyword::Update) => self.parse_update(),
            Token::Keyword(Keyword::Delete) => self.parse_delete(),
            Token::Keyword(Keyword::Select) => Ok(Statement::Select(self.parse_select()?)),
            token => Err(QueryError::syntax(format!(
                "unexpected token {token} at start of statement"
            ))),
        }
    }

    fn parse_create(&mut self) -> QueryResult<Statement> {
        match self.next()? {
            Token::Keyword(Keyword::Table) => self.parse_create_table(),
            Token::Keyword(Keyword::Index) => self.parse_create_index(false),
            Token::Keyword(Keyword::Unique) => {
                self.expect_keyword(Keyword::Index)?;
                self.parse_create_index(true)
            }
            token => Err(QueryError::syntax(format!(
                "expected TABLE or INDEX after CREATE, found {token}"
            ))),
        }
    }

    fn parse_create_table(&mut self) -> QueryResult<Statement> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.next_ident()?;
        self.expect(Token::OpenParen)?;
        let mut columns = Vec::new();
        let mut table_primary_key = Vec::new();
        let mut table_unique = Vec::new();
        loop {
            if self.next_is_keyword(Keyword::Primary) {
                self.expect_keyword(Keyword::Key)?;
                table_primary_key.extend(self.parse_ident_list()?);
            } else if self.next_is_keyword(Keyword::Unique) {
                let names = self.parse_ident_list()?;
                if names.len() > 1 {
                    return Err(QueryError::semantic(
                        "multi-column UNIQUE constraints are not supported, use CREATE UNIQUE \
                         INDEX",
                    ));
                }
                table_unique.extend(names);
            } else {
                columns.push(self.parse_column_def()?);
            }
            if !self.next_is(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::CloseParen)?;

        for (names, primary) in [(table_primary_key, true), (table_unique, false)] {
            for column_name in names {
                let column = columns
                    .iter_mut()
                    .find(|column| column.name == column_name)
                    .ok_or_else(|| {
                        QueryError::semantic(format!(
                            "constraint references unknown column {column_name}"
                        ))
                    })?;
                if primary {
                    column.primary_key = true;
                } else {
                    column.unique = true;
                }
            }
        }

        Ok(Statement::CreateTable {
            name,
            columns,
            if_not_exists,
        })
    }

    fn parse_column_def(&mut self) -> QueryResult<ColumnDef> {
        let name = self.next_ident()?;
        let data_type = self.parse_data_type()?;
        let mut column = ColumnDef {
            name,
            data_type,
            not_null: false,
            primary_key: false,
            unique: false,
            default: None,
        };
        loop {
            if self.next_is_keyword(Keyword::Not) {
                self.expect_keyword(Keyword::Null)?;
                column.not_null = true;
            } else if self.next_is_keyword(Keyword::Null) {
                column.not_null = false;
            } else if self.next_is_keyword(Keyword::Primary) {
                self.expect_keyword(Keyword::Key)?;
                column.primary_key = true;
            } else if self.next_is_keyword(Keyword::Unique) {
                column.unique = true;
            } else if self.next_is_keyword(Keyword::Default) {
                column.default = Some(self.parse_expression()?);
            } else {
                break;
            }
        }
        Ok(column)
    }

    fn parse_data_type(&mut self) -> QueryResult<DataType> {
        let data_type = match self.next()? {
            Token::Keyword(Keyword::Int | Keyword::Integer | Keyword::Bigint | Keyword::Smallint) => {
                DataType::Integer
            }
            Token::Keyword(Keyword::Float | Keyword::Real) => DataType::Float,
            Token::Keyword(Keyword::Double) => {
                self.next_is_keyword(Keyword::Precision);
                DataType::Float
            }
            Token::Keyword(Keyword::Text | Keyword::String | Keyword::Varchar | Keyword::Char) => {
                DataType::Text
            }
            Token::Keyword(Keyword::Bool | Keyword::Boolean) => DataType::Boolean,
            token => {
                return Err(QueryError::syntax(format!(
                    "expected data type, found {token}"
                )))
            }
        };
        // Length modifiers such as VARCHAR(255) are accepted and ignored.
        if self.next_is(&Token::OpenParen) {
            match self.next()? {
                Token::Number(_) => {}
                token => {
                    return Err(QueryError::syntax(format!(
                        "expected type length, found {token}"
                    )))
                }
            }
            self.expect(Token::CloseParen)?;
        }
        Ok(data_type)
    }

    fn parse_ident_list(&mut self) -> QueryResult<Vec<String>> {
        self.expect(Token::OpenParen)?;
        let mut names = vec![self.next_ident()?];
        while self.next_is(&Token::Comma) {
            names.push(self.next_ident()?);
        }
        self.expect(Token::CloseParen)?;
        Ok(names)
    }

    fn parse_create_index(&mut self, unique: bool) -> QueryResult<Statement> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = if self.peek() == Some(&Token::Keyword(Keyword::On)) {
            None
        } else {
            Some(self.next_ident()?)
        };
        self.expect_keyword(Keyword::On)?;
        let table = self.next_ident()?;
        let columns = self.parse_ident_list()?;
        Ok(Statement::CreateIndex {
            name,
            table,
            columns,
            unique,
            if_not_exists,
        })
    }

    fn parse_drop(&mut self) -> QueryResult<Statement> {
        match self.next()? {
            Token::Keyword(Keyword::Table) => {
                let if_exists = self.parse_if_exists()?;
                Ok(Statement::DropTable {
                    name: self.next_ident()?,
                    if_exists,
                })
            }
            Token::Keyword(Keyword::Index) => {
                let if_exists = self.parse_if_exists()?;
                Ok(Statement::DropIndex {
                    name: self.next_ident()?,
                    if_exists,
                })
            }
            token => Err(QueryError::syntax(format!(
                "expected TABLE or INDEX after DROP, found {token}"
            ))),
        }
    }

    fn parse_insert(&mut self) -> QueryResult<Statement> {
        self.expect_keyword(Keyword::Into)?;
        let table = self.next_ident()?;
        let columns = if self.peek() == Some(&Token::OpenParen) {
            Some(self.parse_ident_list()?)
        } else {
            None
        };
        self.expect_keyword(Keyword::Values)?;
        let mut values = Vec::new();
        loop {
            self.expect(Token::OpenParen)?;
            let mut row = vec![self.parse_expression()?];
            while self.next_is(&Token::Comma) {
                row.push(self.parse_expression()?);
            }
            self.expect(Token::CloseParen)?;
            values.push(row);
            if !self.next_is(&Token::Comma) {
                break;
            }
        }
        Ok(Statement::Insert {
            table,
            columns,
            values,
        })
    }

    fn parse_update(&mut self) -> QueryResult<Statement> {
        let table = self.next_ident()?;
        self.expect_keyword(Keyword::Set)?;
        let mut set = Vec::new();
        loop {
            let column = self.next_ident()?;
            self.expect(Token::Equal)?;
            set.push((column, self.parse_expression()?));
            if !self.next_is(&Token::Comma) {
                break;
            }
        }
        let filter = self.parse_where()?;
        Ok(Statement::Update { table, set, filter })
    }

    fn parse_delete(&mut self) -> QueryResult<Statement> {
        self.expect_keyword(Keyword::From)?;
        let table = self.next_ident()?;
        let filter = self.parse_where()?;
        Ok(Statement::Delete { table, filter })
    }

    fn parse_where(&mut self) -> QueryResult<Option<Expression>> {
        if self.next_is_keyword(Keyword::Where) {
            return Ok(Some(self.parse_expression()?));
        }
        Ok(None)
    }

    fn parse_select(&mut self) -> QueryResult<Select> {
        let distinct = self.next_is_keyword(Keyword::Distinct);
        let mut projection = Vec::new();
        loop {
            if self.next_is(&Token::Asterisk) {
                projection.push(Projection::Wildcard);
            } else {
                let expr = self.parse_expression()?;
                let alias = if self.next_is_keyword(Keyword::As) {
                    Some(self.next_ident()?)
                } else if let Some(Token::Ident(_)) = self.peek() {
                    Some(self.next_ident()?)
                } else {
                    None
                };
                projection.push(Projection::Expr { expr, alias });
            }
            if !self.next_is(&Token::Comma) {
                break;
            }
        }
        self.expect_keyword(Keyword::From)?;
        let from = self.next_ident()?;
        let filter = self.parse_where()?;

        let mut order_by = Vec::new();
        if self.next_is_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            loop {
                let expr = self.parse_expression()?;
                let direction = if self.next_is_keyword(Keyword::Desc) {
                    Direction::Descending
                } else {
                    self.next_is_keyword(Keyword::Asc);
                    Direction::Ascending
                };
                order_by.push((expr, direction));
                if !self.next_is(&Token::Comma) {
                    break;
                }
            }
        }

        let limit = if self.next_is_keyword(Keyword::Limit) {
            Some(self.parse_count_literal("LIMIT")?)
        } else {
            None
        };
        let offset = if self.next_is_keyword(Keyword::Offset) {
            Some(self.parse_count_literal("OFFSET")?)
        } else {
            None
        };

        Ok(Select {
            distinct,
            projection,
            from,
            filter,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_count_literal(&mut self, clause: &str) -> QueryResult<u64> {
        match self.next()? {
            Token::Number(n) => n.parse::<u64>().map_err(|_| {
                QueryError::syntax(format!("{clause} expects a non-negative integer, got {n}"))
            }),
            token => Err(QueryError::syntax(format!(
                "{clause} expects a non-negative integer, got {token}"
            ))),
        }
    }

    pub(crate) fn parse_expression(&mut self) -> QueryResult<Expression> {
        self.parse_expression_at(0)
    }

    fn parse_expression_at(&mut self, min_precedence: Precedence) -> QueryResult<Expression> {
        let mut lhs = if self.next_is_keyword(Keyword::Not) {
            Expression::Unary(UnaryOp::Not, Box::new(self.parse_expression_at(PREC_NOT)?))
        } else if self.next_is(&Token::Minus) {
            Expression::Unary(
                UnaryOp::Negate,
                Box::new(self.parse_expression_at(PREC_PREFIX)?),
            )
        } else if self.next_is(&Token::Plus) {
            Expression::Unary(
                UnaryOp::Identity,
                Box::new(self.parse_expression_at(PREC_PREFIX)?),
            )
        } else {
            self.parse_atom()?
        };

        loop {
            if PREC_PREDICATE >= min_precedence {
                if let Some(expr) = self.parse_predicate_suffix(&lhs)? {
                    lhs = expr;
                    continue;
                }
            }
            let Some((op, precedence)) = self.peek_binary_op() else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            // All binary operators are left-associative.
            let rhs = self.parse_expression_at(precedence + 1)?;
            lhs = Expression::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, Precedence)> {
        let op = match self.peek()? {
            Token::Keyword(Keyword::Or) => (BinaryOp::Or, PREC_OR),
            Token::Keyword(Keyword::And) => (BinaryOp::And, PREC_AND),
            Token::Equal => (BinaryOp::Equal, PREC_PREDICATE),
            Token::NotEqual => (BinaryOp::NotEqual, PREC_PREDICATE),
            Token::LessThan => (BinaryOp::LessThan, PREC_COMPARE),
            Token::LessThanOrEqual => (BinaryOp::LessThanOrEqual, PREC_COMPARE),
            Token::GreaterThan => (BinaryOp::GreaterThan, PREC_COMPARE),
            Token::GreaterThanOrEqual => (BinaryOp::GreaterThanOrEqual, PREC_COMPARE),
            Token::Plus => (BinaryOp::Add, PREC_ADDITIVE),
            Token::Minus => (BinaryOp::Subtract, PREC_ADDITIVE),
            Token::Asterisk => (BinaryOp::Multiply, PREC_MULTIPLICATIVE),
            Token::Slash => (BinaryOp::Divide, PREC_MULTIPLICATIVE),
            Token::Percent => (BinaryOp::Remainder, PREC_MULTIPLICATIVE),
            _ => return None,
        };
        Some(op)
    }

    /// `IS [NOT] NULL`, `[NOT] LIKE`, `[NOT] IN (...)`, `[NOT] BETWEEN .. AND ..`.
    fn parse_predicate_suffix(&mut self, lhs: &Expression) -> QueryResult<Option<Expression>> {
        if self.next_is_keyword(Keyword::Is) {
            let negated = self.next_is_keyword(Keyword::Not);
            self.expect_keyword(Keyword::Null)?;
            return Ok(Some(Expression::IsNull {
                expr: Box::new(lhs.clone()),
                negated,
            }));
        }

        let negated = matches!(self.peek(), Some(Token::Keyword(Keyword::Not)))
            && matches!(
                self.peek_nth(1),
                Some(Token::Keyword(Keyword::Like | Keyword::In | Keyword::Between))
            );
        if negated {
            self.pos += 1;
        }
        let expr = Box::new(lhs.clone());
        let predicate = match self.peek() {
            Some(Token::Keyword(Keyword::Like)) => {
                self.pos += 1;
                Expression::Like {
                    expr,
                    pattern: Box::new(self.parse_expression_at(PREC_COMPARE)?),
                    negated,
                }
            }
            Some(Token::Keyword(Keyword::In)) => {
                self.pos += 1;
                self.expect(Token::OpenParen)?;
                let mut list = vec![self.parse_expression()?];
                while self.next_is(&Token::Comma) {
                    list.push(self.parse_expression()?);
                }
                self.expect(Token::CloseParen)?;
                Expression::InList {
                    expr,
                    list,
                    negated,
                }
            }
            Some(Token::Keyword(Keyword::Between)) => {
                self.pos += 1;
                let low = self.parse_expression_at(PREC_COMPARE)?;
                self.expect_keyword(Keyword::And)?;
                let high = self.parse_expression_at(PREC_COMPARE)?;
                Expression::Between {
                    expr,
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(predicate))
    }

    fn parse_atom(&mut self) -> QueryResult<Expression> {
        match self.next()? {
            Token::Number(n) => parse_number(&n).map(Expression::Literal),
            Token::String(s) => Ok(Expression::Literal(Value::Text(s))),
            Token::Keyword(Keyword::True) => Ok(Expression::Literal(Value::Boolean(true))),
            Token::Keyword(Keyword::False) => Ok(Expression::Literal(Value::Boolean(false))),
            Token::Keyword(Keyword::Null) => Ok(Expression::Literal(Value::Null)),
            Token::OpenParen => {
                let expr = self.parse_expression()?;
                self.expect(Token::CloseParen)?;
                Ok(expr)
            }
            Token::Ident(name) => {
                if self.next_is(&Token::OpenParen) {
                    return self.parse_call(name);
                }
                if self.next_is(&Token::Period) {
                    // Table qualifiers are accepted; statements address one table.
                    return Ok(Expression::Column(self.next_ident()?));
                }
                Ok(Expression::Column(name))
            }
            Token::Keyword(keyword @ (Keyword::Key | Keyword::Text | Keyword::Precision)) => {
                Ok(Expression::Column(keyword.as_str().to_lowercase()))
            }
            token => Err(QueryError::syntax(format!(
                "expected expression, found {token}"
            ))),
        }
    }

    fn parse_call(&mut self, name: String) -> QueryResult<Expression> {
        if self.next_is(&Token::Asterisk) {
            self.expect(Token::CloseParen)?;
            return Ok(Expression::Call {
                name,
                args: Vec::new(),
                wildcard: true,
            });
        }
        let mut args = Vec::new();
        if !self.next_is(&Token::CloseParen) {
            args.push(self.parse_expression()?);
            while self.next_is(&Token::Comma) {
                args.push(self.parse_expression()?);
            }
            self.expect(Token::CloseParen)?;
        }
        Ok(Expression::Call {
            name,
            args,
            wildcard: false,
        })
    }
}

fn parse_number(text: &str) -> QueryResult<Value> {
    if text.contains(['.', 'e', 'E']) {
        return text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| QueryError::syntax(format!("invalid number {text}")));
    }
    text.parse::<i64>()
        .map(Value::Integer)
        .map_err(|_| QueryError::syntax(format!("integer literal out of range: {text}")))
}

#[cfg(test)]
mod tests {
    use super::Parser;
    use crate::{
        query::{
            ast::{BinaryOp, Direction, Expression, Projection, Statement, UnaryOp},
            QueryError,
        },
        record::{DataType, Value},
    };

    fn single(input: &str) -> Statement {
        let mut parsed = Parser::parse(input).unwrap();
        assert_eq!(parsed.len(), 1);
        parsed.remove(0).statement
    }

    fn col(name: &str) -> Expression {
        Expression::Column(name.to_string())
    }

    fn lit(value: impl Into<Value>) -> Expression {
        Expression::Literal(value.into())
    }

    #[test]
    fn create_table_with_constraints() {
        let Statement::CreateTable {
            name,
            columns,
            if_not_exists,
        } = single(
            "CREATE TABLE IF NOT EXISTS t (id INT PRIMARY KEY, v VARCHAR(10) NOT NULL DEFAULT 'x', \
             score DOUBLE PRECISION, ok BOOLEAN, UNIQUE (v))",
        )
        else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(name, "t");
        assert!(if_not_exists);
        assert_eq!(columns.len(), 4);
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].data_type, DataType::Text);
        assert!(columns[1].not_null);
        assert!(columns[1].unique);
        assert_eq!(columns[1].default, Some(lit("x")));
        assert_eq!(columns[2].data_type, DataType::Float);
        assert_eq!(columns[3].data_type, DataType::Boolean);
    }

    #[test]
    fn precedence_and_associativity() {
        let Statement::Select(select) = single("SELECT a FROM t WHERE a = 1 OR b = 2 AND NOT c")
        else {
            panic!("expected SELECT");
        };
        assert_eq!(
            select.filter,
            Some(Expression::binary(
                BinaryOp::Or,
                Expression::binary(BinaryOp::Equal, col("a"), lit(1)),
                Expression::binary(
                    BinaryOp::And,
                    Expression::binary(BinaryOp::Equal, col("b"), lit(2)),
                    Expression::Unary(UnaryOp::Not, Box::new(col("c"))),
                ),
            ))
        );

        let expr = Parser::parse_expression_text("1 - 2 - 3 * -4").unwrap();
        assert_eq!(
            expr,
            Expression::binary(
                BinaryOp::Subtract,
                Expression::binary(BinaryOp::Subtract, lit(1), lit(2)),
                Expression::binary(
                    BinaryOp::Multiply,
                    lit(3),
                    Expression::Unary(UnaryOp::Negate, Box::new(lit(4))),
                ),
            )
        );
    }

    #[test]
    fn negated_predicates() {
        let expr =
            Parser::parse_expression_text("a NOT LIKE 'x%' AND b NOT IN (1, 2) AND c BETWEEN 1 AND 3")
                .unwrap();
        let terms = expr.conjuncts();
        assert_eq!(terms.len(), 3);
        assert!(matches!(terms[0], Expression::Like { negated: true, .. }));
        assert!(matches!(terms[1], Expression::InList { negated: true, list, .. } if list.len() == 2));
        assert!(matches!(terms[2], Expression::Between { negated: false, .. }));

        let expr = Parser::parse_expression_text("a IS NOT NULL").unwrap();
        assert!(matches!(expr, Expression::IsNull { negated: true, .. }));
    }

    #[test]
    fn select_clauses() {
        let Statement::Select(select) = single(
            "SELECT DISTINCT v AS value, count(*) FROM t ORDER BY v DESC, id LIMIT 10 OFFSET 2;",
        ) else {
            panic!("expected SELECT");
        };
        assert!(select.distinct);
        assert_eq!(
            select.projection[0],
            Projection::Expr {
                expr: col("v"),
                alias: Some("value".into())
            }
        );
        assert!(matches!(
            &select.projection[1],
            Projection::Expr { expr: Expression::Call { wildcard: true, .. }, alias: None }
        ));
        assert_eq!(select.order_by[0].1, Direction::Descending);
        assert_eq!(select.order_by[1].1, Direction::Ascending);
        assert_eq!(select.limit, Some(10));
        assert_eq!(select.offset, Some(2));
    }

    #[test]
    fn multiple_statements_keep_source_text() {
        let parsed = Parser::parse(
            "CREATE TABLE t (id INT); INSERT INTO t VALUES (1), (2);; CREATE INDEX ON t (id)",
        )
        .unwrap();
        let texts: Vec<_> = parsed.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "CREATE TABLE t (id INT)",
                "INSERT INTO t VALUES (1), (2)",
                "CREATE INDEX ON t (id)",
            ]
        );
        assert!(Parser::parse("  ; -- nothing\n").unwrap().is_empty());
    }

    #[test]
    fn syntax_errors() {
        for input in [
            "SELECT FROM t",
            "SELECT * FROM",
            "INSERT INTO t VALUES (1",
            "CREATE TABLE t (id BLOB)",
            "UPDATE t SET",
            "SELECT * FROM t LIMIT -1",
            "DELETE t",
            "SELECT * FROM t extra",
        ] {
            assert!(
                matches!(Parser::parse(input), Err(QueryError::Syntax(_))),
                "{input} should fail to parse"
            );
        }
    }
}
