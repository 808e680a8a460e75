//! Tokenizer for the SQL dialect.

use std::{fmt, iter::Peekable, str::CharIndices};

use super::error::{QueryError, QueryResult};

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(String),
    String(String),
    Ident(String),
    Keyword(Keyword),
    Period,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    OpenParen,
    CloseParen,
    Comma,
    Semicolon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => f.write_str(n),
            Token::String(s) => write!(f, "'{s}'"),
            Token::Ident(s) => f.write_str(s),
            Token::Keyword(k) => f.write_str(k.as_str()),
            Token::Period => f.write_str("."),
            Token::Equal => f.write_str("="),
            Token::NotEqual => f.write_str("!="),
            Token::LessThan => f.write_str("<"),
            Token::LessThanOrEqual => f.write_str("<="),
            Token::GreaterThan => f.write_str(">"),
            Token::GreaterThanOrEqual => f.write_str(">="),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Asterisk => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::Percent => f.write_str("%"),
            Token::OpenParen => f.write_str("("),
            Token::CloseParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
            Token::Semicolon => f.write_str(";"),
        }
    }
}

macro_rules! keywords {
    ($($variant:ident => $text:literal),* $(,)?) => {
        /// Reserved words.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) enum Keyword {
            $($variant),*
        }

        impl Keyword {
            fn lookup(ident: &str) -> Option<Self> {
                match ident.to_uppercase().as_str() {
                    $($text => Some(Keyword::$variant),)*
                    _ => None,
                }
            }

            pub(crate) fn as_str(&self) -> &'static str {
                match self {
                    $(Keyword::$variant => $text),*
                }
            }
        }
    };
}

keywords! {
    And => "AND",
    As => "AS",
    Asc => "ASC",
    Between => "BETWEEN",
    Bigint => "BIGINT",
    Bool => "BOOL",
    Boolean => "BOOLEAN",
    By => "BY",
    Char => "CHAR",
    Create => "CREATE",
    Default => "DEFAULT",
    Delete => "DELETE",
    Desc => "DESC",
    Distinct => "DISTINCT",
    Double => "DOUBLE",
    Drop => "DROP",
    Exists => "EXISTS",
    False => "FALSE",
    Float => "FLOAT",
    From => "FROM",
    If => "IF",
    In => "IN",
    Index => "INDEX",
    Insert => "INSERT",
    Int => "INT",
    Integer => "INTEGER",
    Into => "INTO",
    Is => "IS",
    Key => "KEY",
    Like => "LIKE",
    Limit => "LIMIT",
    Not => "NOT",
    Null => "NULL",
    Offset => "OFFSET",
    On => "ON",
    Or => "OR",
    Order => "ORDER",
    Precision => "PRECISION",
    Primary => "PRIMARY",
    Real => "REAL",
    Select => "SELECT",
    Set => "SET",
    Smallint => "SMALLINT",
    String => "STRING",
    Table => "TABLE",
    Text => "TEXT",
    True => "TRUE",
    Unique => "UNIQUE",
    Update => "UPDATE",
    Values => "VALUES",
    Varchar => "VARCHAR",
    Where => "WHERE",
}

/// A token with the byte range it was read from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

/// Splits query text into tokens. Unquoted identifiers are folded to lower
/// case; `"quoted"` identifiers keep their case.
pub(crate) struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    /// Tokenize the whole input.
    pub(crate) fn tokenize(input: &'a str) -> QueryResult<Vec<Spanned>> {
        Lexer::new(input).collect()
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }

    fn next_if(&mut self, predicate: impl Fn(char) -> bool) -> Option<char> {
        self.chars
            .next_if(|(_, c)| predicate(*c))
            .map(|(_, c)| c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.next_if(char::is_whitespace).is_some() {}
            let rest = &self.input[self.offset()..];
            if rest.starts_with("--") {
                while self.next_if(|c| c != '\n').is_some() {}
            } else {
                return;
            }
        }
    }

    fn scan(&mut self) -> QueryResult<Option<Spanned>> {
        self.skip_whitespace_and_comments();
        let start = self.offset();
        let Some(&(_, c)) = self.chars.peek() else {
            return Ok(None);
        };
        let token = if c.is_ascii_digit() {
            self.scan_number()
        } else if c == '.' && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.scan_number()
        } else if c == '\'' {
            self.scan_string()?
        } else if c == '"' {
            self.scan_quoted_ident()?
        } else if c.is_alphabetic() || c == '_' {
            self.scan_ident()
        } else {
            self.scan_symbol()?
        };
        Ok(Some(Spanned {
            token,
            start,
            end: self.offset(),
        }))
    }

    fn peek_second(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next().map(|(_, c)| c)
    }

    fn scan_number(&mut self) -> Token {
        let mut number = String::new();
        while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
            number.push(c);
        }
        if let Some(c) = self.next_if(|c| c == '.') {
            number.push(c);
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                number.push(c);
            }
        }
        if let Some(c) = self.next_if(|c| c == 'e' || c == 'E') {
            number.push(c);
            if let Some(sign) = self.next_if(|c| c == '+' || c == '-') {
                number.push(sign);
            }
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                number.push(c);
            }
        }
        Token::Number(number)
    }

    fn scan_string(&mut self) -> QueryResult<Token> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\'')) => {
                    if self.next_if(|c| c == '\'').is_some() {
                        s.push('\'');
                    } else {
                        return Ok(Token::String(s));
                    }
                }
                Some((_, c)) => s.push(c),
                None => return Err(QueryError::syntax("unterminated string literal")),
            }
        }
    }

    fn scan_quoted_ident(&mut self) -> QueryResult<Token> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => {
                    if self.next_if(|c| c == '"').is_some() {
                        s.push('"');
                    } else if s.is_empty() {
                        return Err(QueryError::syntax("empty quoted identifier"));
                    } else {
                        return Ok(Token::Ident(s));
                    }
                }
                Some((_, c)) => s.push(c),
                None => return Err(QueryError::syntax("unterminated quoted identifier")),
            }
        }
    }

    fn scan_ident(&mut self) -> Token {
        let mut name = String::new();
        while let Some(c) = self.next_if(|c| c.is_alphanumeric() || c == '_') {
            name.push(c);
        }
        match Keyword::lookup(&name) {
            Some(keyword) => Token::Keyword(keyword),
            None => Token::Ident(name.to_lowercase()),
        }
    }

    fn scan_symbol(&mut self) -> QueryResult<Token> {
        let Some((_, c)) = self.chars.next() else {
            return Err(QueryError::syntax("unexpected end of input"));
        };
        let token = match c {
            '.' => Token::Period,
            '=' => Token::Equal,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Asterisk,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '!' if self.next_if(|c| c == '=').is_some() => Token::NotEqual,
            '<' => {
                if self.next_if(|c| c == '=').is_some() {
                    Token::LessThanOrEqual
                } else if self.next_if(|c| c == '>').is_some() {
                    Token::NotEqual
                } else {
                    Token::LessThan
                }
            }
            '>' => {
                if self.next_if(|c| c == '=').is_some() {
                    Token::GreaterThanOrEqual
                } else {
                    Token::GreaterThan
                }
            }
            other => {
                return Err(QueryError::syntax(format!(
                    "unexpected character {other:?}"
                )))
            }
        };
        Ok(token)
    }
}

impl Iterator for Lexer<'_> {
    type Item = QueryResult<Spanned>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scan().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::{Keyword, Lexer, Token};
    use crate::query::QueryError;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::tokenize(input)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            tokens("select Name, \"Mixed\" FROM t"),
            vec![
                Token::Keyword(Keyword::Select),
                Token::Ident("name".into()),
                Token::Comma,
                Token::Ident("Mixed".into()),
                Token::Keyword(Keyword::From),
                Token::Ident("t".into()),
            ]
        );
    }

    #[test]
    fn literals_operators_and_comments() {
        assert_eq!(
            tokens("x <> 'it''s' -- trailing\n AND y >= 1.5e3"),
            vec![
                Token::Ident("x".into()),
                Token::NotEqual,
                Token::String("it's".into()),
                Token::Keyword(Keyword::And),
                Token::Ident("y".into()),
                Token::GreaterThanOrEqual,
                Token::Number("1.5e3".into()),
            ]
        );
    }

    #[test]
    fn spans_cover_source_text() {
        let input = "INSERT INTO t VALUES (1)";
        let spanned = Lexer::tokenize(input).unwrap();
        let last = spanned.last().unwrap();
        assert_eq!(&input[last.start..last.end], ")");
        assert_eq!(&input[spanned[2].start..spanned[2].end], "t");
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(matches!(
            Lexer::tokenize("SELECT 'abc"),
            Err(QueryError::Syntax(_))
        ));
        assert!(matches!(Lexer::tokenize("a ? b"), Err(QueryError::Syntax(_))));
    }
}
