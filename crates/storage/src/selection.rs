//! Selection and ordering clauses for the in-memory store.
//!
//! Supports a small subset of SQL `WHERE` / `ORDER BY` syntax:
//! - `col = ?`, `col != 'text'`, `col <= 42` - comparisons against a
//!   placeholder or a literal (`= == != <> < <= > >=`)
//! - `col IS NULL`, `col IS NOT NULL`
//! - `AND`, `OR`, `NOT` and parentheses
//! - `col [ASC|DESC] (, col [ASC|DESC])*` for ordering
//!
//! `?` placeholders are bound positionally from the selection arguments.
//! Every failure is reported as `MalformedQuery`.

use quarry_core::{Error, Result, Row, Value};
use std::cmp::Ordering;

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn matches(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// A compiled selection, with columns resolved to positions and
/// placeholders bound to values.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// `column op value`
    Compare {
        column: usize,
        op: CompareOp,
        value: Value,
    },
    /// `column IS [NOT] NULL`
    IsNull { column: usize, negated: bool },
    /// Logical AND
    And(Box<Predicate>, Box<Predicate>),
    /// Logical OR
    Or(Box<Predicate>, Box<Predicate>),
    /// Logical NOT
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluates the predicate against the raw values of a row.
    ///
    /// Comparisons involving NULL are false, as in SQL.
    pub fn eval(&self, values: &[Value]) -> bool {
        match self {
            Predicate::Compare { column, op, value } => match values.get(*column) {
                Some(Value::Null) | None => false,
                Some(_) if value.is_null() => false,
                Some(cell) => op.matches(cell.cmp(value)),
            },
            Predicate::IsNull { column, negated } => {
                let is_null = values.get(*column).map(Value::is_null).unwrap_or(true);
                is_null != *negated
            }
            Predicate::And(a, b) => a.eval(values) && b.eval(values),
            Predicate::Or(a, b) => a.eval(values) || b.eval(values),
            Predicate::Not(p) => !p.eval(values),
        }
    }

    /// Evaluates the predicate against a row.
    pub fn matches(&self, row: &Row) -> bool {
        self.eval(row.values())
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A compiled ordering clause: column positions and directions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderBy {
    keys: Vec<(usize, SortOrder)>,
}

impl OrderBy {
    /// Returns the sort keys.
    pub fn keys(&self) -> &[(usize, SortOrder)] {
        &self.keys
    }

    /// Compares two value rows by the sort keys.
    pub fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (col, order) in &self.keys {
            let cmp = match (a.get(*col), b.get(*col)) {
                (Some(av), Some(bv)) => av.cmp(bv),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if cmp != Ordering::Equal {
                return match order {
                    SortOrder::Asc => cmp,
                    SortOrder::Desc => cmp.reverse(),
                };
            }
        }
        Ordering::Equal
    }
}

/// Compiles a selection expression against `columns`, binding `args`.
///
/// Fails if the expression does not parse, names an unknown column, or if
/// the number of `?` placeholders differs from the number of arguments.
pub fn compile_selection(expr: &str, columns: &[String], args: &[Value]) -> Result<Predicate> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        columns,
        args,
        next_arg: 0,
    };
    let predicate = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(Error::malformed(format!("unexpected token {:?} in selection", tok)));
    }
    if parser.next_arg != args.len() {
        return Err(Error::malformed(format!(
            "selection has {} placeholders but {} arguments were given",
            parser.next_arg,
            args.len()
        )));
    }
    Ok(predicate)
}

/// Compiles an ordering clause against `columns`.
pub fn compile_order_by(clause: &str, columns: &[String]) -> Result<OrderBy> {
    let mut keys = Vec::new();
    for part in clause.split(',') {
        let mut words = part.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| Error::malformed(format!("empty sort key in {:?}", clause)))?;
        let column = resolve_column(columns, name)?;
        let order = match words.next().map(str::to_ascii_uppercase).as_deref() {
            None | Some("ASC") => SortOrder::Asc,
            Some("DESC") => SortOrder::Desc,
            Some(other) => {
                return Err(Error::malformed(format!("unknown sort direction {:?}", other)))
            }
        };
        if let Some(extra) = words.next() {
            return Err(Error::malformed(format!("unexpected {:?} in sort order", extra)));
        }
        keys.push((column, order));
    }
    Ok(OrderBy { keys })
}

/// Resolves `name` to its column position.
pub fn resolve_column(columns: &[String], name: &str) -> Result<usize> {
    columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::malformed(format!("unknown column: {}", name)))
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    Placeholder,
    Op(CompareOp),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Placeholder);
                i += 1;
            }
            '=' => {
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                tokens.push(Token::Op(CompareOp::Eq));
            }
            '!' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(Error::malformed(format!("expected '=' after '!' at {}", i)));
                }
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(CompareOp::Le));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Op(CompareOp::Ne));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(CompareOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(Error::malformed("unterminated string literal")),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::Text(text)));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let invalid = || Error::malformed(format!("invalid number {:?}", text));
                let value = if text.contains('.') {
                    text.parse::<f64>().map(Value::Real).map_err(|_| invalid())?
                } else {
                    text.parse::<i64>().map(Value::Integer).map_err(|_| invalid())?
                };
                tokens.push(Token::Literal(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::malformed(format!(
                    "unexpected character {:?} at {} in selection",
                    other, i
                )))
            }
        }
    }
    Ok(tokens)
}

/// Recursive-descent parser over the token stream.
///
/// ```text
/// or   := and ( OR and )*
/// and  := not ( AND not )*
/// not  := NOT not | atom
/// atom := '(' or ')' | ident op operand | ident IS [NOT] NULL
/// ```
struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    columns: &'a [String],
    args: &'a [Value],
    next_arg: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::malformed(format!("expected {} in selection", keyword)))
        }
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("OR") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut left = self.parse_not()?;
        while self.peek_keyword("AND") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Predicate> {
        if self.peek_keyword("NOT") {
            self.pos += 1;
            let inner = self.parse_not()?;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Predicate> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::malformed("expected ')' in selection")),
                }
            }
            Some(Token::Ident(name)) => {
                let column = resolve_column(self.columns, &name)?;
                if self.peek_keyword("IS") {
                    self.pos += 1;
                    let negated = if self.peek_keyword("NOT") {
                        self.pos += 1;
                        true
                    } else {
                        false
                    };
                    self.expect_keyword("NULL")?;
                    return Ok(Predicate::IsNull { column, negated });
                }
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    other => {
                        return Err(Error::malformed(format!(
                            "expected comparison after {}, found {:?}",
                            name, other
                        )))
                    }
                };
                let value = self.parse_operand()?;
                Ok(Predicate::Compare { column, op, value })
            }
            other => Err(Error::malformed(format!(
                "expected column or '(' in selection, found {:?}",
                other
            ))),
        }
    }

    fn parse_operand(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Placeholder) => {
                let value = self.args.get(self.next_arg).cloned().ok_or_else(|| {
                    Error::malformed(format!(
                        "selection placeholder {} has no argument",
                        self.next_arg + 1
                    ))
                })?;
                self.next_arg += 1;
                Ok(value)
            }
            Some(Token::Literal(value)) => Ok(value),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("NULL") => Ok(Value::Null),
            other => Err(Error::malformed(format!(
                "expected '?' or literal, found {:?}",
                other
            ))),
        }
    }
}
