use row::{Value, ValueType};
use xxhash_rust::xxh64::Xxh64;

/// A parsed computed-column expression.
///
/// The grammar covers what table schemas use in practice: integer
/// literals, key-column references, `+ - * / %` with the usual
/// precedence, unary minus, parentheses, and the `farm_hash(...)`
/// builtin.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Literal(i64),
    Column(String),
    Call { name: String, args: Vec<Expression> },
    Binary { op: BinaryOp, lhs: Box<Expression>, rhs: Box<Expression> },
    Negate(Box<Expression>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

/// Intermediate value of expression evaluation. Integers widen to i128 so
/// that mixed signed/unsigned column arithmetic cannot overflow before the
/// final cast to the computed column's type.
#[derive(Clone, Debug, PartialEq)]
enum Operand {
    Null,
    Int(i128),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Operand {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Null | Value::Min | Value::Max => Operand::Null,
            Value::Int64(v) => Operand::Int(v as i128),
            Value::Uint64(v) => Operand::Int(v as i128),
            Value::Double(v) => Operand::Float(v),
            Value::Boolean(v) => Operand::Bool(v),
            Value::String(b) | Value::Any(b) => Operand::Bytes(b),
        }
    }
}

impl Expression {
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut parser = Parser {
            tokens: tokenize(input)?,
            pos: 0,
        };
        let expression = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(format!("trailing input after expression: {:?}", parser.peek()));
        }
        Ok(expression)
    }

    /// Names of all key columns this expression reads.
    pub fn column_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a str>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Column(name) => refs.push(name),
            Expression::Call { args, .. } => {
                for arg in args {
                    arg.collect_refs(refs);
                }
            }
            Expression::Binary { lhs, rhs, .. } => {
                lhs.collect_refs(refs);
                rhs.collect_refs(refs);
            }
            Expression::Negate(inner) => inner.collect_refs(refs),
        }
    }

    /// Evaluate against resolved column values, casting the result to the
    /// computed column's declared type. Null operands propagate to a null
    /// result.
    pub fn evaluate(
        &self,
        resolve: impl Fn(&str) -> Value + Copy,
        target: ValueType,
    ) -> Result<Value, String> {
        let operand = self.eval(resolve)?;
        Ok(match (operand, target) {
            (Operand::Null, _) => Value::Null,
            (Operand::Int(v), ValueType::Int64) => Value::Int64(v as i64),
            (Operand::Int(v), ValueType::Uint64) => Value::Uint64(v as u64),
            (Operand::Float(v), ValueType::Double) => Value::Double(v),
            (Operand::Bool(v), ValueType::Boolean) => Value::Boolean(v),
            (Operand::Bytes(b), ValueType::String) => Value::String(b),
            (operand, target) => {
                return Err(format!(
                    "cannot store {operand:?} into a column of type {target:?}"
                ))
            }
        })
    }

    fn eval(&self, resolve: impl Fn(&str) -> Value + Copy) -> Result<Operand, String> {
        Ok(match self {
            Expression::Literal(v) => Operand::Int(*v as i128),
            Expression::Column(name) => Operand::from_value(resolve(name)),
            Expression::Negate(inner) => match inner.eval(resolve)? {
                Operand::Null => Operand::Null,
                Operand::Int(v) => Operand::Int(-v),
                Operand::Float(v) => Operand::Float(-v),
                other => return Err(format!("cannot negate {other:?}")),
            },
            Expression::Call { name, args } => {
                if name != "farm_hash" {
                    return Err(format!("unknown function '{name}'"));
                }
                let mut hasher = Xxh64::new(0);
                for arg in args {
                    hash_operand(&mut hasher, &arg.eval(resolve)?);
                }
                Operand::Int(hasher.digest() as i128)
            }
            Expression::Binary { op, lhs, rhs } => {
                let (lhs, rhs) = (lhs.eval(resolve)?, rhs.eval(resolve)?);
                match (lhs, rhs) {
                    (Operand::Null, _) | (_, Operand::Null) => Operand::Null,
                    (Operand::Int(l), Operand::Int(r)) => match op {
                        BinaryOp::Add => Operand::Int(l.wrapping_add(r)),
                        BinaryOp::Subtract => Operand::Int(l.wrapping_sub(r)),
                        BinaryOp::Multiply => Operand::Int(l.wrapping_mul(r)),
                        BinaryOp::Divide if r == 0 => return Err("division by zero".to_string()),
                        BinaryOp::Divide => Operand::Int(l / r),
                        BinaryOp::Modulo if r == 0 => return Err("division by zero".to_string()),
                        BinaryOp::Modulo => Operand::Int(l.rem_euclid(r)),
                    },
                    (l, r) => return Err(format!("cannot apply {op:?} to {l:?} and {r:?}")),
                }
            }
        })
    }
}

fn hash_operand(hasher: &mut Xxh64, operand: &Operand) {
    match operand {
        Operand::Null => hasher.update(&[0]),
        Operand::Int(v) => {
            hasher.update(&[1]);
            hasher.update(&v.to_le_bytes());
        }
        Operand::Float(v) => {
            hasher.update(&[2]);
            hasher.update(&v.to_bits().to_le_bytes());
        }
        Operand::Bool(v) => hasher.update(&[3, *v as u8]),
        Operand::Bytes(b) => {
            hasher.update(&[4]);
            hasher.update(b);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Int(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LeftParen,
    RightParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '0'..='9' => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let value = digits
                    .parse()
                    .map_err(|_| format!("integer literal '{digits}' out of range"))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_' || d == '$') {
                        break;
                    }
                    ident.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(format!("expected {expected:?}, found {other:?}")),
        }
    }

    fn expression(&mut self) -> Result<Expression, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => return Ok(lhs),
            };
            self.next();
            let rhs = self.term()?;
            lhs = Expression::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expression, String> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                Some(Token::Percent) => BinaryOp::Modulo,
                _ => return Ok(lhs),
            };
            self.next();
            let rhs = self.factor()?;
            lhs = Expression::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn factor(&mut self) -> Result<Expression, String> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Expression::Literal(v)),
            Some(Token::Minus) => Ok(Expression::Negate(Box::new(self.factor()?))),
            Some(Token::LeftParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RightParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LeftParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RightParen) {
                        loop {
                            args.push(self.expression()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.next();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RightParen)?;
                    Ok(Expression::Call { name, args })
                } else {
                    Ok(Expression::Column(name))
                }
            }
            other => Err(format!("expected a value, found {other:?}")),
        }
    }
}
