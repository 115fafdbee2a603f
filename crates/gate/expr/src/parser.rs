use serde_json::Value;

use crate::error::ExprError;
use crate::lexer::{tokenize, Token};

/// Maximum nesting of sub-expressions accepted by the parser.
pub const MAX_DEPTH: usize = 64;

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Path),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

/// Field reference: a root name followed by keys and indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub root: String,
    pub segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Built-in pure functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Len,
    Exists,
    Abs,
    Min,
    Max,
}

impl Function {
    fn lookup(name: &str) -> Option<Function> {
        match name {
            "len" => Some(Function::Len),
            "exists" => Some(Function::Exists),
            "abs" => Some(Function::Abs),
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Len => "len",
            Function::Exists => "exists",
            Function::Abs => "abs",
            Function::Min => "min",
            Function::Max => "max",
        }
    }

    fn check_arity(&self, actual: usize) -> Result<(), ExprError> {
        let (ok, expected) = match self {
            Function::Len | Function::Exists | Function::Abs => (actual == 1, "1"),
            Function::Min | Function::Max => (actual >= 1, "at least 1"),
        };
        if ok {
            Ok(())
        } else {
            Err(ExprError::Arity {
                function: self.name(),
                expected,
                actual,
            })
        }
    }
}

impl Expr {
    /// Root names referenced by any path in this expression, deduplicated.
    pub fn roots(&self) -> Vec<&str> {
        let mut roots = Vec::new();
        self.collect_roots(&mut roots);
        roots
    }

    fn collect_roots<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Path(path) => {
                if !out.contains(&path.root.as_str()) {
                    out.push(&path.root);
                }
            }
            Expr::Not(inner) | Expr::Neg(inner) => inner.collect_roots(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_roots(out);
                rhs.collect_roots(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_roots(out)),
        }
    }
}

pub(crate) fn parse_expr(input: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_or(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ExprError::UnexpectedToken(tok.describe())),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

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

    fn eat(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, symbol: &str) -> Result<(), ExprError> {
        if self.eat(symbol) {
            return Ok(());
        }
        match self.peek() {
            Some(tok) => Err(ExprError::UnexpectedToken(tok.describe())),
            None => Err(ExprError::UnexpectedEof),
        }
    }

    fn guard(depth: usize) -> Result<(), ExprError> {
        if depth > MAX_DEPTH {
            Err(ExprError::TooDeep(MAX_DEPTH))
        } else {
            Ok(())
        }
    }

    fn parse_or(&mut self, depth: usize) -> Result<Expr, ExprError> {
        Self::guard(depth)?;
        let mut lhs = self.parse_and(depth)?;
        while self.eat("||") {
            let rhs = self.parse_and(depth)?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_not(depth)?;
        while self.eat("&&") {
            let rhs = self.parse_not(depth)?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self, depth: usize) -> Result<Expr, ExprError> {
        if self.eat("!") {
            Self::guard(depth + 1)?;
            let inner = self.parse_not(depth + 1)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison(depth)
    }

    fn parse_comparison(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let lhs = self.parse_sum(depth)?;
        let op = match self.peek() {
            Some(Token::Symbol("==")) => BinaryOp::Eq,
            Some(Token::Symbol("!=")) => BinaryOp::Ne,
            Some(Token::Symbol(">")) => BinaryOp::Gt,
            Some(Token::Symbol(">=")) => BinaryOp::Ge,
            Some(Token::Symbol("<")) => BinaryOp::Lt,
            Some(Token::Symbol("<=")) => BinaryOp::Le,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_sum(depth)?;
        Ok(binary(op, lhs, rhs))
    }

    fn parse_sum(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_product(depth)?;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_product(depth)?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_product(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary(depth)?;
        loop {
            let op = if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else if self.eat("%") {
                BinaryOp::Rem
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary(depth)?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self, depth: usize) -> Result<Expr, ExprError> {
        if self.eat("-") {
            Self::guard(depth + 1)?;
            let inner = self.parse_unary(depth + 1)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary(depth)
    }

    fn parse_primary(&mut self, depth: usize) -> Result<Expr, ExprError> {
        match self.next() {
            None => Err(ExprError::UnexpectedEof),
            Some(Token::Number(n)) => serde_json::Number::from_f64(n)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| ExprError::InvalidNumber(n.to_string())),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Symbol("(")) => {
                let inner = self.parse_or(depth + 1)?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Ident(ident)) => {
                let keyword = match ident.as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    "null" | "undefined" => Some(Value::Null),
                    _ => None,
                };
                if let Some(value) = keyword {
                    Ok(Expr::Literal(value))
                } else if self.eat("(") {
                    self.parse_call(ident, depth)
                } else {
                    self.parse_path(ident)
                }
            }
            Some(tok) => Err(ExprError::UnexpectedToken(tok.describe())),
        }
    }

    fn parse_call(&mut self, name: String, depth: usize) -> Result<Expr, ExprError> {
        let function = Function::lookup(&name).ok_or(ExprError::UnknownFunction(name))?;
        let mut args = Vec::new();
        if !self.eat(")") {
            loop {
                args.push(self.parse_or(depth + 1)?);
                if self.eat(",") {
                    continue;
                }
                self.expect(")")?;
                break;
            }
        }
        function.check_arity(args.len())?;
        Ok(Expr::Call { function, args })
    }

    fn parse_path(&mut self, root: String) -> Result<Expr, ExprError> {
        let mut segments = Vec::new();
        loop {
            if self.eat(".") {
                match self.next() {
                    Some(Token::Ident(key)) => segments.push(PathSegment::Key(key)),
                    Some(tok) => return Err(ExprError::UnexpectedToken(tok.describe())),
                    None => return Err(ExprError::UnexpectedEof),
                }
            } else if self.eat("[") {
                match self.next() {
                    Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                        segments.push(PathSegment::Index(n as usize))
                    }
                    Some(Token::Str(key)) => segments.push(PathSegment::Key(key)),
                    Some(tok) => return Err(ExprError::UnexpectedToken(tok.describe())),
                    None => return Err(ExprError::UnexpectedEof),
                }
                self.expect("]")?;
            } else {
                return Ok(Expr::Path(Path { root, segments }));
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
