//! Sandboxed band-math expressions.
//!
//! Catalog configs carry arithmetic over named source bands, for example
//! `(nir - red) / (nir + red)` or `where(data > 273.15, 1, 0)`. The
//! evaluator accepts arithmetic, comparisons, and a fixed allow-list of
//! functions; anything else is rejected at compile time. There is no
//! variable assignment, no indexing, and no user-defined functions.

use std::collections::BTreeSet;

use raster_common::{RasterError, RasterResult};

/// Functions available inside expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Sqrt,
    Log,
    Log10,
    Exp,
    Abs,
    Where,
    Clip,
    Minimum,
    Maximum,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sqrt" => Some(Self::Sqrt),
            "log" => Some(Self::Log),
            "log10" => Some(Self::Log10),
            "exp" => Some(Self::Exp),
            "abs" => Some(Self::Abs),
            "where" => Some(Self::Where),
            "clip" => Some(Self::Clip),
            "minimum" => Some(Self::Minimum),
            "maximum" => Some(Self::Maximum),
            _ => None,
        }
    }

    fn arity(&self) -> usize {
        match self {
            Self::Sqrt | Self::Log | Self::Log10 | Self::Exp | Self::Abs => 1,
            Self::Minimum | Self::Maximum => 2,
            Self::Where | Self::Clip => 3,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Sqrt => "sqrt",
            Self::Log => "log",
            Self::Log10 => "log10",
            Self::Exp => "exp",
            Self::Abs => "abs",
            Self::Where => "where",
            Self::Clip => "clip",
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Ident(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

/// A parsed expression, reusable across timestamps.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    root: Expr,
    text: String,
}

impl CompiledExpression {
    /// Source bands the expression references, in stable order.
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut idents = BTreeSet::new();
        collect_identifiers(&self.root, &mut idents);
        idents
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluate elementwise over `len` pixels. Every binding must carry
    /// exactly `len` values; scalars broadcast.
    pub fn evaluate(&self, bindings: &[(&str, &[f32])], len: usize) -> RasterResult<Vec<f32>> {
        for (name, values) in bindings {
            if values.len() != len {
                return Err(RasterError::ExpressionError(format!(
                    "Binding '{}' has {} values, expected {}, in '{}'",
                    name,
                    values.len(),
                    len,
                    self.text
                )));
            }
        }
        let value = eval(&self.root, bindings, &self.text)?;
        Ok(match value {
            Value::Scalar(s) => vec![s as f32; len],
            Value::Array(a) => a,
        })
    }
}

/// Parse an expression against the function allow-list.
pub fn compile(text: &str) -> RasterResult<CompiledExpression> {
    let tokens = tokenize(text)
        .map_err(|msg| RasterError::ExpressionError(format!("{} in '{}'", msg, text)))?;
    let mut parser = Parser { tokens, pos: 0 };
    let root = parser
        .parse_expression()
        .map_err(|msg| RasterError::ExpressionError(format!("{} in '{}'", msg, text)))?;
    if parser.pos != parser.tokens.len() {
        return Err(RasterError::ExpressionError(format!(
            "Unexpected trailing input in '{}'",
            text
        )));
    }
    Ok(CompiledExpression {
        root,
        text: text.to_string(),
    })
}

fn collect_identifiers(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Ident(name) => {
            out.insert(name.clone());
        }
        Expr::Neg(inner) => collect_identifiers(inner, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_identifiers(lhs, out);
            collect_identifiers(rhs, out);
        }
        Expr::Call(_, args) => {
            for arg in args {
                collect_identifiers(arg, out);
            }
        }
    }
}

// === Tokenizer ===

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(BinOp),
    Minus,
    LParen,
    RParen,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op(BinOp::Add));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Op(BinOp::Pow));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Mul));
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Op(BinOp::Div));
                i += 1;
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Lt));
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinOp::Eq));
                    i += 2;
                } else {
                    return Err("Single '=' is not an operator".to_string());
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinOp::Ne));
                    i += 2;
                } else {
                    return Err("Unexpected '!'".to_string());
                }
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent suffix: 1e-3, 2.5E+4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| format!("Bad number literal '{}'", literal))?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if name == "nan" {
                    tokens.push(Token::Number(f64::NAN));
                } else {
                    tokens.push(Token::Ident(name));
                }
            }
            other => return Err(format!("Unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

// === Parser ===

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

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(format!("Expected {:?}, found {:?}", token, t)),
            None => Err(format!("Expected {:?}, found end of input", token)),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, String> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_additive()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !matches!(
                op,
                BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le | BinOp::Eq | BinOp::Ne
            ) {
                break;
            }
            self.next();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(BinOp::Add)) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !matches!(op, BinOp::Mul | BinOp::Div) {
                break;
            }
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, String> {
        let base = self.parse_atom()?;
        if matches!(self.peek(), Some(Token::Op(BinOp::Pow))) {
            self.next();
            // Right associative: 2 ** 3 ** 2 is 2 ** (3 ** 2).
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(
                BinOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.next();
                    let func = Func::from_name(&name)
                        .ok_or_else(|| format!("Unknown function '{}'", name))?;
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        loop {
                            args.push(self.parse_expression()?);
                            match self.peek() {
                                Some(Token::Comma) => {
                                    self.next();
                                }
                                _ => break,
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    if args.len() != func.arity() {
                        return Err(format!(
                            "Function '{}' takes {} argument(s), got {}",
                            func.name(),
                            func.arity(),
                            args.len()
                        ));
                    }
                    Ok(Expr::Call(func, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(format!("Unexpected token {:?}", token)),
            None => Err("Unexpected end of input".to_string()),
        }
    }
}

// === Evaluation ===

enum Value {
    Scalar(f64),
    Array(Vec<f32>),
}

fn eval(expr: &Expr, bindings: &[(&str, &[f32])], text: &str) -> RasterResult<Value> {
    match expr {
        Expr::Number(value) => Ok(Value::Scalar(*value)),
        Expr::Ident(name) => {
            let values = bindings
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v)
                .ok_or_else(|| {
                    RasterError::ExpressionError(format!(
                        "Unknown variable '{}' in '{}'",
                        name, text
                    ))
                })?;
            Ok(Value::Array(values.to_vec()))
        }
        Expr::Neg(inner) => Ok(match eval(inner, bindings, text)? {
            Value::Scalar(s) => Value::Scalar(-s),
            Value::Array(mut a) => {
                for v in &mut a {
                    *v = -*v;
                }
                Value::Array(a)
            }
        }),
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, bindings, text)?;
            let rhs = eval(rhs, bindings, text)?;
            apply_binary(*op, lhs, rhs, text)
        }
        Expr::Call(func, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, bindings, text)?);
            }
            apply_function(*func, values, text)
        }
    }
}

fn binary_op(op: BinOp, a: f32, b: f32) -> f32 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Pow => a.powf(b),
        BinOp::Gt => bool_to_f32(a > b),
        BinOp::Lt => bool_to_f32(a < b),
        BinOp::Ge => bool_to_f32(a >= b),
        BinOp::Le => bool_to_f32(a <= b),
        BinOp::Eq => bool_to_f32(a == b),
        BinOp::Ne => bool_to_f32(a != b),
    }
}

fn bool_to_f32(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn apply_binary(op: BinOp, lhs: Value, rhs: Value, text: &str) -> RasterResult<Value> {
    Ok(match (lhs, rhs) {
        (Value::Scalar(a), Value::Scalar(b)) => {
            Value::Scalar(binary_op(op, a as f32, b as f32) as f64)
        }
        (Value::Array(mut a), Value::Scalar(b)) => {
            let b = b as f32;
            for v in &mut a {
                *v = binary_op(op, *v, b);
            }
            Value::Array(a)
        }
        (Value::Scalar(a), Value::Array(mut b)) => {
            let a = a as f32;
            for v in &mut b {
                *v = binary_op(op, a, *v);
            }
            Value::Array(b)
        }
        (Value::Array(mut a), Value::Array(b)) => {
            if a.len() != b.len() {
                return Err(RasterError::ExpressionError(format!(
                    "Operand lengths differ ({} vs {}) in '{}'",
                    a.len(),
                    b.len(),
                    text
                )));
            }
            for (v, &w) in a.iter_mut().zip(b.iter()) {
                *v = binary_op(op, *v, w);
            }
            Value::Array(a)
        }
    })
}

fn unary_fn(func: Func, v: f32) -> f32 {
    match func {
        Func::Sqrt => v.sqrt(),
        Func::Log => v.ln(),
        Func::Log10 => v.log10(),
        Func::Exp => v.exp(),
        Func::Abs => v.abs(),
        _ => v,
    }
}

/// NaN-propagating minimum, matching array-library semantics.
fn nan_min(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else {
        a.min(b)
    }
}

fn nan_max(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else {
        a.max(b)
    }
}

fn clip_value(v: f32, lo: f32, hi: f32) -> f32 {
    if v.is_nan() {
        f32::NAN
    } else {
        v.max(lo).min(hi)
    }
}

fn apply_function(func: Func, mut args: Vec<Value>, text: &str) -> RasterResult<Value> {
    let len = args
        .iter()
        .filter_map(|v| match v {
            Value::Array(a) => Some(a.len()),
            Value::Scalar(_) => None,
        })
        .max();

    // All-scalar calls stay scalar.
    let len = match len {
        Some(len) => len,
        None => {
            let scalars: Vec<f32> = args
                .iter()
                .map(|v| match v {
                    Value::Scalar(s) => *s as f32,
                    Value::Array(_) => f32::NAN,
                })
                .collect();
            let result = match func {
                Func::Where => {
                    if scalars[0] != 0.0 {
                        scalars[1]
                    } else {
                        scalars[2]
                    }
                }
                Func::Clip => clip_value(scalars[0], scalars[1], scalars[2]),
                Func::Minimum => nan_min(scalars[0], scalars[1]),
                Func::Maximum => nan_max(scalars[0], scalars[1]),
                unary => unary_fn(unary, scalars[0]),
            };
            return Ok(Value::Scalar(result as f64));
        }
    };

    let mut arrays: Vec<Vec<f32>> = Vec::with_capacity(args.len());
    for value in args.drain(..) {
        arrays.push(match value {
            Value::Scalar(s) => vec![s as f32; len],
            Value::Array(a) => {
                if a.len() != len {
                    return Err(RasterError::ExpressionError(format!(
                        "Argument lengths differ ({} vs {}) in '{}'",
                        a.len(),
                        len,
                        text
                    )));
                }
                a
            }
        });
    }

    let result = match func {
        Func::Where => {
            let (cond, a, b) = (&arrays[0], &arrays[1], &arrays[2]);
            cond.iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(&c, (&x, &y))| if c != 0.0 { x } else { y })
                .collect()
        }
        Func::Clip => {
            let (x, lo, hi) = (&arrays[0], &arrays[1], &arrays[2]);
            x.iter()
                .zip(lo.iter().zip(hi.iter()))
                .map(|(&v, (&l, &h))| clip_value(v, l, h))
                .collect()
        }
        Func::Minimum => arrays[0]
            .iter()
            .zip(arrays[1].iter())
            .map(|(&a, &b)| nan_min(a, b))
            .collect(),
        Func::Maximum => arrays[0]
            .iter()
            .zip(arrays[1].iter())
            .map(|(&a, &b)| nan_max(a, b))
            .collect(),
        unary => arrays[0].iter().map(|&v| unary_fn(unary, v)).collect(),
    };
    Ok(Value::Array(result))
}
