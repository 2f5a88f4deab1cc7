//! Hand-rolled lexer and recursive-descent parser for the script language.
//!
//! Handles `//` line comments, string escapes, and the usual precedence
//! ladder (assignment < or < and < equality < comparison < additive <
//! multiplicative < unary < postfix).

use std::rc::Rc;
use thiserror::Error;

use super::ast::{BinOp, Expr, Stmt, UnOp};

/// Script syntax error with the offending line.
#[derive(Error, Debug, Clone)]
#[error("parse error at line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

#[derive(Debug, Clone)]
struct Lexed {
    tok: Tok,
    line: usize,
}

const KEYWORDS: &[&str] = &[
    "let", "fn", "return", "if", "else", "while", "new", "true", "false", "null", "undefined",
];

fn lex(source: &str) -> Result<Vec<Lexed>, ParseError> {
    let mut out = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1usize;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            break;
                        }
                    }
                } else {
                    out.push(Lexed { tok: Tok::Punct("/"), line });
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        None => {
                            return Err(ParseError {
                                line,
                                message: "unterminated string literal".into(),
                            })
                        }
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('\\') => s.push('\\'),
                            Some('"') => s.push('"'),
                            other => {
                                return Err(ParseError {
                                    line,
                                    message: format!("invalid escape: \\{}", other.unwrap_or(' ')),
                                })
                            }
                        },
                        Some('\n') => {
                            return Err(ParseError {
                                line,
                                message: "unterminated string literal".into(),
                            })
                        }
                        Some(c) => s.push(c),
                    }
                }
                out.push(Lexed { tok: Tok::Str(s), line });
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = text.parse().map_err(|_| ParseError {
                    line,
                    message: format!("invalid number literal: {text}"),
                })?;
                out.push(Lexed { tok: Tok::Num(n), line });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push(Lexed { tok: Tok::Ident(text), line });
            }
            _ => {
                chars.next();
                let punct: &'static str = match c {
                    '=' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            "=="
                        } else {
                            "="
                        }
                    }
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            "!="
                        } else {
                            "!"
                        }
                    }
                    '<' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            "<="
                        } else {
                            "<"
                        }
                    }
                    '>' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            ">="
                        } else {
                            ">"
                        }
                    }
                    '&' => {
                        if chars.peek() == Some(&'&') {
                            chars.next();
                            "&&"
                        } else {
                            return Err(ParseError { line, message: "expected '&&'".into() });
                        }
                    }
                    '|' => {
                        if chars.peek() == Some(&'|') {
                            chars.next();
                            "||"
                        } else {
                            return Err(ParseError { line, message: "expected '||'".into() });
                        }
                    }
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '%' => "%",
                    '(' => "(",
                    ')' => ")",
                    '{' => "{",
                    '}' => "}",
                    '[' => "[",
                    ']' => "]",
                    ',' => ",",
                    ';' => ";",
                    ':' => ":",
                    '.' => ".",
                    other => {
                        return Err(ParseError {
                            line,
                            message: format!("unexpected character: {other:?}"),
                        })
                    }
                };
                out.push(Lexed { tok: Tok::Punct(punct), line });
            }
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|l| &l.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|l| l.line)
            .unwrap_or(0)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|l| l.tok.clone());
        self.pos += 1;
        tok
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError { line: self.line(), message: message.into() }
    }

    fn eat_punct(&mut self, p: &'static str) -> bool {
        if self.peek() == Some(&Tok::Punct(p)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &'static str) -> Result<(), ParseError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{p}'")))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(s)) if s == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.bump() {
            Some(Tok::Ident(s)) if !KEYWORDS.contains(&s.as_str()) => Ok(s),
            _ => Err(self.error("expected identifier")),
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.eat_keyword("let") {
            let name = self.expect_ident()?;
            self.expect_punct("=")?;
            let init = self.parse_expr()?;
            self.expect_punct(";")?;
            return Ok(Stmt::Let { name, init });
        }
        if self.eat_keyword("return") {
            if self.eat_punct(";") {
                return Ok(Stmt::Return(None));
            }
            let value = self.parse_expr()?;
            self.expect_punct(";")?;
            return Ok(Stmt::Return(Some(value)));
        }
        if self.eat_keyword("if") {
            self.expect_punct("(")?;
            let cond = self.parse_expr()?;
            self.expect_punct(")")?;
            let then_branch = self.parse_block()?;
            let else_branch = if self.eat_keyword("else") {
                if self.at_keyword("if") {
                    Some(vec![self.parse_stmt()?])
                } else {
                    Some(self.parse_block()?)
                }
            } else {
                None
            };
            return Ok(Stmt::If { cond, then_branch, else_branch });
        }
        if self.eat_keyword("while") {
            self.expect_punct("(")?;
            let cond = self.parse_expr()?;
            self.expect_punct(")")?;
            let body = self.parse_block()?;
            return Ok(Stmt::While { cond, body });
        }
        let expr = self.parse_expr()?;
        self.expect_punct(";")?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.eat_punct("}") {
            if self.peek().is_none() {
                return Err(self.error("unterminated block"));
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_or()?;
        if self.eat_punct("=") {
            if !matches!(lhs, Expr::Ident(_) | Expr::Member { .. }) {
                return Err(self.error("invalid assignment target"));
            }
            let value = self.parse_assign()?;
            return Ok(Expr::Assign { target: Box::new(lhs), value: Box::new(value) });
        }
        Ok(lhs)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(&'static str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.peek() == Some(&Tok::Punct(*punct)) {
                    self.pos += 1;
                    let rhs = next(self)?;
                    lhs = Expr::Binary { op: *op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                    continue 'outer;
                }
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(&[("||", BinOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(&[("&&", BinOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(&[("==", BinOp::Eq), ("!=", BinOp::Ne)], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(
            &[("<=", BinOp::Le), (">=", BinOp::Ge), ("<", BinOp::Lt), (">", BinOp::Gt)],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_punct("!") {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnOp::Not, expr: Box::new(expr) });
        }
        if self.eat_punct("-") {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnOp::Neg, expr: Box::new(expr) });
        }
        if self.eat_keyword("new") {
            return self.parse_new();
        }
        self.parse_postfix()
    }

    /// `new Member.Chain(args)`, then any further postfix on the instance.
    fn parse_new(&mut self) -> Result<Expr, ParseError> {
        let mut callee = self.parse_primary()?;
        while self.eat_punct(".") {
            let prop = self.expect_ident()?;
            callee = Expr::Member { object: Box::new(callee), prop };
        }
        self.expect_punct("(")?;
        let args = self.parse_args()?;
        let instance = Expr::New { callee: Box::new(callee), args };
        self.parse_postfix_chain(instance)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let primary = self.parse_primary()?;
        self.parse_postfix_chain(primary)
    }

    fn parse_postfix_chain(&mut self, mut expr: Expr) -> Result<Expr, ParseError> {
        loop {
            if self.eat_punct(".") {
                let prop = self.expect_ident()?;
                expr = Expr::Member { object: Box::new(expr), prop };
            } else if self.eat_punct("(") {
                let args = self.parse_args()?;
                expr = Expr::Call { callee: Box::new(expr), args };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Arguments after a consumed `(`.
    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("null") {
            return Ok(Expr::Null);
        }
        if self.eat_keyword("undefined") {
            return Ok(Expr::Undefined);
        }
        if self.eat_keyword("true") {
            return Ok(Expr::Bool(true));
        }
        if self.eat_keyword("false") {
            return Ok(Expr::Bool(false));
        }
        if self.eat_keyword("fn") {
            self.expect_punct("(")?;
            let mut params = Vec::new();
            if !self.eat_punct(")") {
                loop {
                    params.push(self.expect_ident()?);
                    if self.eat_punct(")") {
                        break;
                    }
                    self.expect_punct(",")?;
                }
            }
            let body = self.parse_block()?;
            return Ok(Expr::Function { params, body: Rc::new(body) });
        }
        if self.eat_punct("(") {
            let expr = self.parse_expr()?;
            self.expect_punct(")")?;
            return Ok(expr);
        }
        if self.eat_punct("[") {
            let mut items = Vec::new();
            if !self.eat_punct("]") {
                loop {
                    items.push(self.parse_expr()?);
                    if self.eat_punct("]") {
                        break;
                    }
                    self.expect_punct(",")?;
                }
            }
            return Ok(Expr::Array(items));
        }
        if self.eat_punct("{") {
            let mut entries = Vec::new();
            if !self.eat_punct("}") {
                loop {
                    let key = match self.bump() {
                        Some(Tok::Ident(s)) => s,
                        Some(Tok::Str(s)) => s,
                        _ => return Err(self.error("expected property name")),
                    };
                    self.expect_punct(":")?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if self.eat_punct("}") {
                        break;
                    }
                    self.expect_punct(",")?;
                }
            }
            return Ok(Expr::Object(entries));
        }
        match self.bump() {
            Some(Tok::Num(n)) => Ok(Expr::Num(n)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::Ident(s)) if !KEYWORDS.contains(&s.as_str()) => Ok(Expr::Ident(s)),
            _ => Err(self.error("expected expression")),
        }
    }
}

/// Parse a complete script (a module body) into statements.
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_let_and_member_call() {
        let stmts = parse_program("let lib = load(\"mylib\");\nlib.greet(1, \"x\");\n").unwrap();
        assert_eq!(stmts.len(), 2);
        match &stmts[1] {
            Stmt::Expr(Expr::Call { callee, args }) => {
                assert!(matches!(**callee, Expr::Member { .. }));
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_parse_new_with_member_chain() {
        let stmts = parse_program("let c = new lib.Counter(5);").unwrap();
        match &stmts[0] {
            Stmt::Let { init: Expr::New { callee, args }, .. } => {
                assert!(matches!(**callee, Expr::Member { .. }));
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_parse_function_literal_and_while() {
        let source = "let f = fn(x) { return x + 1; };\nwhile (n < 3) { n = f(n); }\n";
        let stmts = parse_program(source).unwrap();
        assert!(matches!(&stmts[0], Stmt::Let { init: Expr::Function { params, .. }, .. } if params.len() == 1));
        assert!(matches!(&stmts[1], Stmt::While { .. }));
    }

    #[test]
    fn test_parse_object_and_array_literals() {
        let stmts = parse_program("exports.cfg = { depth: 2, \"name\": \"a\", items: [1, 2] };").unwrap();
        match &stmts[0] {
            Stmt::Expr(Expr::Assign { value, .. }) => match &**value {
                Expr::Object(entries) => assert_eq!(entries.len(), 3),
                other => panic!("unexpected value: {other:?}"),
            },
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_comments_and_precedence() {
        let stmts = parse_program("// setup\nlet x = 1 + 2 * 3;").unwrap();
        match &stmts[0] {
            Stmt::Let { init: Expr::Binary { op: BinOp::Add, rhs, .. }, .. } => {
                assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_carries_line() {
        let err = parse_program("let x = 1;\nlet = 2;").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_unterminated_string_fails() {
        assert!(parse_program("let s = \"abc;").is_err());
    }
}
