//! Surface syntax: lexer and reader for PEX programs.
//!
//! The reader produces [`Form`] trees — s-expressions plus the two pieces of
//! surface structure the lowerer wants to see intact: `|` pipelines and
//! `name:` keyword forms (`let:`, `fn:`, and effect invocations). All
//! desugaring happens in the lowerer; this module only deals in shape.
//!
//! Grammar sketch:
//!
//! ```text
//! program  := stmt (';' stmt)* ';'?
//! stmt     := KEYWORD expr* | pipeline
//! pipeline := expr ('|' expr)*
//! expr     := NUMBER | STRING | SYMBOL | '(' list-body ')'
//! list-body := KEYWORD expr* | expr* ('|' expr*)*
//! ```
//!
//! `#` starts a line comment. `true`, `false` and `null` read as literals.

use std::fmt;

/// A parsed surface form, consumed by the lowerer.
#[derive(Debug, Clone, PartialEq)]
pub enum Form {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    /// A bare identifier, including `$`, `$$`, `$N` and operator names.
    Symbol(String),
    /// A `name: args…` form. `name` is stored without the colon.
    Keyword { name: String, args: Vec<Form> },
    /// A parenthesised application `(f a b)`. May be empty; the lowerer
    /// rejects empty lists.
    List(Vec<Form>),
    /// A `a | b | c` chain, two or more stages.
    Pipeline(Vec<Form>),
}

/// A reader error with 1-based line/column.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl ParseError {
    fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses a full program into its top-level statements.
pub fn parse(source: &str) -> Result<Vec<Form>, ParseError> {
    let tokens = lex(source)?;
    Parser { tokens, pos: 0 }.program()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    LParen,
    RParen,
    Pipe,
    Semi,
    Num(f64),
    Str(String),
    Sym(String),
    /// `name:` head; the colon is stripped.
    Keyword(String),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: u32,
    column: u32,
}

fn lex(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;
    let mut column: u32 = 1;

    macro_rules! bump {
        () => {{
            let c = chars.next();
            if c == Some('\n') {
                line += 1;
                column = 1;
            } else if c.is_some() {
                column += 1;
            }
            c
        }};
    }

    while let Some(&c) = chars.peek() {
        let (tok_line, tok_column) = (line, column);
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                bump!();
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    bump!();
                }
            }
            '(' => {
                bump!();
                tokens.push(Token {
                    tok: Tok::LParen,
                    line: tok_line,
                    column: tok_column,
                });
            }
            ')' => {
                bump!();
                tokens.push(Token {
                    tok: Tok::RParen,
                    line: tok_line,
                    column: tok_column,
                });
            }
            '|' => {
                bump!();
                tokens.push(Token {
                    tok: Tok::Pipe,
                    line: tok_line,
                    column: tok_column,
                });
            }
            ';' => {
                bump!();
                tokens.push(Token {
                    tok: Tok::Semi,
                    line: tok_line,
                    column: tok_column,
                });
            }
            '"' => {
                bump!();
                let mut s = String::new();
                loop {
                    match bump!() {
                        None => {
                            return Err(ParseError::new("unterminated string", tok_line, tok_column));
                        }
                        Some('"') => break,
                        Some('\\') => match bump!() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('r') => s.push('\r'),
                            Some('\\') => s.push('\\'),
                            Some('"') => s.push('"'),
                            other => {
                                return Err(ParseError::new(
                                    format!("unknown string escape {other:?}"),
                                    line,
                                    column,
                                ));
                            }
                        },
                        Some(c) => s.push(c),
                    }
                }
                tokens.push(Token {
                    tok: Tok::Str(s),
                    line: tok_line,
                    column: tok_column,
                });
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '|' | ';' | '"' | '#') {
                        break;
                    }
                    word.push(c);
                    bump!();
                }
                let tok = classify_word(&word)
                    .ok_or_else(|| ParseError::new(format!("invalid number '{word}'"), tok_line, tok_column))?;
                tokens.push(Token {
                    tok,
                    line: tok_line,
                    column: tok_column,
                });
            }
        }
    }
    Ok(tokens)
}

/// Classifies a bare word as a number, keyword head, or symbol.
///
/// A word is numeric when it starts with a digit, a sign followed by a
/// digit, or a dot followed by a digit; such a word must then parse as f64.
fn classify_word(word: &str) -> Option<Tok> {
    let mut cs = word.chars();
    let first = cs.next()?;
    let second = cs.next();
    let numeric = first.is_ascii_digit()
        || (matches!(first, '-' | '+') && second.is_some_and(|c| c.is_ascii_digit()))
        || (first == '.' && second.is_some_and(|c| c.is_ascii_digit()));
    if numeric {
        return word.parse::<f64>().ok().map(Tok::Num);
    }
    if word.len() > 1 && word.ends_with(':') {
        return Some(Tok::Keyword(word[..word.len() - 1].to_owned()));
    }
    Some(Tok::Sym(word.to_owned()))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        match self.tokens.get(self.pos.min(self.tokens.len().saturating_sub(1))) {
            Some(t) => ParseError::new(message, t.line, t.column),
            None => ParseError::new(message, 1, 1),
        }
    }

    fn program(&mut self) -> Result<Vec<Form>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            while self.peek() == Some(&Tok::Semi) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Ok(stmts);
            }
            stmts.push(self.statement()?);
            match self.peek() {
                None => return Ok(stmts),
                Some(Tok::Semi) => {}
                Some(_) => return Err(self.error_here("expected ';' between statements")),
            }
        }
    }

    fn statement(&mut self) -> Result<Form, ParseError> {
        if let Some(Tok::Keyword(_)) = self.peek() {
            let Some(Token {
                tok: Tok::Keyword(name),
                ..
            }) = self.next()
            else {
                unreachable!()
            };
            let mut args = Vec::new();
            while !matches!(self.peek(), None | Some(Tok::Semi | Tok::RParen | Tok::Pipe)) {
                args.push(self.expr()?);
            }
            return Ok(Form::Keyword { name, args });
        }
        self.pipeline()
    }

    fn pipeline(&mut self) -> Result<Form, ParseError> {
        let mut stages = vec![self.expr()?];
        while self.peek() == Some(&Tok::Pipe) {
            self.pos += 1;
            stages.push(self.expr()?);
        }
        if stages.len() == 1 {
            Ok(stages.pop().expect("one stage"))
        } else {
            Ok(Form::Pipeline(stages))
        }
    }

    fn expr(&mut self) -> Result<Form, ParseError> {
        let Some(token) = self.next() else {
            return Err(self.error_here("unexpected end of input"));
        };
        match token.tok {
            Tok::Num(n) => Ok(Form::Num(n)),
            Tok::Str(s) => Ok(Form::Str(s)),
            Tok::Sym(s) => Ok(match s.as_str() {
                "true" => Form::Bool(true),
                "false" => Form::Bool(false),
                "null" => Form::Null,
                _ => Form::Symbol(s),
            }),
            Tok::LParen => self.list_body(),
            Tok::Keyword(_) => Err(ParseError::new(
                "keyword form is only valid at statement level or directly after '('",
                token.line,
                token.column,
            )),
            Tok::RParen => Err(ParseError::new("unexpected ')'", token.line, token.column)),
            Tok::Pipe => Err(ParseError::new("unexpected '|'", token.line, token.column)),
            Tok::Semi => Err(ParseError::new("unexpected ';'", token.line, token.column)),
        }
    }

    /// Parses the inside of a parenthesised form, consuming the closing
    /// paren. Handles keyword heads and embedded pipelines.
    fn list_body(&mut self) -> Result<Form, ParseError> {
        if let Some(Tok::Keyword(_)) = self.peek() {
            let Some(Token {
                tok: Tok::Keyword(name),
                ..
            }) = self.next()
            else {
                unreachable!()
            };
            let mut args = Vec::new();
            while self.peek() != Some(&Tok::RParen) {
                if self.peek().is_none() {
                    return Err(self.error_here("unclosed '('"));
                }
                args.push(self.expr()?);
            }
            self.pos += 1; // closing paren
            return Ok(Form::Keyword { name, args });
        }

        // Groups of exprs separated by '|'. One group and no pipe is a
        // plain list; multiple groups form a pipeline whose stages are the
        // single expr or the grouped call.
        let mut groups: Vec<Vec<Form>> = vec![Vec::new()];
        loop {
            match self.peek() {
                None => return Err(self.error_here("unclosed '('")),
                Some(Tok::RParen) => {
                    self.pos += 1;
                    break;
                }
                Some(Tok::Pipe) => {
                    self.pos += 1;
                    groups.push(Vec::new());
                }
                Some(_) => groups.last_mut().expect("group").push(self.expr()?),
            }
        }
        if groups.len() == 1 {
            return Ok(Form::List(groups.pop().expect("group")));
        }
        let mut stages = Vec::with_capacity(groups.len());
        for (i, mut group) in groups.into_iter().enumerate() {
            match group.len() {
                0 => {
                    return Err(self.error_here(format!("empty pipeline stage {}", i + 1)));
                }
                1 => stages.push(group.pop().expect("stage")),
                _ => stages.push(Form::List(group)),
            }
        }
        Ok(Form::Pipeline(stages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Form {
        Form::Symbol(s.to_owned())
    }

    #[test]
    fn atoms() {
        assert_eq!(
            parse("42 ; -1.5 ; \"hi\" ; true ; null").unwrap(),
            vec![
                Form::Num(42.0),
                Form::Num(-1.5),
                Form::Str("hi".into()),
                Form::Bool(true),
                Form::Null,
            ]
        );
    }

    #[test]
    fn operators_are_symbols() {
        assert_eq!(
            parse("(<= n 1)").unwrap(),
            vec![Form::List(vec![sym("<="), sym("n"), Form::Num(1.0)])]
        );
        assert_eq!(parse("??").unwrap(), vec![sym("??")]);
        assert_eq!(parse("$0").unwrap(), vec![sym("$0")]);
    }

    #[test]
    fn statement_pipeline() {
        assert_eq!(
            parse("$$ | lower | trim").unwrap(),
            vec![Form::Pipeline(vec![sym("$$"), sym("lower"), sym("trim")])]
        );
    }

    #[test]
    fn pipeline_in_parens_with_call_stage() {
        assert_eq!(
            parse("($$ | split \" \")").unwrap(),
            vec![Form::Pipeline(vec![
                sym("$$"),
                Form::List(vec![sym("split"), Form::Str(" ".into())]),
            ])]
        );
    }

    #[test]
    fn keyword_forms() {
        assert_eq!(
            parse("let: x 10; (f x)").unwrap(),
            vec![
                Form::Keyword {
                    name: "let".into(),
                    args: vec![sym("x"), Form::Num(10.0)],
                },
                Form::List(vec![sym("f"), sym("x")]),
            ]
        );
        assert_eq!(
            parse("(print: \"a\")").unwrap(),
            vec![Form::Keyword {
                name: "print".into(),
                args: vec![Form::Str("a".into())],
            }]
        );
    }

    #[test]
    fn fn_keyword_with_body() {
        let parsed = parse("fn: add (y) (+ x y)").unwrap();
        assert_eq!(
            parsed,
            vec![Form::Keyword {
                name: "fn".into(),
                args: vec![
                    sym("add"),
                    Form::List(vec![sym("y")]),
                    Form::List(vec![sym("+"), sym("x"), sym("y")]),
                ],
            }]
        );
    }

    #[test]
    fn comments_and_blank_statements() {
        assert_eq!(
            parse("# header\n1 ; ; # trailing\n2").unwrap(),
            vec![Form::Num(1.0), Form::Num(2.0)]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            parse(r#""a\nb\"c\\""#).unwrap(),
            vec![Form::Str("a\nb\"c\\".into())]
        );
    }

    #[test]
    fn errors() {
        assert!(parse("(a b").is_err());
        assert!(parse(")").is_err());
        assert!(parse("\"unterminated").is_err());
        assert!(parse("1 2").is_err()); // missing ';'
        assert!(parse("($$ | | trim)").is_err());
        assert!(parse("1abc").is_err());
    }

    #[test]
    fn error_positions() {
        let err = parse("1;\n   )").unwrap_err();
        assert_eq!((err.line, err.column), (2, 4));
    }
}
