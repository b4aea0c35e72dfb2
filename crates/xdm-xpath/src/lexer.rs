//! Hand-written tokenizer for XPath expression text.
//!
//! Keywords (`and`, `div`, axis names, ...) are lexed as plain names;
//! the parser disambiguates them by position, since `div` is an
//! operator only where an operator may appear.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    /// Numeric literal, original text preserved for integer/double split.
    Number(String),
    /// String literal with quote escapes already folded.
    StrLit(String),
    /// NCName or lexical QName, including the `p:*` wildcard form.
    Name(String),
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    At,
    Dot,
    DotDot,
    ColonColon,
    Dollar,
    Star,
    Plus,
    Minus,
    Pipe,
    ConcatOp,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    End,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = source.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    toks.push(Tok::DoubleSlash);
                    i += 2;
                } else {
                    toks.push(Tok::Slash);
                    i += 1;
                }
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '@' => {
                toks.push(Tok::At);
                i += 1;
            }
            '$' => {
                toks.push(Tok::Dollar);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    toks.push(Tok::ConcatOp);
                    i += 2;
                } else {
                    toks.push(Tok::Pipe);
                    i += 1;
                }
            }
            '=' => {
                toks.push(Tok::Eq);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Ne);
                    i += 2;
                } else {
                    return Err(Error::Syntax("unexpected '!'".into()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            ':' => {
                if chars.get(i + 1) == Some(&':') {
                    toks.push(Tok::ColonColon);
                    i += 2;
                } else {
                    return Err(Error::Syntax("unexpected ':'".into()));
                }
            }
            '.' => {
                if chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                    let (tok, next) = lex_number(&chars, i);
                    toks.push(tok);
                    i = next;
                } else if chars.get(i + 1) == Some(&'.') {
                    toks.push(Tok::DotDot);
                    i += 2;
                } else {
                    toks.push(Tok::Dot);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let (lit, next) = lex_string(&chars, i, c)?;
                toks.push(Tok::StrLit(lit));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (tok, next) = lex_number(&chars, i);
                toks.push(tok);
                i = next;
            }
            c if is_name_start(c) => {
                let (name, next) = lex_name(&chars, i);
                toks.push(Tok::Name(name));
                i = next;
            }
            other => {
                return Err(Error::Syntax(format!("unexpected character '{other}'")));
            }
        }
    }
    toks.push(Tok::End);
    Ok(toks)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn lex_ncname(chars: &[char], mut i: usize) -> (String, usize) {
    let mut out = String::new();
    while i < chars.len() && is_name_char(chars[i]) {
        out.push(chars[i]);
        i += 1;
    }
    (out, i)
}

/// Lexes an NCName, a lexical QName, or the `prefix:*` wildcard. A `::`
/// after the first NCName is left for the parser (axis separator).
fn lex_name(chars: &[char], i: usize) -> (String, usize) {
    let (mut name, mut i) = lex_ncname(chars, i);
    if chars.get(i) == Some(&':') && chars.get(i + 1) != Some(&':') {
        if chars.get(i + 1) == Some(&'*') {
            name.push_str(":*");
            return (name, i + 2);
        }
        if chars.get(i + 1).is_some_and(|c| is_name_start(*c)) {
            let (local, next) = lex_ncname(chars, i + 1);
            name.push(':');
            name.push_str(&local);
            i = next;
        }
    }
    (name, i)
}

fn lex_number(chars: &[char], mut i: usize) -> (Tok, usize) {
    let mut text = String::new();
    while i < chars.len() && chars[i].is_ascii_digit() {
        text.push(chars[i]);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        text.push('.');
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            text.push(chars[i]);
            i += 1;
        }
    }
    if matches!(chars.get(i), Some('e') | Some('E'))
        && chars
            .get(i + 1)
            .is_some_and(|c| c.is_ascii_digit() || *c == '+' || *c == '-')
    {
        text.push('e');
        i += 1;
        if matches!(chars.get(i), Some('+') | Some('-')) {
            text.push(chars[i]);
            i += 1;
        }
        while i < chars.len() && chars[i].is_ascii_digit() {
            text.push(chars[i]);
            i += 1;
        }
    }
    (Tok::Number(text), i)
}

fn lex_string(chars: &[char], start: usize, quote: char) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            // Doubled quote is an escape for the quote character.
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
            } else {
                return Ok((out, i + 1));
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    Err(Error::Syntax("unterminated string literal".into()))
}
