use log::trace;

use crate::error::{AtomError, AtomResult};

/// A token produced by the lexer, carrying the source position where it
/// started for syntax errors downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Open,
    Close,
    OpenVector,
    Quote,
    Backquote,
    Comma,
    CommaAt,
    Dot,
    Boolean(bool),
    Number(f64),
    Character(u8),
    Str(String),
    Identifier(String),
}

/// Cursor over the source bytes with line/column tracking.
struct Input<'a> {
    data: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Input<'a> {
    fn new(source: &'a str) -> Self {
        Input {
            data: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: &str) -> AtomError {
        AtomError::Syntax {
            line: self.line,
            column: self.column,
            message: message.to_string(),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\n') => {
                    self.advance();
                }
                Some(b';') => {
                    while let Some(c) = self.advance() {
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }
}

/// Tokenize a whole source text into the token buffer the parser consumes.
pub fn tokenize(source: &str) -> AtomResult<Vec<Token>> {
    let mut input = Input::new(source);
    let mut tokens = Vec::new();

    loop {
        input.skip_whitespace_and_comments();
        let line = input.line;
        let column = input.column;
        let c = match input.peek() {
            Some(c) => c,
            None => break,
        };

        let kind = match c {
            b'(' => {
                input.advance();
                TokenKind::Open
            }
            b')' => {
                input.advance();
                TokenKind::Close
            }
            b'\'' => {
                input.advance();
                TokenKind::Quote
            }
            b'`' => {
                input.advance();
                TokenKind::Backquote
            }
            b'.' => {
                input.advance();
                TokenKind::Dot
            }
            b',' => {
                input.advance();
                if input.peek() == Some(b'@') {
                    input.advance();
                    TokenKind::CommaAt
                } else {
                    TokenKind::Comma
                }
            }
            b'#' => {
                input.advance();
                match input.peek() {
                    Some(b't') => {
                        input.advance();
                        TokenKind::Boolean(true)
                    }
                    Some(b'f') => {
                        input.advance();
                        TokenKind::Boolean(false)
                    }
                    Some(b'(') => {
                        input.advance();
                        TokenKind::OpenVector
                    }
                    Some(b'\\') => {
                        input.advance();
                        read_character(&mut input)?
                    }
                    _ => return Err(input.error("malformed identifier after #")),
                }
            }
            b'"' => read_string(&mut input)?,
            c if c.is_ascii_digit() => read_number(&mut input),
            _ => read_identifier(&mut input)?,
        };

        let token = Token { kind, line, column };
        trace!("token {:?}", token);
        tokens.push(token);
    }

    Ok(tokens)
}

/// A character literal: `#\c`, `#\space` or `#\newline`, which must be
/// followed by a delimiter.
fn read_character(input: &mut Input) -> AtomResult<TokenKind> {
    let c = match input.advance() {
        Some(c) => c,
        None => return Err(input.error("character expected after #\\")),
    };

    // A letter might start a named character; anything else is literal.
    if c.is_ascii_alphabetic() && !is_delimiter(input.peek()) {
        let mut name = vec![c];
        while !is_delimiter(input.peek()) {
            match input.advance() {
                Some(d) => name.push(d),
                None => break,
            }
        }
        return match name.as_slice() {
            b"space" => Ok(TokenKind::Character(b' ')),
            b"newline" => Ok(TokenKind::Character(b'\n')),
            _ => Err(input.error("unknown character name")),
        };
    }

    if is_delimiter(input.peek()) {
        Ok(TokenKind::Character(c))
    } else {
        Err(input.error("delimiter expected"))
    }
}

/// An unsigned decimal integer run. No sign, no fraction, no exponent; the
/// first non-digit ends the token.
fn read_number(input: &mut Input) -> TokenKind {
    let mut accum = 0.0f64;
    while let Some(c) = input.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        input.advance();
        accum = accum * 10.0 + f64::from(c - b'0');
    }
    TokenKind::Number(accum)
}

/// A string literal. `\\` and `\"` are the only escapes; control bytes are
/// rejected.
fn read_string(input: &mut Input) -> AtomResult<TokenKind> {
    input.advance(); // consume '"'
    let mut buffer = String::new();

    loop {
        let c = match input.advance() {
            Some(c) => c,
            None => return Err(input.error("unterminated string")),
        };
        match c {
            b'"' => return Ok(TokenKind::Str(buffer)),
            b'\\' => match input.advance() {
                Some(b'"') => buffer.push('"'),
                Some(b'\\') => buffer.push('\\'),
                _ => return Err(input.error("malformed string")),
            },
            c if (0x20..0x7f).contains(&c) => buffer.push(c as char),
            _ => return Err(input.error("unexpected character in string")),
        }
    }
}

/// An identifier: initial then subsequents, ended by a delimiter; or the
/// peculiar identifiers `+` and `-`.
fn read_identifier(input: &mut Input) -> AtomResult<TokenKind> {
    let c = match input.peek() {
        Some(c) => c,
        None => return Err(input.error("malformed identifier")),
    };

    let mut buffer = String::new();

    if is_initial(c) {
        input.advance();
        buffer.push(c as char);
        loop {
            let next = input.peek();
            if is_delimiter(next) {
                break;
            }
            let d = match next {
                Some(d) if is_subsequent(d) => d,
                _ => return Err(input.error("malformed identifier")),
            };
            input.advance();
            buffer.push(d as char);
        }
    } else if c == b'+' || c == b'-' {
        input.advance();
        buffer.push(c as char);
    } else {
        return Err(input.error("malformed identifier"));
    }

    Ok(TokenKind::Identifier(buffer))
}

fn is_delimiter(c: Option<u8>) -> bool {
    match c {
        None => true,
        Some(c) => matches!(c, b' ' | b'\n' | b'\t' | b'"' | b'(' | b')' | b';'),
    }
}

fn is_initial(c: u8) -> bool {
    c.is_ascii_alphabetic() || is_special_initial(c)
}

fn is_subsequent(c: u8) -> bool {
    is_initial(c) || c.is_ascii_digit() || is_special_subsequent(c)
}

fn is_special_initial(c: u8) -> bool {
    matches!(
        c,
        b'!' | b'$' | b'%' | b'&' | b'*' | b'/' | b':' | b'<' | b'=' | b'>' | b'?' | b'^' | b'_'
            | b'~'
    )
}

fn is_special_subsequent(c: u8) -> bool {
    matches!(c, b'+' | b'-' | b'.' | b'@')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn simple_list_tokens() {
        assert_eq!(
            kinds("(+ 1 23)"),
            vec![
                TokenKind::Open,
                TokenKind::Identifier("+".into()),
                TokenKind::Number(1.0),
                TokenKind::Number(23.0),
                TokenKind::Close,
            ]
        );
    }

    #[test]
    fn abbreviations_and_vectors() {
        assert_eq!(
            kinds("'x `y ,z ,@w #(1)"),
            vec![
                TokenKind::Quote,
                TokenKind::Identifier("x".into()),
                TokenKind::Backquote,
                TokenKind::Identifier("y".into()),
                TokenKind::Comma,
                TokenKind::Identifier("z".into()),
                TokenKind::CommaAt,
                TokenKind::Identifier("w".into()),
                TokenKind::OpenVector,
                TokenKind::Number(1.0),
                TokenKind::Close,
            ]
        );
    }

    #[test]
    fn booleans_and_characters() {
        assert_eq!(
            kinds("#t #f #\\a #\\space #\\newline #\\("),
            vec![
                TokenKind::Boolean(true),
                TokenKind::Boolean(false),
                TokenKind::Character(b'a'),
                TokenKind::Character(b' '),
                TokenKind::Character(b'\n'),
                TokenKind::Character(b'('),
            ]
        );
    }

    #[test]
    fn character_literal_requires_a_delimiter() {
        assert!(matches!(
            tokenize("#\\ab"),
            Err(AtomError::Syntax { .. })
        ));
        assert!(matches!(
            tokenize("#\\spaces"),
            Err(AtomError::Syntax { .. })
        ));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\\b\"c""#),
            vec![TokenKind::Str(r#"a\b"c"#.into())]
        );
        assert!(matches!(tokenize("\"a\\n\""), Err(AtomError::Syntax { .. })));
        assert!(matches!(tokenize("\"open"), Err(AtomError::Syntax { .. })));
    }

    #[test]
    fn peculiar_identifiers() {
        assert_eq!(
            kinds("+ - a->b list->vector set!"),
            vec![
                TokenKind::Identifier("+".into()),
                TokenKind::Identifier("-".into()),
                TokenKind::Identifier("a->b".into()),
                TokenKind::Identifier("list->vector".into()),
                TokenKind::Identifier("set!".into()),
            ]
        );
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        assert_eq!(
            kinds("1 ; the rest of this line vanishes\n2"),
            vec![TokenKind::Number(1.0), TokenKind::Number(2.0)]
        );
        assert_eq!(kinds("  ; only a comment"), vec![]);
    }

    #[test]
    fn errors_carry_line_and_column() {
        match tokenize("(a\n  #q)") {
            Err(AtomError::Syntax { line, column, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(column, 4);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn dot_is_its_own_token() {
        assert_eq!(
            kinds("(1 . 2)"),
            vec![
                TokenKind::Open,
                TokenKind::Number(1.0),
                TokenKind::Dot,
                TokenKind::Number(2.0),
                TokenKind::Close,
            ]
        );
    }
}
