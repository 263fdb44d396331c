//! The line tokenizer.
//!
//! Each logical line is scanned left to right with single-character
//! look-ahead. Bracket nesting is tracked across lines; every line ends in
//! a synthetic linebreak unless it ends with a `\` continuation.

use porkchop_util::{unicode, Category, Diagnostic, Segment, Source};

use crate::token::{keyword, Token, TokenKind, PUNCTUATIONS};

#[inline]
fn is_binary(ch: u8) -> bool {
    ch == b'0' || ch == b'1'
}

#[inline]
fn is_octal(ch: u8) -> bool {
    (b'0'..=b'7').contains(&ch)
}

#[inline]
fn is_decimal(ch: u8) -> bool {
    ch.is_ascii_digit()
}

#[inline]
fn is_hexadecimal(ch: u8) -> bool {
    ch.is_ascii_hexdigit()
}

// not a punctuation: _ #
// unused: ` ?
#[inline]
fn is_punctuation(ch: u8) -> bool {
    matches!(ch,
        b'!' | b'"' | b'@'
        | b'$'..=b'/'
        | b':'..=b'>'
        | b'['..=b'^'
        | b'{'..=b'~')
}

/// Shared state across lines: the token stream and the bracket stack.
#[derive(Default)]
struct LexState {
    tokens: Vec<Token>,
    braces: Vec<Token>,
}

/// Produces the token stream for an entire source buffer.
///
/// On success the stream ends with a linebreak token. On failure exactly
/// one lexical diagnostic is returned, pointing inside the input.
pub fn tokenize(source: &Source) -> Result<Vec<Token>, Diagnostic> {
    let mut state = LexState::default();
    for line in 0..source.line_count() {
        LineTokenizer {
            state: &mut state,
            text: source.line(line),
            line,
            start: 0,
            pos: 0,
        }
        .run()?;
    }
    if let Some(open) = state.braces.last() {
        return Err(Diagnostic::error(
            Category::Lexical,
            "open brace unclosed",
            open.segment(),
        ));
    }
    Ok(state.tokens)
}

struct LineTokenizer<'a> {
    state: &'a mut LexState,
    text: &'a str,
    line: usize,
    /// Start of the current token (byte offset).
    start: usize,
    /// Scan position (byte offset).
    pos: usize,
}

impl<'a> LineTokenizer<'a> {
    fn remains(&self) -> bool {
        self.pos < self.text.len()
    }

    fn getc(&mut self) -> u8 {
        if self.remains() {
            let ch = self.text.as_bytes()[self.pos];
            self.pos += 1;
            ch
        } else {
            0
        }
    }

    fn peekc(&self) -> u8 {
        if self.remains() {
            self.text.as_bytes()[self.pos]
        } else {
            0
        }
    }

    fn ungetc(&mut self) {
        debug_assert!(self.pos > self.start);
        self.pos -= 1;
    }

    fn step(&mut self) {
        self.start = self.pos;
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token {
            line: self.line,
            column: self.start,
            width: self.pos - self.start,
            kind,
        }
    }

    fn raise(&self, msg: &str) -> Diagnostic {
        let width = (self.pos - self.start).max(1);
        Diagnostic::error(
            Category::Lexical,
            msg,
            Segment::point(self.line, self.start, width),
        )
    }

    fn add(&mut self, kind: TokenKind) -> Result<(), Diagnostic> {
        let token = self.make(kind);
        self.state.tokens.push(token);
        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace | TokenKind::AtBracket => {
                self.state.braces.push(token);
            }
            TokenKind::RParen => self.close(token, TokenKind::LParen, "'('", "stray ')'")?,
            TokenKind::RBracket => {
                // both `[` and `@[` are closed by `]`
                match self.state.braces.last() {
                    Some(open)
                        if open.kind == TokenKind::LBracket
                            || open.kind == TokenKind::AtBracket =>
                    {
                        self.state.braces.pop();
                    }
                    Some(open) => {
                        return Err(Diagnostic::error(
                            Category::Lexical,
                            "mismatch braces, '[' is expected",
                            open.to(token),
                        ))
                    }
                    None => {
                        return Err(Diagnostic::error(
                            Category::Lexical,
                            "stray ']'",
                            token.segment(),
                        ))
                    }
                }
            }
            TokenKind::RBrace => self.close(token, TokenKind::LBrace, "'{'", "stray '}'")?,
            _ => {}
        }
        Ok(())
    }

    fn close(
        &mut self,
        token: Token,
        expected: TokenKind,
        open_name: &str,
        stray: &str,
    ) -> Result<(), Diagnostic> {
        match self.state.braces.last() {
            Some(open) if open.kind == expected => {
                self.state.braces.pop();
                Ok(())
            }
            Some(open) => Err(Diagnostic::error(
                Category::Lexical,
                format!("mismatch braces, {open_name} is expected"),
                open.to(token),
            )),
            None => Err(Diagnostic::error(Category::Lexical, stray, token.segment())),
        }
    }

    fn run(mut self) -> Result<(), Diagnostic> {
        while self.remains() {
            let ch = self.getc();
            match ch {
                0 => return Err(self.raise("sourcecode of Porkchop is required to be encoded with UTF-8")),
                b'\\' => {
                    if self.remains() {
                        return Err(self.raise("stray '\\'"));
                    }
                    // continuation: swallow the linebreak of this line
                    return Ok(());
                }
                b'\x0B' | b'\x0C' | b'\t' => {
                    return Err(self.raise("whitespaces other than space are not allowed"))
                }
                b' ' => {}
                b'#' => break, // comment to end of line
                b'\'' => {
                    self.scan_quoted(b'\'', "unterminated character literal")?;
                    self.add(TokenKind::CharacterLiteral)?;
                }
                b'"' => {
                    self.scan_quoted(b'"', "unterminated string literal")?;
                    self.add(TokenKind::StringLiteral)?;
                }
                _ => {
                    self.ungetc();
                    if is_decimal(ch) {
                        self.number()?;
                    } else if is_punctuation(ch) {
                        self.punctuation()?;
                    } else {
                        self.identifier()?;
                    }
                }
            }
            self.step();
        }
        self.add(TokenKind::Linebreak)
    }

    fn identifier(&mut self) -> Result<(), Diagnostic> {
        let mut chars = self.text[self.pos..].char_indices();
        match chars.next() {
            Some((_, ch)) if ch == '\u{FEFF}' => {
                self.pos += ch.len_utf8();
                return Err(self.raise("sourcecode of Porkchop is required to be encoded with UTF-8"));
            }
            Some((_, ch)) if unicode::is_identifier_start(ch) => {
                self.pos += ch.len_utf8();
            }
            Some((_, ch)) => {
                self.pos += ch.len_utf8();
                return Err(self.raise("invalid character"));
            }
            None => return Err(self.raise("invalid character")),
        }
        for (offset, ch) in chars {
            if unicode::is_identifier_part(ch) {
                self.pos = self.start + offset + ch.len_utf8();
            } else {
                break;
            }
        }
        let lexeme = &self.text[self.start..self.pos];
        match keyword(lexeme) {
            Some(kind) => self.add(kind),
            None => self.add(TokenKind::Identifier),
        }
    }

    fn punctuation(&mut self) -> Result<(), Diagnostic> {
        let remains = &self.text[self.pos..];
        for (lexeme, kind) in PUNCTUATIONS {
            if remains.starts_with(lexeme) {
                self.pos += lexeme.len();
                return self.add(*kind);
            }
        }
        self.pos += 1;
        Err(self.raise("invalid punctuation"))
    }

    fn scan_digits(&mut self, pred: fn(u8) -> bool) -> Result<(), Diagnostic> {
        let mut ch = self.getc();
        if !pred(ch) {
            return Err(self.raise("invalid number literal"));
        }
        loop {
            ch = self.getc();
            if ch != b'_' && !pred(ch) {
                break;
            }
        }
        if ch != 0 {
            self.ungetc();
        }
        if self.text.as_bytes()[self.pos - 1] == b'_' {
            return Err(self.raise("invalid number literal"));
        }
        Ok(())
    }

    fn number(&mut self) -> Result<(), Diagnostic> {
        // scan number prefix
        let mut base = TokenKind::DecimalInteger;
        let mut pred: fn(u8) -> bool = is_decimal;
        if self.peekc() == b'0' {
            self.getc();
            match self.peekc() {
                b'x' | b'X' => {
                    base = TokenKind::HexadecimalInteger;
                    pred = is_hexadecimal;
                    self.getc();
                }
                b'o' | b'O' => {
                    base = TokenKind::OctalInteger;
                    pred = is_octal;
                    self.getc();
                }
                b'b' | b'B' => {
                    base = TokenKind::BinaryInteger;
                    pred = is_binary;
                    self.getc();
                }
                ch if is_decimal(ch) => {
                    return Err(self.raise(
                        "redundant 0 ahead is forbidden to avoid ambiguity, use 0o if octal",
                    ))
                }
                _ => self.ungetc(),
            }
        }
        // scan digits
        self.scan_digits(pred)?;
        let mut float = false;
        if self.peekc() == b'.' {
            self.getc();
            if pred(self.peekc()) {
                self.scan_digits(pred)?;
                float = true;
            } else {
                self.ungetc();
            }
        }
        let exponent = match base {
            TokenKind::DecimalInteger => matches!(self.peekc(), b'e' | b'E'),
            TokenKind::HexadecimalInteger => matches!(self.peekc(), b'p' | b'P'),
            _ => false,
        };
        if exponent {
            float = true;
            self.getc();
            if matches!(self.peekc(), b'+' | b'-') {
                self.getc();
            }
            self.scan_digits(is_decimal)?;
        }
        // classification
        let kind = if float {
            match base {
                TokenKind::BinaryInteger | TokenKind::OctalInteger => {
                    return Err(self.raise("binary or octal float literal is invalid"))
                }
                _ => TokenKind::FloatingPoint,
            }
        } else {
            base
        };
        self.add(kind)
    }

    fn scan_quoted(&mut self, quote: u8, message: &str) -> Result<(), Diagnostic> {
        loop {
            match self.getc() {
                0 => return Err(self.raise(message)),
                ch if ch == quote => return Ok(()),
                b'\\' => {
                    if self.getc() == 0 {
                        return Err(self.raise(message));
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(text: &str) -> Vec<TokenKind> {
        tokenize(&Source::new(text))
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn lex_err(text: &str) -> Diagnostic {
        tokenize(&Source::new(text)).unwrap_err()
    }

    #[test]
    fn test_simple_line() {
        assert_eq!(
            lex("let x = 42"),
            vec![
                TokenKind::Let,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::DecimalInteger,
                TokenKind::Linebreak,
            ]
        );
    }

    #[test]
    fn test_greedy_punctuation() {
        assert_eq!(
            lex("a >>>= b"),
            vec![
                TokenKind::Identifier,
                TokenKind::AssignUshr,
                TokenKind::Identifier,
                TokenKind::Linebreak,
            ]
        );
        assert_eq!(lex("a >>> b")[1], TokenKind::Ushr);
        assert_eq!(lex("a >> b")[1], TokenKind::Shr);
        assert_eq!(lex("a === b")[1], TokenKind::Eqq);
        assert_eq!(lex("a == b")[1], TokenKind::Eq);
    }

    #[test]
    fn test_number_bases() {
        assert_eq!(lex("0x1F")[0], TokenKind::HexadecimalInteger);
        assert_eq!(lex("0b1010")[0], TokenKind::BinaryInteger);
        assert_eq!(lex("0o777")[0], TokenKind::OctalInteger);
        assert_eq!(lex("1_000")[0], TokenKind::DecimalInteger);
        assert_eq!(lex("3.14")[0], TokenKind::FloatingPoint);
        assert_eq!(lex("1e9")[0], TokenKind::FloatingPoint);
        assert_eq!(lex("0x1.8p3")[0], TokenKind::FloatingPoint);
    }

    #[test]
    fn test_zero_forms() {
        assert_eq!(lex("0")[0], TokenKind::DecimalInteger);
        assert_eq!(lex("0.5")[0], TokenKind::FloatingPoint);
        assert!(lex_err("0123").primary().contains("redundant 0"));
    }

    #[test]
    fn test_bad_underscores() {
        assert!(tokenize(&Source::new("1_")).is_err());
        assert!(tokenize(&Source::new("0x_1")).is_err());
    }

    #[test]
    fn test_binary_float_rejected() {
        assert!(lex_err("0b1.1").primary().contains("binary or octal"));
    }

    #[test]
    fn test_member_access_on_int() {
        // "1.x" must not eat the dot
        assert_eq!(
            lex("1.f")[..3],
            [TokenKind::DecimalInteger, TokenKind::Dot, TokenKind::Identifier]
        );
    }

    #[test]
    fn test_strings_and_chars() {
        assert_eq!(
            lex("\"hi # there\" 'c'")[..2],
            [TokenKind::StringLiteral, TokenKind::CharacterLiteral]
        );
        assert!(lex_err("\"abc").primary().contains("unterminated string"));
        assert!(lex_err("'a").primary().contains("unterminated character"));
        // escaped quote must not terminate
        assert_eq!(lex("\"a\\\"b\"")[0], TokenKind::StringLiteral);
    }

    #[test]
    fn test_comment() {
        assert_eq!(lex("1 # comment ~~~"), vec![TokenKind::DecimalInteger, TokenKind::Linebreak]);
    }

    #[test]
    fn test_linebreaks() {
        assert_eq!(
            lex("a\nb"),
            vec![
                TokenKind::Identifier,
                TokenKind::Linebreak,
                TokenKind::Identifier,
                TokenKind::Linebreak,
            ]
        );
        // `;` is a linebreak too
        assert_eq!(lex("a; b").iter().filter(|k| **k == TokenKind::Linebreak).count(), 2);
    }

    #[test]
    fn test_continuation() {
        assert_eq!(
            lex("a \\\nb"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Linebreak]
        );
        assert!(lex_err("a \\ b").primary().contains("stray '\\'"));
    }

    #[test]
    fn test_brackets() {
        assert!(tokenize(&Source::new("(a[b]{c})")).is_ok());
        assert!(lex_err("(]").primary().contains("mismatch braces"));
        assert!(lex_err(")").primary().contains("stray"));
        assert!(lex_err("(").primary().contains("open brace unclosed"));
        // @[ closes with ]
        assert!(tokenize(&Source::new("@[1]")).is_ok());
    }

    #[test]
    fn test_unicode_identifier() {
        assert_eq!(lex("变量")[0], TokenKind::Identifier);
        assert_eq!(lex("_x1")[0], TokenKind::Identifier);
    }

    #[test]
    fn test_tab_rejected() {
        // the source buffer expands tabs, so feed the tokenizer state directly
        let mut state = LexState::default();
        let result = LineTokenizer {
            state: &mut state,
            text: "a\tb",
            line: 0,
            start: 0,
            pos: 0,
        }
        .run();
        assert!(result.is_err());
    }

    #[test]
    fn test_ends_with_linebreak() {
        let tokens = tokenize(&Source::new("x")).unwrap();
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Linebreak);
    }
}
