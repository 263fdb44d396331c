//! Literal evaluation.
//!
//! Tokens carry no values; these functions read the lexeme back from the
//! source buffer and evaluate it. Integer literals are range-checked into
//! `i64`, float literals become IEEE 754 binary64 (including C-style hex
//! floats), and character/string literals share one escape decoder.

use porkchop_util::{unicode, Category, Diagnostic, Source};

use crate::token::{Token, TokenKind};

fn const_error(text: &str, token: Token) -> Diagnostic {
    Diagnostic::error(Category::ConstantEval, text, token.segment())
}

/// Evaluates an integer literal token of any base.
pub fn parse_int(source: &Source, token: Token) -> Result<i64, Diagnostic> {
    let base = match token.kind {
        TokenKind::BinaryInteger => 2,
        TokenKind::OctalInteger => 8,
        TokenKind::DecimalInteger => 10,
        TokenKind::HexadecimalInteger => 16,
        _ => unreachable!("not an integer literal"),
    };
    let mut literal: String = source
        .slice(token.line, token.column, token.width)
        .chars()
        .filter(|ch| *ch != '_')
        .collect();
    if base != 10 {
        // drop the 0x / 0o / 0b prefix, keeping a merged sign if present
        let sign = literal.starts_with('+') || literal.starts_with('-');
        let start = usize::from(sign);
        literal.drain(start..start + 2);
    }
    i64::from_str_radix(&literal, base)
        .map_err(|_| const_error("int literal out of range", token))
}

/// Evaluates a floating-point literal token (decimal or hexadecimal).
pub fn parse_float(source: &Source, token: Token) -> Result<f64, Diagnostic> {
    let literal: String = source
        .slice(token.line, token.column, token.width)
        .chars()
        .filter(|ch| *ch != '_')
        .collect();
    let value = if literal.starts_with("0x") || literal.starts_with("0X") {
        parse_hex_float(&literal[2..]).ok_or_else(|| const_error("invalid float literal", token))?
    } else {
        literal
            .parse::<f64>()
            .map_err(|_| const_error("invalid float literal", token))?
    };
    if value.is_infinite() {
        return Err(const_error("float literal out of range", token));
    }
    Ok(value)
}

/// Parses the body of a hexadecimal float: `H[.H]p[±]D`.
fn parse_hex_float(body: &str) -> Option<f64> {
    let (mantissa, exponent) = match body.find(['p', 'P']) {
        Some(split) => {
            let exponent: i32 = body[split + 1..].parse().ok()?;
            (&body[..split], exponent)
        }
        None => (body, 0),
    };
    let (int_part, frac_part) = match mantissa.find('.') {
        Some(dot) => (&mantissa[..dot], &mantissa[dot + 1..]),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut value = 0.0f64;
    for ch in int_part.chars() {
        value = value * 16.0 + ch.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for ch in frac_part.chars() {
        value += ch.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    Some(value * 2f64.powi(exponent))
}

/// Evaluates a character literal token.
pub fn parse_char(source: &Source, token: Token) -> Result<char, Diagnostic> {
    unicode::unquote_char(
        source.slice(token.line, token.column, token.width),
        token.segment(),
    )
}

/// Evaluates a string literal token.
pub fn parse_string(source: &Source, token: Token) -> Result<String, Diagnostic> {
    unicode::unquote_string(
        source.slice(token.line, token.column, token.width),
        token.segment(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn first(text: &str) -> (Source, Token) {
        let source = Source::new(text);
        let token = tokenize(&source).unwrap()[0];
        (source, token)
    }

    #[test]
    fn test_parse_int() {
        let (source, token) = first("1_234");
        assert_eq!(parse_int(&source, token).unwrap(), 1234);
        let (source, token) = first("0xFF");
        assert_eq!(parse_int(&source, token).unwrap(), 255);
        let (source, token) = first("0b1010");
        assert_eq!(parse_int(&source, token).unwrap(), 10);
        let (source, token) = first("0o777");
        assert_eq!(parse_int(&source, token).unwrap(), 0o777);
    }

    #[test]
    fn test_int_out_of_range() {
        let (source, token) = first("9223372036854775808");
        assert!(parse_int(&source, token).is_err());
        let (source, token) = first("9223372036854775807");
        assert_eq!(parse_int(&source, token).unwrap(), i64::MAX);
    }

    #[test]
    fn test_parse_float() {
        let (source, token) = first("3.5");
        assert_eq!(parse_float(&source, token).unwrap(), 3.5);
        let (source, token) = first("1e3");
        assert_eq!(parse_float(&source, token).unwrap(), 1000.0);
        let (source, token) = first("2.5e-1");
        assert_eq!(parse_float(&source, token).unwrap(), 0.25);
    }

    #[test]
    fn test_parse_hex_float() {
        let (source, token) = first("0x1.8p3");
        assert_eq!(parse_float(&source, token).unwrap(), 12.0);
        let (source, token) = first("0x10p0");
        assert_eq!(parse_float(&source, token).unwrap(), 16.0);
    }

    #[test]
    fn test_parse_char_and_string() {
        let (source, token) = first("'\\n'");
        assert_eq!(parse_char(&source, token).unwrap(), '\n');
        let (source, token) = first("\"a\\u01F600b\"");
        assert_eq!(parse_string(&source, token).unwrap(), "a\u{1F600}b");
    }
}
