//! Token kinds and the token record.

use porkchop_util::Segment;

/// The lexical category of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,

    // Keywords
    False,
    True,
    Line,
    Eof,
    Nan,
    Inf,
    While,
    If,
    Else,
    For,
    Fn,
    Break,
    Return,
    Yield,
    As,
    Is,
    Default,
    Let,
    In,
    Sizeof,

    // Brackets
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    /// `@[`, opening a set or dict literal; closed by `]`.
    AtBracket,

    // Operators
    Assign,
    AssignAnd,
    AssignXor,
    AssignOr,
    AssignShl,
    AssignShr,
    AssignUshr,
    AssignAdd,
    AssignSub,
    AssignMul,
    AssignDiv,
    AssignRem,
    LOr,
    LAnd,
    Or,
    Xor,
    And,
    Eq,
    Ne,
    /// `===`, identity equality.
    Eqq,
    /// `!==`, identity inequality.
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Shl,
    Shr,
    Ushr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Not,
    Inv,
    Comma,
    Dollar,
    Inc,
    Dec,
    Dot,
    Colon,
    /// `@@`, the hash-code prefix operator.
    AtAt,

    // Literals
    CharacterLiteral,
    StringLiteral,
    BinaryInteger,
    OctalInteger,
    DecimalInteger,
    HexadecimalInteger,
    FloatingPoint,

    /// Synthetic end-of-line terminator; also produced by `;`.
    Linebreak,
}

/// The keyword table. Lexemes that are not keywords are identifiers.
pub fn keyword(lexeme: &str) -> Option<TokenKind> {
    Some(match lexeme {
        "false" => TokenKind::False,
        "true" => TokenKind::True,
        "__LINE__" => TokenKind::Line,
        "EOF" => TokenKind::Eof,
        "nan" => TokenKind::Nan,
        "inf" => TokenKind::Inf,
        "while" => TokenKind::While,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "fn" => TokenKind::Fn,
        "break" => TokenKind::Break,
        "return" => TokenKind::Return,
        "yield" => TokenKind::Yield,
        "as" => TokenKind::As,
        "is" => TokenKind::Is,
        "default" => TokenKind::Default,
        "let" => TokenKind::Let,
        "in" => TokenKind::In,
        "sizeof" => TokenKind::Sizeof,
        _ => return None,
    })
}

/// Punctuation lexemes. Matching is greediest-first, so longer operators
/// must shadow their prefixes (`>>>=` before `>>>` before `>>` before `>`).
pub const PUNCTUATIONS: &[(&str, TokenKind)] = &[
    (">>>=", TokenKind::AssignUshr),
    ("<<=", TokenKind::AssignShl),
    (">>=", TokenKind::AssignShr),
    (">>>", TokenKind::Ushr),
    ("===", TokenKind::Eqq),
    ("!==", TokenKind::Neq),
    ("&=", TokenKind::AssignAnd),
    ("^=", TokenKind::AssignXor),
    ("|=", TokenKind::AssignOr),
    ("+=", TokenKind::AssignAdd),
    ("-=", TokenKind::AssignSub),
    ("*=", TokenKind::AssignMul),
    ("/=", TokenKind::AssignDiv),
    ("%=", TokenKind::AssignRem),
    ("&&", TokenKind::LAnd),
    ("||", TokenKind::LOr),
    ("==", TokenKind::Eq),
    ("!=", TokenKind::Ne),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("++", TokenKind::Inc),
    ("--", TokenKind::Dec),
    ("@[", TokenKind::AtBracket),
    ("@@", TokenKind::AtAt),
    ("=", TokenKind::Assign),
    ("&", TokenKind::And),
    ("^", TokenKind::Xor),
    ("|", TokenKind::Or),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("+", TokenKind::Add),
    ("-", TokenKind::Sub),
    ("*", TokenKind::Mul),
    ("/", TokenKind::Div),
    ("%", TokenKind::Rem),
    ("!", TokenKind::Not),
    ("~", TokenKind::Inv),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    (":", TokenKind::Colon),
    (";", TokenKind::Linebreak),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    ("$", TokenKind::Dollar),
];

/// A lexical token: a location in the source buffer plus a kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    /// Line the token starts on (0-based).
    pub line: usize,
    /// Byte column within the line.
    pub column: usize,
    /// Byte width of the lexeme.
    pub width: usize,
    pub kind: TokenKind,
}

impl Token {
    /// The source segment this token covers.
    #[inline]
    pub fn segment(self) -> Segment {
        Segment::point(self.line, self.column, self.width)
    }

    /// The segment from the start of `self` to the end of `to`.
    #[inline]
    pub fn to(self, to: Token) -> Segment {
        self.segment().cover(to.segment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(keyword("while"), Some(TokenKind::While));
        assert_eq!(keyword("__LINE__"), Some(TokenKind::Line));
        assert_eq!(keyword("whilex"), None);
        assert_eq!(keyword("_"), None);
    }

    #[test]
    fn test_punctuation_shadowing() {
        // a longer operator must appear before every prefix of itself
        for (i, (lexeme, _)) in PUNCTUATIONS.iter().enumerate() {
            for (j, (other, _)) in PUNCTUATIONS.iter().enumerate() {
                if i != j && other.starts_with(lexeme) {
                    assert!(
                        j < i,
                        "'{other}' must precede its prefix '{lexeme}' in the table"
                    );
                }
            }
        }
    }

    #[test]
    fn test_segment() {
        let token = Token {
            line: 2,
            column: 5,
            width: 3,
            kind: TokenKind::Identifier,
        };
        let segment = token.segment();
        assert_eq!(segment.line1, 2);
        assert_eq!(segment.column1, 5);
        assert_eq!(segment.column2, 8);
    }
}
