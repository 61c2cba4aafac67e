//! Tokenizer for the JavaScript subset, generated by logos.

use std::ops::Range;

use logos::Logos;

use crate::error::TransformError;

fn parse_decimal<'src>(lex: &mut logos::Lexer<'src, Token<'src>>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_hex<'src>(lex: &mut logos::Lexer<'src, Token<'src>>) -> Option<f64> {
    u64::from_str_radix(&lex.slice()[2..], 16).ok().map(|n| n as f64)
}

/// Token types. String tokens keep their quotes; the parser unescapes them.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token<'src> {
    // Keywords
    #[token("var")]
    Var,
    #[token("let")]
    Let,
    #[token("const")]
    Const,
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("throw")]
    Throw,
    #[token("typeof")]
    Typeof,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice())]
    Ident(&'src str),

    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", parse_decimal)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", parse_decimal)]
    #[regex(r"0[xX][0-9a-fA-F]+", parse_hex)]
    Number(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| lex.slice())]
    #[regex(r"'([^'\\\n]|\\.)*'", |lex| lex.slice())]
    String(&'src str),

    // Punctuation
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token("=>")]
    Arrow,

    // Assignment
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,

    // Operators
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("===")]
    EqEqEq,
    #[token("!==")]
    NotEqEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Lte,
    #[token(">")]
    Gt,
    #[token(">=")]
    Gte,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("**")]
    StarStar,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("!")]
    Bang,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("??")]
    QuestionQuestion,
}

/// 1-based line and 0-based column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = source[line_start..offset].chars().count();
    (line, column)
}

/// Tokenize the whole source, failing on the first unrecognised input.
pub fn tokenize(source: &str) -> Result<Vec<(Token<'_>, Range<usize>)>, TransformError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                let rest = &source[span.start..];
                let message = match rest.chars().next() {
                    Some('"') | Some('\'') => "Unterminated string constant".to_string(),
                    Some(c) => format!("Unexpected character '{c}'"),
                    None => "Unexpected end of input".to_string(),
                };
                return Err(TransformError::syntax(source, span.start, message));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token<'_>> {
        tokenize(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("let letter = constant"),
            vec![
                Token::Let,
                Token::Ident("letter"),
                Token::Assign,
                Token::Ident("constant"),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 .5 1e3 0xff"),
            vec![
                Token::Number(1.0),
                Token::Number(2.5),
                Token::Number(0.5),
                Token::Number(1000.0),
                Token::Number(255.0),
            ]
        );
    }

    #[test]
    fn test_longest_operator_wins() {
        assert_eq!(
            kinds("a === b !== c ** d => ??"),
            vec![
                Token::Ident("a"),
                Token::EqEqEq,
                Token::Ident("b"),
                Token::NotEqEq,
                Token::Ident("c"),
                Token::StarStar,
                Token::Ident("d"),
                Token::Arrow,
                Token::QuestionQuestion,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("1 // line\n/* block ** */ + 2"),
            vec![Token::Number(1.0), Token::Plus, Token::Number(2.0)]
        );
    }

    #[test]
    fn test_strings_keep_quotes() {
        assert_eq!(
            kinds(r#""a\"b" 'c'"#),
            vec![Token::String(r#""a\"b""#), Token::String("'c'")]
        );
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("1 + #").unwrap_err();
        assert_eq!(err.to_string(), "Unexpected character '#' (1:4)");
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("let s = \"oops").unwrap_err();
        assert!(err.to_string().starts_with("Unterminated string constant"));
    }

    #[test]
    fn test_line_col() {
        let src = "a\nbc\nd";
        assert_eq!(line_col(src, 0), (1, 0));
        assert_eq!(line_col(src, 3), (2, 1));
        assert_eq!(line_col(src, 5), (3, 0));
        assert_eq!(line_col(src, 99), (3, 1));
    }
}
