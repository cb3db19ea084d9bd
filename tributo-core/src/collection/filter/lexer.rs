//! Tokenizer for filter expressions.

use crate::collection::error::{CollectionError, Result};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace1, one_of, satisfy},
    combinator::{map_res, not, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, terminated, tuple},
    IResult,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    And,
    Or,
    Not,
    Like,
    Ilike,
    In,
    Is,
    Null,
    True,
    False,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the source expression.
    pub offset: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut remaining = input;

    while !remaining.is_empty() {
        if let Ok((rest, _)) = multispace1::<_, nom::error::Error<_>>(remaining) {
            remaining = rest;
            continue;
        }

        let offset = input.len() - remaining.len();
        match parse_token(remaining) {
            Ok((rest, kind)) => {
                tokens.push(Token { kind, offset });
                remaining = rest;
            }
            Err(_) => return Err(lex_error(remaining, offset)),
        }
    }

    Ok(tokens)
}

fn lex_error(remaining: &str, offset: usize) -> CollectionError {
    let starts_number = |s: &str| s.starts_with(|c: char| c.is_ascii_digit());
    let message = match remaining.chars().next() {
        Some('\'' | '"') => format!("unterminated quoted literal starting at offset {}", offset),
        Some(c) if starts_number(remaining) || (c == '-' && starts_number(&remaining[1..])) => {
            format!("invalid number at offset {}", offset)
        }
        Some(c) => format!("unexpected character '{}' at offset {}", c, offset),
        None => format!("unexpected end of input at offset {}", offset),
    };
    CollectionError::InvalidPredicate(message)
}

fn parse_token(input: &str) -> IResult<&str, TokenKind> {
    alt((parse_keyword, parse_number, parse_string, parse_identifier, parse_operator))(input)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// Succeeds without consuming when no identifier character follows.
fn word_end(input: &str) -> IResult<&str, ()> {
    not(satisfy(is_word_char))(input)
}

fn keyword<'a>(word: &'static str, kind: TokenKind) -> impl FnMut(&'a str) -> IResult<&'a str, TokenKind> {
    value(kind, terminated(tag_no_case(word), word_end))
}

fn parse_keyword(input: &str) -> IResult<&str, TokenKind> {
    alt((
        keyword("AND", TokenKind::And),
        keyword("OR", TokenKind::Or),
        keyword("NOT", TokenKind::Not),
        keyword("LIKE", TokenKind::Like),
        keyword("ILIKE", TokenKind::Ilike),
        keyword("IN", TokenKind::In),
        keyword("IS", TokenKind::Is),
        keyword("NULL", TokenKind::Null),
        keyword("TRUE", TokenKind::True),
        keyword("FALSE", TokenKind::False),
    ))(input)
}

fn parse_number(input: &str) -> IResult<&str, TokenKind> {
    let literal = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )));
    map_res(literal, |text: &str| {
        if text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
            text.parse::<f64>().map(TokenKind::Float).map_err(|_| ())
        } else {
            text.parse::<i64>().map(TokenKind::Int).map_err(|_| ())
        }
    })(input)
}

/// Body of a `quote`-delimited literal; a doubled quote escapes itself.
fn quoted(input: &str, quote: char) -> IResult<&str, String> {
    let escape = if quote == '\'' { "''" } else { "\"\"" };
    let (rest, body) = delimited(
        char(quote),
        recognize(many0(alt((tag(escape), take_while1(|c: char| c != quote))))),
        char(quote),
    )(input)?;
    Ok((rest, body.replace(escape, &quote.to_string())))
}

fn parse_string(input: &str) -> IResult<&str, TokenKind> {
    let (rest, text) = quoted(input, '\'')?;
    Ok((rest, TokenKind::Str(text)))
}

fn parse_identifier(input: &str) -> IResult<&str, TokenKind> {
    if let Ok((rest, name)) = quoted(input, '"') {
        return Ok((rest, TokenKind::Ident(name)));
    }

    let (rest, name) = recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(is_word_char),
    ))(input)?;
    Ok((rest, TokenKind::Ident(name.to_string())))
}

fn parse_operator(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::Le, tag("<=")),
        value(TokenKind::Ge, tag(">=")),
        value(TokenKind::Ne, tag("<>")),
        value(TokenKind::Ne, tag("!=")),
        value(TokenKind::Eq, char('=')),
        value(TokenKind::Lt, char('<')),
        value(TokenKind::Gt, char('>')),
        value(TokenKind::LParen, char('(')),
        value(TokenKind::RParen, char(')')),
        value(TokenKind::Comma, char(',')),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        assert_eq!(
            kinds("ano >= 2010 and vigente = true"),
            vec![
                TokenKind::Ident("ano".into()),
                TokenKind::Ge,
                TokenKind::Int(2010),
                TokenKind::And,
                TokenKind::Ident("vigente".into()),
                TokenKind::Eq,
                TokenKind::True,
            ]
        );
    }

    #[test]
    fn test_tokenize_strings_and_escapes() {
        assert_eq!(
            kinds("text LIKE '%d''água%'"),
            vec![
                TokenKind::Ident("text".into()),
                TokenKind::Like,
                TokenKind::Str("%d'água%".into()),
            ]
        );
        assert_eq!(kinds("\"source file\" <> 'x'")[0], TokenKind::Ident("source file".into()));
    }

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(kinds("-3 0.25"), vec![TokenKind::Int(-3), TokenKind::Float(0.25)]);
        assert_eq!(
            kinds("1e20 -2.5E-7 3e+2"),
            vec![TokenKind::Float(1e20), TokenKind::Float(-2.5e-7), TokenKind::Float(300.0)]
        );
    }

    #[test]
    fn test_keywords_need_word_boundaries() {
        assert_eq!(
            kinds("nota = 1 or isento = TRUE"),
            vec![
                TokenKind::Ident("nota".into()),
                TokenKind::Eq,
                TokenKind::Int(1),
                TokenKind::Or,
                TokenKind::Ident("isento".into()),
                TokenKind::Eq,
                TokenKind::True,
            ]
        );
        assert_eq!(kinds("Vigente iLiKe ''"), vec![
            TokenKind::Ident("Vigente".into()),
            TokenKind::Ilike,
            TokenKind::Str(String::new()),
        ]);
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(matches!(tokenize("a = 'open"), Err(CollectionError::InvalidPredicate(_))));
        assert!(matches!(tokenize("a ; b"), Err(CollectionError::InvalidPredicate(_))));
        assert!(matches!(
            tokenize("ano = 99999999999999999999"),
            Err(CollectionError::InvalidPredicate(msg)) if msg.contains("invalid number")
        ));
    }
}
