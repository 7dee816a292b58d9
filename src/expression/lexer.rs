//! KaRL tokenizer built from nom combinators.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_until, take_while1},
    character::complete::{char, digit0, digit1, multispace1, not_line_ending, one_of},
    combinator::{map, opt, recognize, value},
    error::{context, VerboseError},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::error::KarlError;

type LexResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Symbol {
    Both,
    ReturnRight,
    Comma,
    Implies,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    Or,
    And,
    Equal,
    NotEqual,
    LessEqual,
    Less,
    GreaterEqual,
    Greater,
    Increment,
    Decrement,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Integer(i64),
    Double(f64),
    Str(String),
    Name(String),
    SystemCall(String),
    Symbol(Symbol),
}

/// A token and its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) offset: usize,
}

fn trivia(input: &str) -> LexResult<()> {
    value(
        (),
        many0(alt((
            multispace1,
            recognize(preceded(tag("//"), not_line_ending)),
            recognize(delimited(tag("/*"), take_until("*/"), tag("*/"))),
        ))),
    )(input)
}

fn number(input: &str) -> LexResult<Token> {
    let (rest, text) = context(
        "number",
        recognize(tuple((
            digit1,
            opt(pair(char('.'), digit0)),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
    )(input)?;

    let token = if text.contains(['.', 'e', 'E']) {
        Token::Double(text.parse().unwrap_or(f64::NAN))
    } else {
        text.parse::<i64>()
            .map_or_else(|_| Token::Double(text.parse().unwrap_or(f64::INFINITY)), Token::Integer)
    };
    Ok((rest, token))
}

fn quoted(quote: char) -> impl FnMut(&str) -> LexResult<String> {
    move |input| {
        let stop = if quote == '"' { "\\\"" } else { "\\'" };
        map(
            delimited(
                char(quote),
                opt(escaped_transform(
                    is_not(stop),
                    '\\',
                    alt((
                        value("\\", tag("\\")),
                        value("\"", tag("\"")),
                        value("'", tag("'")),
                        value("\n", tag("n")),
                        value("\t", tag("t")),
                        value("\r", tag("r")),
                    )),
                )),
                char(quote),
            ),
            Option::unwrap_or_default,
        )(input)
    }
}

fn string(input: &str) -> LexResult<Token> {
    context("string", map(alt((quoted('"'), quoted('\''))), Token::Str))(input)
}

fn system_call(input: &str) -> LexResult<Token> {
    context(
        "system call",
        map(
            recognize(preceded(char('#'), take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'))),
            |name: &str| Token::SystemCall(name.to_string()),
        ),
    )(input)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// Variable names may embed `{...}` interpolation. Inside braces anything
/// goes; brace balance is checked when the variable node is built.
fn raw_name(input: &str) -> LexResult<&str> {
    let starts_name = input
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '.' || c == '{');
    if !starts_name {
        return Err(nom::Err::Error(VerboseError {
            errors: vec![(input, nom::error::VerboseErrorKind::Context("variable name"))],
        }));
    }

    let mut depth = 0usize;
    let mut end = input.len();
    for (pos, c) in input.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ if depth > 0 || is_name_char(c) => {}
            _ => {
                end = pos;
                break;
            }
        }
    }
    Ok((&input[end..], &input[..end]))
}

fn name(input: &str) -> LexResult<Token> {
    map(raw_name, |name: &str| match name {
        "nan" => Token::Double(f64::NAN),
        "inf" => Token::Double(f64::INFINITY),
        other => Token::Name(other.to_string()),
    })(input)
}

fn symbol(input: &str) -> LexResult<Token> {
    let long = alt((
        value(Symbol::ReturnRight, tag(";>")),
        value(Symbol::Implies, tag("=>")),
        value(Symbol::Equal, tag("==")),
        value(Symbol::NotEqual, tag("!=")),
        value(Symbol::LessEqual, tag("<=")),
        value(Symbol::GreaterEqual, tag(">=")),
        value(Symbol::Increment, tag("++")),
        value(Symbol::Decrement, tag("--")),
        value(Symbol::AddAssign, tag("+=")),
        value(Symbol::SubAssign, tag("-=")),
        value(Symbol::MulAssign, tag("*=")),
        value(Symbol::DivAssign, tag("/=")),
        value(Symbol::And, tag("&&")),
        value(Symbol::Or, tag("||")),
    ));
    let short = alt((
        value(Symbol::Both, char(';')),
        value(Symbol::Comma, char(',')),
        value(Symbol::Assign, char('=')),
        value(Symbol::Less, char('<')),
        value(Symbol::Greater, char('>')),
        value(Symbol::Plus, char('+')),
        value(Symbol::Minus, char('-')),
        value(Symbol::Star, char('*')),
        value(Symbol::Slash, char('/')),
        value(Symbol::Percent, char('%')),
        value(Symbol::Not, char('!')),
        value(Symbol::LParen, char('(')),
        value(Symbol::RParen, char(')')),
        value(Symbol::LBracket, char('[')),
        value(Symbol::RBracket, char(']')),
    ));
    context("operator", map(alt((long, short)), Token::Symbol))(input)
}

fn token(input: &str) -> LexResult<Token> {
    alt((number, string, system_call, name, symbol))(input)
}

/// Splits KaRL source into tokens.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, KarlError> {
    let mut tokens = Vec::new();
    let mut input = source;
    loop {
        let (rest, ()) = trivia(input).map_err(|_| unexpected(source, input))?;
        input = rest;
        if input.is_empty() {
            return Ok(tokens);
        }
        let offset = source.len() - input.len();
        let (rest, token) = token(input).map_err(|_| unexpected(source, input))?;
        tokens.push(Spanned { token, offset });
        input = rest;
    }
}

fn unexpected(source: &str, input: &str) -> KarlError {
    let offset = source.len() - input.len();
    let snippet: String = input.chars().take(16).collect();
    KarlError::compile("KaRL lexer", format!("unexpected input at offset {offset}: '{snippet}'"))
}
