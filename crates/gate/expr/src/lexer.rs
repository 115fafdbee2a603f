use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Symbol(&'static str),
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("'{}'", s),
            Token::Ident(s) => s.clone(),
            Token::Symbol(s) => (*s).to_string(),
        }
    }
}

// Longest symbols first so that `>=` wins over `>`.
const SYMBOLS: &[&str] = &[
    "===", "!==", "&&", "||", "==", "!=", ">=", "<=", ">", "<", "!", "+", "-", "*", "/", "%",
    "(", ")", "[", "]", ",", ".",
];

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch == '\'' || ch == '"' {
            let quote = ch;
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                if c == quote {
                    closed = true;
                    break;
                }
                if c == '\\' {
                    match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, escaped)) => value.push(escaped),
                        None => return Err(ExprError::UnterminatedString),
                    }
                    continue;
                }
                value.push(c);
            }
            if !closed {
                return Err(ExprError::UnterminatedString);
            }
            tokens.push(Token::Str(value));
            continue;
        }

        if ch.is_ascii_digit() {
            let mut literal = String::new();
            let mut seen_dot = false;
            while let Some(&(idx, c)) = chars.peek() {
                if c.is_ascii_digit() {
                    literal.push(c);
                    chars.next();
                } else if c == '.'
                    && !seen_dot
                    && bytes.get(idx + 1).is_some_and(|b| b.is_ascii_digit())
                {
                    seen_dot = true;
                    literal.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal
                .parse::<f64>()
                .map_err(|_| ExprError::InvalidNumber(literal.clone()))?;
            tokens.push(Token::Number(value));
            continue;
        }

        if is_ident_start(ch) {
            let mut value = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if is_ident_char(c) {
                    value.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(value));
            continue;
        }

        let rest = &input[offset..];
        match SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
            Some(symbol) => {
                for _ in 0..symbol.len() {
                    chars.next();
                }
                tokens.push(Token::Symbol(normalize(symbol)));
            }
            None => return Err(ExprError::UnexpectedChar { ch, offset }),
        }
    }

    Ok(tokens)
}

fn normalize(symbol: &'static str) -> &'static str {
    match symbol {
        "===" => "==",
        "!==" => "!=",
        other => other,
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_comparison() {
        let tokens = tokenize("data.amount >= 10.5").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("data".into()),
                Token::Symbol("."),
                Token::Ident("amount".into()),
                Token::Symbol(">="),
                Token::Number(10.5),
            ]
        );
    }

    #[test]
    fn strict_equality_is_normalized() {
        let tokens = tokenize("a === 'x' && b !== \"y\"").unwrap();
        assert!(tokens.contains(&Token::Symbol("==")));
        assert!(tokens.contains(&Token::Symbol("!=")));
        assert!(tokens.contains(&Token::Str("y".into())));
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = tokenize("a = b").unwrap_err();
        assert_eq!(err, ExprError::UnexpectedChar { ch: '=', offset: 2 });
        assert!(tokenize("a; b").is_err());
    }

    #[test]
    fn unterminated_string_fails() {
        assert_eq!(tokenize("'abc").unwrap_err(), ExprError::UnterminatedString);
    }

    #[test]
    fn index_after_number_is_not_fraction() {
        let tokens = tokenize("items[0].x").unwrap();
        assert_eq!(tokens[2], Token::Number(0.0));
        assert_eq!(tokens[4], Token::Symbol("."));
    }
}
