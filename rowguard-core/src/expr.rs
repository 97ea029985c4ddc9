//! Parser for two-column relational expressions.
//!
//! Cross-column checks accept expressions such as `"end_date >= start_date"` or
//! `"total = subtotal * 1.1"`. Only a small allow-listed grammar is accepted:
//! identifiers from the declared column set, numeric literals, the operators
//! `+ - * / > < >= <= = !=`, the connectives `AND`/`OR`, and parentheses.
//! Everything else (keywords, string literals, separators, comment markers)
//! is rejected naming the offending token, before any query text is assembled.
//!
//! Successful parses yield a normalized expression with quoted identifiers that
//! is safe to embed directly in a WHERE clause.

use crate::error::ParseError;
use crate::safety::{CONNECTIVE_COST, GROUP_COST, OPERATOR_COST};

/// SQL words that are never valid inside a relational expression.
///
/// These lex as identifiers, but rejecting them as tokens (rather than as
/// unknown columns) keeps the error actionable and the intent obvious.
const REJECTED_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "create", "alter", "truncate", "grant",
    "revoke", "execute", "union", "from", "where", "join", "having", "group", "order", "limit",
    "not", "in", "like", "case", "when", "then", "else", "end", "exists", "between", "is",
    "null", "cast",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Operator(&'static str),
    LParen,
    RParen,
    And,
    Or,
}

/// A validated and normalized relational expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedExpression {
    /// Normalized expression text with quoted identifiers, safe for WHERE
    /// embedding.
    pub normalized: String,
    /// Declared columns the expression references, in declared casing.
    pub columns: Vec<String>,
    /// Accrued complexity score.
    pub complexity_score: u32,
}

/// Parses and validates a relational expression against a declared column set.
///
/// # Arguments
/// * `input` - The expression text
/// * `allowed_columns` - Columns the expression may reference (declared casing)
/// * `complexity_ceiling` - Maximum accepted complexity score
///
/// # Errors
/// Returns a [`ParseError`] naming the offending token, column, or score for
/// any input outside the allow-listed grammar.
pub fn parse_expression(
    input: &str,
    allowed_columns: &[&str],
    complexity_ceiling: u32,
) -> std::result::Result<ParsedExpression, ParseError> {
    let tokens = tokenize(input)?;

    if tokens.is_empty() {
        return Err(ParseError::NoColumnReference);
    }

    let mut depth: i64 = 0;
    let mut score: u32 = 0;
    let mut columns: Vec<String> = Vec::new();
    let mut normalized: Vec<String> = Vec::with_capacity(tokens.len());

    for token in &tokens {
        match token {
            Token::Ident(name) => {
                let declared = allowed_columns
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(name))
                    .ok_or_else(|| ParseError::UnknownColumn {
                        column: name.clone(),
                    })?;
                if !columns.iter().any(|c| c == declared) {
                    columns.push((*declared).to_string());
                }
                normalized.push(format!("\"{}\"", declared.replace('"', "\"\"")));
            }
            Token::Number(text) => normalized.push(text.clone()),
            Token::Operator(op) => {
                score = score.saturating_add(OPERATOR_COST);
                normalized.push((*op).to_string());
            }
            Token::LParen => {
                depth += 1;
                score = score.saturating_add(GROUP_COST);
                normalized.push("(".to_string());
            }
            Token::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(ParseError::UnbalancedParentheses);
                }
                normalized.push(")".to_string());
            }
            Token::And => {
                score = score.saturating_add(CONNECTIVE_COST);
                normalized.push("AND".to_string());
            }
            Token::Or => {
                score = score.saturating_add(CONNECTIVE_COST);
                normalized.push("OR".to_string());
            }
        }
    }

    if depth != 0 {
        return Err(ParseError::UnbalancedParentheses);
    }
    if columns.is_empty() {
        return Err(ParseError::NoColumnReference);
    }
    if score > complexity_ceiling {
        return Err(ParseError::TooComplex {
            score,
            ceiling: complexity_ceiling,
        });
    }

    Ok(ParsedExpression {
        normalized: normalized.join(" "),
        columns,
        complexity_score: score,
    })
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if word.eq_ignore_ascii_case("and") {
                tokens.push(Token::And);
            } else if word.eq_ignore_ascii_case("or") {
                tokens.push(Token::Or);
            } else if REJECTED_KEYWORDS
                .iter()
                .any(|k| k.eq_ignore_ascii_case(&word))
            {
                return Err(ParseError::UnexpectedToken { token: word });
            } else {
                tokens.push(Token::Ident(word));
            }
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            let mut dots = 0;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                if chars[i] == '.' {
                    dots += 1;
                }
                i += 1;
            }
            let number: String = chars[start..i].iter().collect();
            if dots > 1 {
                return Err(ParseError::UnexpectedToken { token: number });
            }
            tokens.push(Token::Number(number));
            continue;
        }

        // Comment markers are rejected as their two-character token, not as
        // a pair of operators.
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            return Err(ParseError::UnexpectedToken {
                token: "--".to_string(),
            });
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            return Err(ParseError::UnexpectedToken {
                token: "/*".to_string(),
            });
        }

        let two: Option<&'static str> = match (c, chars.get(i + 1)) {
            ('>', Some(&'=')) => Some(">="),
            ('<', Some(&'=')) => Some("<="),
            ('!', Some(&'=')) => Some("!="),
            _ => None,
        };
        if let Some(op) = two {
            tokens.push(Token::Operator(op));
            i += 2;
            continue;
        }

        let one: Option<&'static str> = match c {
            '+' => Some("+"),
            '-' => Some("-"),
            '*' => Some("*"),
            '/' => Some("/"),
            '>' => Some(">"),
            '<' => Some("<"),
            '=' => Some("="),
            _ => None,
        };
        if let Some(op) = one {
            tokens.push(Token::Operator(op));
            i += 1;
            continue;
        }

        if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
            continue;
        }

        return Err(ParseError::UnexpectedToken {
            token: c.to_string(),
        });
    }

    Ok(tokens)
}
