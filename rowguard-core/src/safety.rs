//! Query safety validation for untrusted text destined for query inclusion.
//!
//! Two policy profiles are applied depending on where the text is headed:
//! the condition policy for filter strings that get ANDed into a WHERE clause,
//! and the strict query policy for entire caller-supplied raw queries.
//!
//! The defense is intentionally layered: the keyword blocklist is cheap and
//! catches obvious cases, pattern detection catches idioms the blocklist misses,
//! complexity scoring caps worst-case engine cost, and the read-only SELECT
//! requirement is the last line if a novel idiom slips through the others.
//!
//! Validation is a pure function over text; nothing here touches the engine.

use crate::error::SecurityError;
use regex::Regex;
use std::sync::LazyLock;

/// Cost of one arithmetic or comparison operator.
pub const OPERATOR_COST: u32 = 1;
/// Cost of one parenthesis group.
pub const GROUP_COST: u32 = 1;
/// Cost of one logical connective (AND/OR/NOT).
pub const CONNECTIVE_COST: u32 = 2;
/// Cost of each JOIN in a raw query.
pub const JOIN_COST: u32 = 5;
/// Cost of each subquery (SELECT beyond the first) in a raw query.
pub const SUBQUERY_COST: u32 = 5;
/// Cost of each aggregate function call in a raw query.
pub const AGGREGATE_COST: u32 = 1;
/// Cost of each GROUP BY in a raw query.
pub const GROUP_BY_COST: u32 = 2;

/// Policy profile selecting which rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPolicy {
    /// For condition strings ANDed into a generated WHERE clause.
    Condition,
    /// For entire caller-supplied raw queries. Superset of `Condition`.
    StrictQuery,
}

/// Outcome of validating one piece of untrusted text.
#[derive(Debug, Clone)]
pub struct SecurityVerdict {
    /// Complexity score accrued by the text (0 when scoring was not reached).
    pub complexity_score: u32,
    violation: Option<SecurityError>,
}

impl SecurityVerdict {
    fn allow(complexity_score: u32) -> Self {
        Self {
            complexity_score,
            violation: None,
        }
    }

    fn deny(complexity_score: u32, violation: SecurityError) -> Self {
        Self {
            complexity_score,
            violation: Some(violation),
        }
    }

    /// Whether the text may be included in a query.
    pub fn is_allowed(&self) -> bool {
        self.violation.is_none()
    }

    /// The specific violation behind a denial, if any.
    pub fn denial(&self) -> Option<&SecurityError> {
        self.violation.as_ref()
    }

    /// Converts the verdict into a Result, yielding the complexity score on
    /// allow and the violation on deny.
    pub fn into_result(self) -> std::result::Result<u32, SecurityError> {
        match self.violation {
            None => Ok(self.complexity_score),
            Some(violation) => Err(violation),
        }
    }
}

#[allow(clippy::expect_used)]
fn static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex pattern is valid")
}

/// Data-mutating / DDL keywords denied in any validated text.
static FORBIDDEN_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(
        r"(?i)\b(insert|update|delete|drop|create|alter|truncate|grant|revoke|execute)\b",
    )
});

/// `OR 1=1` style tautology.
static TAUTOLOGY: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?i)\bor\s+1\s*=\s*1\b"));

/// `UNION SELECT` result-set grafting.
static UNION_SELECT: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?i)\bunion\s+(all\s+)?select\b"));

static CONNECTIVES: LazyLock<Regex> = LazyLock::new(|| static_regex(r"(?i)\b(and|or|not)\b"));

static JOINS: LazyLock<Regex> = LazyLock::new(|| static_regex(r"(?i)\bjoin\b"));

static SELECTS: LazyLock<Regex> = LazyLock::new(|| static_regex(r"(?i)\bselect\b"));

static AGGREGATES: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(r"(?i)\b(count|sum|avg|min|max|stddev|median|percentile_cont)\s*\(")
});

static GROUP_BYS: LazyLock<Regex> = LazyLock::new(|| static_regex(r"(?i)\bgroup\s+by\b"));

/// Validates untrusted text against a policy profile.
///
/// Pure function with no execution side effects. Any violation yields an
/// immediate deny carrying the specific reason; otherwise allow.
pub fn validate(text: &str, policy: QueryPolicy, complexity_ceiling: u32) -> SecurityVerdict {
    let trimmed = text.trim_start();

    if policy == QueryPolicy::StrictQuery {
        // A leading comment could mask a different statement, so it is itself
        // a violation rather than something to strip and look behind.
        if trimmed.starts_with("--") || trimmed.starts_with("/*") {
            return SecurityVerdict::deny(0, SecurityError::LeadingComment);
        }
        let first_word = trimmed
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("");
        if !first_word.eq_ignore_ascii_case("select") {
            return SecurityVerdict::deny(
                0,
                SecurityError::NotSelect {
                    found: first_word.to_string(),
                },
            );
        }
    }

    // Mask string literal contents so keyword and idiom scans cannot be fooled
    // by (or trip over) quoted data. Unterminated literals surface here.
    let masked = match mask_string_literals(text) {
        Ok(masked) => masked,
        Err(violation) => return SecurityVerdict::deny(0, violation),
    };

    let mut score = complexity_score(&masked);
    if policy == QueryPolicy::StrictQuery {
        score = score.saturating_add(strict_query_cost(&masked));
    }

    if let Some(violation) = scan_masked(&masked) {
        return SecurityVerdict::deny(score, violation);
    }

    if score > complexity_ceiling {
        return SecurityVerdict::deny(
            score,
            SecurityError::TooComplex {
                score,
                ceiling: complexity_ceiling,
            },
        );
    }

    SecurityVerdict::allow(score)
}

/// Replaces every string literal (quotes included) with spaces.
///
/// Both `'...'` and `"..."` literals are masked, with doubled quotes treated
/// as the standard embedded-quote escape. An unterminated literal is an
/// unbalanced-quotes violation.
fn mask_string_literals(text: &str) -> std::result::Result<String, SecurityError> {
    let mut masked = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' || c == '"' {
            let quote = c;
            let mut closed = false;
            masked.push(' ');
            while let Some(inner) = chars.next() {
                masked.push(' ');
                if inner == quote {
                    if chars.peek() == Some(&quote) {
                        // Doubled quote: escaped, literal continues
                        chars.next();
                        masked.push(' ');
                    } else {
                        closed = true;
                        break;
                    }
                }
            }
            if !closed {
                return Err(SecurityError::UnbalancedQuotes);
            }
        } else {
            masked.push(c);
        }
    }

    Ok(masked)
}

/// Scans masked text for violations common to both policies.
fn scan_masked(masked: &str) -> Option<SecurityError> {
    if masked.contains(';') {
        return Some(SecurityError::StatementSeparator);
    }
    for marker in ["--", "/*"] {
        if masked.contains(marker) {
            return Some(SecurityError::CommentMarker {
                marker: marker.to_string(),
            });
        }
    }
    if let Some(found) = FORBIDDEN_KEYWORDS.find(masked) {
        return Some(SecurityError::ForbiddenKeyword {
            keyword: found.as_str().to_lowercase(),
        });
    }
    if TAUTOLOGY.is_match(masked) {
        return Some(SecurityError::InjectionPattern {
            pattern: "OR 1=1".to_string(),
        });
    }
    if UNION_SELECT.is_match(masked) {
        return Some(SecurityError::InjectionPattern {
            pattern: "UNION SELECT".to_string(),
        });
    }
    if !parentheses_balance(masked) {
        return Some(SecurityError::UnbalancedParentheses);
    }
    None
}

fn parentheses_balance(text: &str) -> bool {
    let mut depth: i64 = 0;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Base complexity of masked text: operators, parenthesis groups, connectives.
///
/// Consecutive operator characters count as a single operator so that `>=`
/// scores the same as `>`.
pub(crate) fn complexity_score(masked: &str) -> u32 {
    let mut score: u32 = 0;
    let mut in_operator = false;
    for c in masked.chars() {
        let is_op = matches!(c, '+' | '-' | '*' | '/' | '=' | '<' | '>' | '!');
        if is_op && !in_operator {
            score = score.saturating_add(OPERATOR_COST);
        }
        in_operator = is_op;
        if c == '(' {
            score = score.saturating_add(GROUP_COST);
        }
    }
    let connectives = CONNECTIVES.find_iter(masked).count() as u32;
    score.saturating_add(connectives.saturating_mul(CONNECTIVE_COST))
}

/// Additional cost charged to raw queries: joins, subqueries, aggregates.
fn strict_query_cost(masked: &str) -> u32 {
    let joins = JOINS.find_iter(masked).count() as u32;
    let selects = SELECTS.find_iter(masked).count() as u32;
    let subqueries = selects.saturating_sub(1);
    let aggregates = AGGREGATES.find_iter(masked).count() as u32;
    let group_bys = GROUP_BYS.find_iter(masked).count() as u32;

    joins
        .saturating_mul(JOIN_COST)
        .saturating_add(subqueries.saturating_mul(SUBQUERY_COST))
        .saturating_add(aggregates.saturating_mul(AGGREGATE_COST))
        .saturating_add(group_bys.saturating_mul(GROUP_BY_COST))
}
