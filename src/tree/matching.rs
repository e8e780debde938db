//! Branching components consulted during traversal: matchers, selectors and
//! actions, plus the built-in implementations.

use crate::environment::Environment;
use crate::error::{ConfigurationError, ProcessingError};
use crate::parameters::Parameters;

/// Tests the request against a pattern bound at build time.
pub trait Matcher: Send + Sync {
    /// Captured values on success. The map is pushed for the node's children.
    fn matches(&self, env: &Environment) -> Option<Parameters>;
}

/// Chooses among `when` cases by testing a resolved expression.
pub trait Selector: Send + Sync {
    fn select(&self, expression: &str, env: &Environment, params: &Parameters) -> bool;
}

/// Runs logic during traversal. `Some(map)` lets the children run with `map`
/// pushed; `None` skips them.
pub trait Action: Send + Sync {
    fn act(
        &self,
        env: &mut Environment,
        src: Option<&str>,
        params: &Parameters,
    ) -> Result<Option<Parameters>, ProcessingError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    /// Any run of characters except `/`.
    Star,
    /// Any run of characters.
    DoubleStar,
}

/// URI matcher for `*` and `**` wildcards. `\` escapes the next character.
///
/// Captures are numbered from `1` in pattern order; `0` holds the whole URI.
/// Each wildcard takes the shortest run that still lets the rest match.
#[derive(Debug, Clone)]
pub struct WildcardMatcher {
    pattern: String,
    tokens: Vec<Token>,
}

impl WildcardMatcher {
    pub fn compile(pattern: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(escaped) => literal.push(escaped),
                    None => return Err(invalid("trailing escape character")),
                },
                '*' => {
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    if chars.next_if_eq(&'*').is_some() {
                        if chars.peek() == Some(&'*') {
                            return Err(invalid("more than two consecutive `*`"));
                        }
                        tokens.push(Token::DoubleStar);
                    } else {
                        tokens.push(Token::Star);
                    }
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self {
            pattern: pattern.to_string(),
            tokens,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn match_uri(&self, uri: &str) -> Option<Parameters> {
        let mut captures = Vec::new();
        if !match_tokens(&self.tokens, uri, &mut captures) {
            return None;
        }

        let mut map = Parameters::new().with("0", uri);
        for (index, value) in captures.into_iter().enumerate() {
            map.insert((index + 1).to_string(), value);
        }
        Some(map)
    }
}

fn match_tokens(tokens: &[Token], input: &str, captures: &mut Vec<String>) -> bool {
    let Some((token, rest)) = tokens.split_first() else {
        return input.is_empty();
    };

    match token {
        Token::Literal(literal) => input
            .strip_prefix(literal.as_str())
            .is_some_and(|remaining| match_tokens(rest, remaining, captures)),
        Token::Star | Token::DoubleStar => {
            let crosses_segments = *token == Token::DoubleStar;
            let mut end = 0;
            loop {
                captures.push(input[..end].to_string());
                if match_tokens(rest, &input[end..], captures) {
                    return true;
                }
                captures.pop();

                let Some(next) = input[end..].chars().next() else {
                    return false;
                };
                if next == '/' && !crosses_segments {
                    return false;
                }
                end += next.len_utf8();
            }
        }
    }
}

impl Matcher for WildcardMatcher {
    fn matches(&self, env: &Environment) -> Option<Parameters> {
        self.match_uri(env.uri())
    }
}

/// Selects on a sitemap parameter: the case whose expression equals the
/// `parameter-selector-test` parameter wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterSelector;

impl Selector for ParameterSelector {
    fn select(&self, expression: &str, _env: &Environment, params: &Parameters) -> bool {
        params.get("parameter-selector-test") == Some(expression)
    }
}

/// Selects on a request header named by the `header-name` parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderSelector;

impl Selector for HeaderSelector {
    fn select(&self, expression: &str, env: &Environment, params: &Parameters) -> bool {
        params
            .get("header-name")
            .and_then(|name| env.request_header(name))
            .is_some_and(|value| value == expression)
    }
}
