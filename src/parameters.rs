//! Parameter maps and sitemap variable expressions.
//!
//! Matchers and actions produce maps that are pushed onto a stack while their
//! children run. Expressions such as `docs/{1}.xml` or `{../name}` are parsed
//! once when the tree is built and resolved against that stack per request.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::ConfigurationError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(value) => matches!(value.trim(), "true" | "yes" | "on" | "1"),
            None => default,
        }
    }

    /// Parse an integer parameter; unparsable values fall back to `default`.
    pub fn get_i64(&self, name: &str, default: i64) -> i64 {
        self.get(name)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy every entry of `other` over this map.
    pub fn merge(&mut self, other: &Parameters) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable { levels_up: usize, name: String },
}

/// A pre-parsed `{...}` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableResolver {
    expression: String,
    segments: Vec<Segment>,
}

impl VariableResolver {
    pub fn parse(expression: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = expression.chars();

        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(escaped) => literal.push(escaped),
                    None => literal.push('\\'),
                },
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(invalid("nested `{` is not allowed")),
                            other => body.push(other),
                        }
                    }
                    if !closed {
                        return Err(invalid("unterminated `{`"));
                    }

                    let mut levels_up = 0;
                    let mut name = body.as_str();
                    while let Some(rest) = name.strip_prefix("../") {
                        levels_up += 1;
                        name = rest;
                    }
                    if name.is_empty() {
                        return Err(invalid("empty variable name"));
                    }

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable {
                        levels_up,
                        name: name.to_string(),
                    });
                }
                '}' => return Err(invalid("unbalanced `}`")),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            expression: expression.to_string(),
            segments,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Resolve against `stack`, innermost map last. Unknown variables resolve
    /// to the empty string.
    pub fn resolve(&self, stack: &[Parameters]) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable { levels_up, name } => {
                    let value = stack
                        .len()
                        .checked_sub(levels_up + 1)
                        .and_then(|index| stack.get(index))
                        .and_then(|map| map.get(name));
                    match value {
                        Some(value) => out.push_str(value),
                        None => debug!(
                            expression = %self.expression,
                            variable = %name,
                            levels_up,
                            "unresolved sitemap variable"
                        ),
                    }
                }
            }
        }
        out
    }
}

/// Named parameter expressions attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterTemplates(Vec<(String, VariableResolver)>);

impl ParameterTemplates {
    pub fn parse<'a, I>(entries: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        entries
            .into_iter()
            .map(|(name, expr)| Ok((name.to_string(), VariableResolver::parse(expr)?)))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn resolve(&self, stack: &[Parameters]) -> Parameters {
        self.0
            .iter()
            .map(|(name, resolver)| (name.clone(), resolver.resolve(stack)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> Vec<Parameters> {
        vec![
            Parameters::new().with("1", "outer").with("lang", "en"),
            Parameters::new().with("1", "inner").with("0", "docs/inner"),
        ]
    }

    #[test]
    fn resolves_innermost_and_parent_levels() {
        let resolver = VariableResolver::parse("{../1}/{1}.{../lang}").expect("valid");
        assert_eq!(resolver.resolve(&stack()), "outer/inner.en");
    }

    #[test]
    fn static_expressions_are_detected() {
        let resolver = VariableResolver::parse("content/index.xml").expect("valid");
        assert!(resolver.is_static());
        assert_eq!(resolver.resolve(&[]), "content/index.xml");
    }

    #[test]
    fn escaped_braces_are_literal() {
        let resolver = VariableResolver::parse(r"\{1\}-{1}").expect("valid");
        assert_eq!(resolver.resolve(&stack()), "{1}-inner");
    }

    #[test]
    fn missing_variables_resolve_empty() {
        let resolver = VariableResolver::parse("a{missing}b{../../../1}c").expect("valid");
        assert_eq!(resolver.resolve(&stack()), "abc");
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for expr in ["{1", "{}", "a}b", "{a{b}}", "{../}"] {
            let err = VariableResolver::parse(expr).expect_err(expr);
            assert!(matches!(err, ConfigurationError::InvalidExpression { .. }));
        }
    }

    #[test]
    fn parameter_helpers_parse_values() {
        let params = Parameters::new()
            .with("expires", "180")
            .with("purge", "true")
            .with("bad", "x");
        assert_eq!(params.get_i64("expires", 0), 180);
        assert_eq!(params.get_i64("bad", -1), -1);
        assert!(params.get_bool("purge", false));
        assert!(!params.get_bool("absent", false));
    }

    #[test]
    fn templates_resolve_to_parameters() {
        let templates =
            ParameterTemplates::parse([("page", "{1}"), ("static", "yes")]).expect("valid");
        let resolved = templates.resolve(&stack());
        assert_eq!(resolved.get("page"), Some("inner"));
        assert_eq!(resolved.get("static"), Some("yes"));
    }
}
