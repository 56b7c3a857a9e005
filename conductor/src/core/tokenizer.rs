//! Argument tokenizer and declared-constraint validator.
//!
//! Splits a raw argument string into named values (`key:value`, `key="v"`,
//! or positional), then applies each declared type/length/pattern constraint.
//! Undeclared names pass through unvalidated; templates may still use them.

use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;

use crate::catalog::{ArgKind, ArgSpec};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("missing required argument '{name}'")]
    MissingRequired { name: String },

    #[error("argument '{name}' exceeds max length {max} (got {len})")]
    TooLong { name: String, max: usize, len: usize },

    #[error("argument '{name}' does not match pattern '{pattern}'")]
    PatternMismatch { name: String, pattern: String },

    #[error("argument '{name}' is not a number: '{value}'")]
    NotANumber { name: String, value: String },

    #[error("argument '{name}' is not a boolean: '{value}'")]
    NotABoolean { name: String, value: String },

    #[error("argument pattern '{pattern}' is not a valid regex")]
    BadPattern { pattern: String },
}

/// One raw token before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgToken {
    pub name: Option<String>,
    pub value: String,
}

/// Split on unquoted whitespace; strip one layer of quotes from values.
pub fn tokenize(raw: &str) -> Vec<ArgToken> {
    let mut tokens = Vec::new();
    for piece in split_unquoted(raw) {
        match split_name(&piece) {
            Some((name, value)) => tokens.push(ArgToken {
                name: Some(name.to_string()),
                value: unquote(value),
            }),
            None => tokens.push(ArgToken {
                name: None,
                value: unquote(&piece),
            }),
        }
    }
    tokens
}

/// Tokenize and validate against the declared specs.
///
/// Positional tokens fill declared names in order; leftovers keep synthetic
/// `argN` names so nothing is silently dropped.
pub fn parse_arguments(
    raw: &str,
    specs: &[ArgSpec],
) -> Result<BTreeMap<String, String>, ArgError> {
    let tokens = tokenize(raw);
    let mut values: BTreeMap<String, String> = BTreeMap::new();

    let named: Vec<&str> = tokens
        .iter()
        .filter_map(|t| t.name.as_deref())
        .collect();
    let mut open_specs = specs
        .iter()
        .filter(|spec| !named.contains(&spec.name.as_str()));

    for (index, token) in tokens.iter().enumerate() {
        let name = match &token.name {
            Some(name) => name.clone(),
            None => match open_specs.next() {
                Some(spec) => spec.name.clone(),
                None => format!("arg{index}"),
            },
        };
        values.insert(name, token.value.clone());
    }

    for spec in specs {
        match values.get(&spec.name) {
            Some(value) => validate_value(spec, value)?,
            None if spec.required => {
                return Err(ArgError::MissingRequired {
                    name: spec.name.clone(),
                });
            }
            None => {}
        }
    }

    Ok(values)
}

fn validate_value(spec: &ArgSpec, value: &str) -> Result<(), ArgError> {
    if let Some(max) = spec.max_len
        && value.len() > max
    {
        return Err(ArgError::TooLong {
            name: spec.name.clone(),
            max,
            len: value.len(),
        });
    }

    match spec.kind {
        ArgKind::String => {}
        ArgKind::Number => {
            if value.parse::<f64>().is_err() {
                return Err(ArgError::NotANumber {
                    name: spec.name.clone(),
                    value: value.to_string(),
                });
            }
        }
        ArgKind::Boolean => {
            if !value.eq_ignore_ascii_case("true") && !value.eq_ignore_ascii_case("false") {
                return Err(ArgError::NotABoolean {
                    name: spec.name.clone(),
                    value: value.to_string(),
                });
            }
        }
    }

    if let Some(pattern) = &spec.pattern {
        let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|_| ArgError::BadPattern {
            pattern: pattern.clone(),
        })?;
        if !re.is_match(value) {
            return Err(ArgError::PatternMismatch {
                name: spec.name.clone(),
                pattern: pattern.clone(),
            });
        }
    }

    Ok(())
}

/// Split into whitespace-separated pieces, keeping quoted runs together.
fn split_unquoted(raw: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut open: Option<char> = None;

    for ch in raw.chars() {
        match open {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    open = None;
                }
            }
            None if ch == '"' || ch == '\'' => {
                current.push(ch);
                open = Some(ch);
            }
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
            }
            None => current.push(ch),
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// `name:value` / `name=value` with an identifier-shaped name.
fn split_name(piece: &str) -> Option<(&str, &str)> {
    let sep = piece.find([':', '='])?;
    let name = &piece[..sep];
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    Some((name, &piece[sep + 1..]))
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_named_and_quoted_values() {
        let tokens = tokenize(r#"topic:'quantum computing' depth="3" fast"#);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].name.as_deref(), Some("topic"));
        assert_eq!(tokens[0].value, "quantum computing");
        assert_eq!(tokens[1].name.as_deref(), Some("depth"));
        assert_eq!(tokens[1].value, "3");
        assert_eq!(tokens[2].name, None);
        assert_eq!(tokens[2].value, "fast");
    }

    #[test]
    fn positional_tokens_fill_declared_names_in_order() {
        let specs = vec![ArgSpec::required("topic"), ArgSpec::optional("depth")];
        let values = parse_arguments("'rust errors' 2", &specs).expect("parse");
        assert_eq!(values["topic"], "rust errors");
        assert_eq!(values["depth"], "2");
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let specs = vec![ArgSpec::required("topic")];
        let err = parse_arguments("", &specs).expect_err("should reject");
        assert_eq!(
            err,
            ArgError::MissingRequired {
                name: "topic".to_string()
            }
        );
    }

    #[test]
    fn number_and_boolean_kinds_validate() {
        let mut depth = ArgSpec::optional("depth");
        depth.kind = ArgKind::Number;
        let mut verbose = ArgSpec::optional("verbose");
        verbose.kind = ArgKind::Boolean;
        let specs = vec![depth, verbose];

        assert!(parse_arguments("depth:2 verbose:true", &specs).is_ok());
        assert!(matches!(
            parse_arguments("depth:deep", &specs),
            Err(ArgError::NotANumber { .. })
        ));
        assert!(matches!(
            parse_arguments("verbose:maybe", &specs),
            Err(ArgError::NotABoolean { .. })
        ));
    }

    #[test]
    fn length_and_pattern_constraints_apply() {
        let mut tag = ArgSpec::optional("tag");
        tag.max_len = Some(4);
        tag.pattern = Some("[a-z]+".to_string());
        let specs = vec![tag];

        assert!(parse_arguments("tag:abc", &specs).is_ok());
        assert!(matches!(
            parse_arguments("tag:abcde", &specs),
            Err(ArgError::TooLong { .. })
        ));
        assert!(matches!(
            parse_arguments("tag:AB", &specs),
            Err(ArgError::PatternMismatch { .. })
        ));
    }

    #[test]
    fn undeclared_names_pass_through() {
        let values = parse_arguments("extra:'kept'", &[]).expect("parse");
        assert_eq!(values["extra"], "kept");
    }
}
