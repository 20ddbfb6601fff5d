//! Parses the `[channel::][namespace/]name[[key=value,...]]` grammar.

use super::{MatchSpec, StringMatcher};
use crate::channel::Channel;
use crate::version_spec::{BuildNumberSpec, VersionSpec};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ParseMatchSpecError {
    #[error("invalid match spec '{0}': empty")]
    Empty(String),
    #[error("invalid match spec '{0}': unterminated '[' bracket")]
    UnterminatedBracket(String),
    #[error("invalid match spec '{0}': malformed key=value field '{1}'")]
    MalformedField(String, String),
    #[error("invalid match spec '{0}': unknown field '{1}'")]
    UnknownField(String, String),
    #[error("invalid match spec '{0}': bad version field: {1}")]
    BadVersion(String, crate::version_spec::ParseVersionSpecError),
    #[error("invalid match spec '{0}': bad build_number field: {1}")]
    BadBuildNumber(String, crate::version_spec::ParseBuildNumberSpecError),
}

/// Splits `value` on `,` while respecting `"`/`'` quoting, so a quoted
/// version expression containing a comma (e.g. `">=1,<2"`) is not split.
fn split_unquoted(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in value.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ',' => {
                parts.push(std::mem::take(&mut current));
            }
            None => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn strip_quotes(value: &str) -> &str {
    let trimmed = value.trim();
    for q in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(q) && trimmed.ends_with(q) {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

fn parse_feature_set(value: &str) -> std::collections::BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_match_spec(input: &str) -> Result<MatchSpec, ParseMatchSpecError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseMatchSpecError::Empty(input.to_string()));
    }

    let (head, bracket) = if let Some(stripped) = trimmed.strip_suffix(']') {
        match stripped.rfind('[') {
            Some(open) => (stripped[..open].trim(), Some(&stripped[open + 1..])),
            None => return Err(ParseMatchSpecError::UnterminatedBracket(input.to_string())),
        }
    } else if trimmed.contains('[') {
        return Err(ParseMatchSpecError::UnterminatedBracket(input.to_string()));
    } else {
        (trimmed, None)
    };

    let mut spec = MatchSpec::default();

    let rest = if let Some(idx) = head.find("::") {
        spec.channel = Some(Channel::from_str(&head[..idx]).expect("Channel::from_str is infallible"));
        &head[idx + 2..]
    } else {
        head
    };

    let rest = if let Some(idx) = rest.find('/') {
        spec.namespace = Some(rest[..idx].to_string());
        &rest[idx + 1..]
    } else {
        rest
    };

    spec.name = if rest.is_empty() || rest == "*" {
        None
    } else {
        Some(StringMatcher::from_str(rest).expect("StringMatcher::from_str is infallible"))
    };

    if let Some(bracket) = bracket {
        for field in split_unquoted(bracket) {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let (key, value) = field.split_once('=').ok_or_else(|| {
                ParseMatchSpecError::MalformedField(input.to_string(), field.to_string())
            })?;
            let key = key.trim();
            let value = strip_quotes(value);
            match key {
                "version" => {
                    spec.version = Some(
                        VersionSpec::from_str(value)
                            .map_err(|e| ParseMatchSpecError::BadVersion(input.to_string(), e))?,
                    )
                }
                "build" => spec.build = Some(StringMatcher::from_str(value).unwrap()),
                "build_number" => {
                    spec.build_number = Some(BuildNumberSpec::from_str(value).map_err(|e| {
                        ParseMatchSpecError::BadBuildNumber(input.to_string(), e)
                    })?)
                }
                "subdir" => spec.subdir = Some(value.to_string()),
                "features" => spec.features = Some(parse_feature_set(value)),
                "track_features" => spec.track_features = Some(parse_feature_set(value)),
                "md5" => spec.md5 = Some(value.to_string()),
                "url" => spec.url = Some(value.to_string()),
                "namespace" => spec.namespace = Some(value.to_string()),
                "channel" => {
                    spec.channel =
                        Some(Channel::from_str(value).expect("Channel::from_str is infallible"))
                }
                other => {
                    return Err(ParseMatchSpecError::UnknownField(
                        input.to_string(),
                        other.to_string(),
                    ))
                }
            }
        }
    }

    Ok(spec)
}
