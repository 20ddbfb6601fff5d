use super::{Component, Token, Version};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// The regex used to tokenize a single dot-separated component into
/// alternating numeral / wildcard / alphabetic runs.
static COMPONENT_TOKENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+|[*]+|[^0-9*]+").expect("valid regex"));

/// The set of characters a (lowercased) version string may contain.
fn is_valid_char(c: char) -> bool {
    matches!(c, '*' | '.' | '+' | '!' | '_' | '0'..='9' | 'a'..='z')
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionErrorKind {
    #[error("version string is empty")]
    Empty,
    #[error("invalid character '{0}' in version string")]
    InvalidCharacter(char),
    #[error("epoch must be an integer")]
    EpochMustBeInteger,
    #[error("a version component may not be empty")]
    EmptyVersionComponent,
    #[error("'{0}' is not a valid numeral")]
    InvalidNumeral(String),
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("invalid version '{source}': {kind}")]
pub struct ParseVersionError {
    pub source: String,
    pub kind: ParseVersionErrorKind,
}

impl ParseVersionError {
    fn new(source: &str, kind: ParseVersionErrorKind) -> Self {
        Self {
            source: source.to_string(),
            kind,
        }
    }
}

/// Tokenizes one dot-separated (or underscore-separated) piece of a version
/// string, e.g. `"2rc1"` -> `[Numeral(2), Ident("rc"), Numeral(1)]`.
fn tokenize_component(original: &str, part: &str) -> Result<Component, ParseVersionError> {
    if part.is_empty() {
        return Err(ParseVersionError::new(
            original,
            ParseVersionErrorKind::EmptyVersionComponent,
        ));
    }
    let mut tokens = Vec::new();
    for m in COMPONENT_TOKENS.find_iter(part) {
        let text = m.as_str();
        let token = if text.starts_with('*') {
            Token::Wildcard
        } else if text.as_bytes()[0].is_ascii_digit() {
            let n: u64 = text.parse().map_err(|_| {
                ParseVersionError::new(
                    original,
                    ParseVersionErrorKind::InvalidNumeral(text.to_string()),
                )
            })?;
            Token::Numeral(n)
        } else {
            match text {
                "" => Token::Zero,
                "dev" => Token::Dev,
                "post" => Token::Post,
                "rc" => Token::Ident("rc".to_string()),
                other => Token::Ident(other.to_string()),
            }
        };
        tokens.push(token);
    }
    Ok(Component(tokens))
}

/// Splits a release or local segment into dot/underscore-separated
/// [`Component`]s.
fn parse_components(original: &str, segment: &str) -> Result<Vec<Component>, ParseVersionError> {
    segment
        .split(['.', '_'])
        .map(|part| tokenize_component(original, part))
        .collect()
}

pub fn parse_version(input: &str) -> Result<Version, ParseVersionError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseVersionError::new(
            input,
            ParseVersionErrorKind::Empty,
        ));
    }
    let lowered = trimmed.to_lowercase();
    if let Some(bad) = lowered.chars().find(|c| !is_valid_char(*c)) {
        return Err(ParseVersionError::new(
            input,
            ParseVersionErrorKind::InvalidCharacter(bad),
        ));
    }

    let (epoch, rest) = match lowered.split_once('!') {
        Some((epoch_str, rest)) => {
            let epoch = epoch_str.parse::<u64>().map_err(|_| {
                ParseVersionError::new(input, ParseVersionErrorKind::EpochMustBeInteger)
            })?;
            (epoch, rest)
        }
        None => (0, lowered.as_str()),
    };

    let (public, local) = match rest.split_once('+') {
        Some((public, local)) => (public, local),
        None => (rest, ""),
    };

    let release = parse_components(input, public)?;
    let local = if local.is_empty() {
        Vec::new()
    } else {
        parse_components(input, local)?
    };

    Ok(Version {
        epoch,
        release,
        local,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple() {
        let v = parse_version("1.2.3").unwrap();
        assert_eq!(v.epoch(), 0);
        assert_eq!(v.release().len(), 3);
    }

    #[test]
    fn parses_epoch() {
        let v = parse_version("2!1.0").unwrap();
        assert_eq!(v.epoch(), 2);
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_version("").is_err());
        assert!(parse_version("   ").is_err());
    }

    #[test]
    fn rejects_bad_char() {
        let err = parse_version("1.2@3").unwrap_err();
        assert_eq!(
            err.kind,
            ParseVersionErrorKind::InvalidCharacter('@')
        );
    }
}
