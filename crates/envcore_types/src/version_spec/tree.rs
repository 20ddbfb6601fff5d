//! Tokenizing and treeifying a version-spec expression string.
//!
//! Grounded on `conda/models/version.py`'s `treeify`/`untreeify`, with the
//! token/shunting-yard shape taken from the legacy `rattler` crate's
//! `version_spec/version_tree.rs`, which already implements a two-operator
//! precedence-climbing parse of exactly this kind.

use once_cell::sync::Lazy;
use regex::Regex;
use std::iter::Peekable;
use thiserror::Error;

static VSPEC_TOKENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\^[^$]*[$]|\s*[()|,]|[^()|,]+").expect("valid regex"));

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

/// A parsed, but not yet leaf-classified, version spec expression tree.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RawTree {
    Leaf(String),
    Group(LogicalOp, Vec<RawTree>),
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseTreeError {
    #[error("unbalanced parentheses in version spec")]
    UnbalancedParens,
    #[error("operator in version spec is missing an operand")]
    MissingOperand,
    #[error("unexpected end of version spec")]
    UnexpectedEof,
}

#[derive(Eq, PartialEq, Debug)]
enum RawToken {
    Term(String),
    And,
    Or,
    ParenOpen,
    ParenClose,
}

fn tokenize(input: &str) -> Vec<RawToken> {
    VSPEC_TOKENS
        .find_iter(input)
        .map(|m| match m.as_str().trim_start() {
            "," => RawToken::And,
            "|" => RawToken::Or,
            "(" => RawToken::ParenOpen,
            ")" => RawToken::ParenClose,
            token => RawToken::Term(token.trim().to_string()),
        })
        .collect()
}

fn make_group(term: &mut RawTree, op: LogicalOp) -> &mut Vec<RawTree> {
    let needs_new_group = match term {
        RawTree::Leaf(_) => true,
        RawTree::Group(group_op, _) => *group_op != op,
    };
    if needs_new_group {
        let previous = std::mem::replace(term, RawTree::Group(op, Vec::new()));
        let RawTree::Group(_, vec) = term else {
            unreachable!()
        };
        vec.push(previous);
        vec
    } else {
        let RawTree::Group(_, vec) = term else {
            unreachable!()
        };
        vec
    }
}

fn parse_term<I: Iterator<Item = RawToken>>(
    tokens: &mut Peekable<I>,
) -> Result<RawTree, ParseTreeError> {
    let token = tokens.next().ok_or(ParseTreeError::UnexpectedEof)?;
    match token {
        RawToken::ParenOpen => {
            let group = parse_group(tokens, 2)?;
            match tokens.next() {
                Some(RawToken::ParenClose) => Ok(group),
                _ => Err(ParseTreeError::UnbalancedParens),
            }
        }
        RawToken::Term(term) => Ok(RawTree::Leaf(term)),
        _ => Err(ParseTreeError::MissingOperand),
    }
}

fn op_precedence(op: &LogicalOp) -> u8 {
    match op {
        LogicalOp::And => 1,
        LogicalOp::Or => 2,
    }
}

fn parse_group<I: Iterator<Item = RawToken>>(
    tokens: &mut Peekable<I>,
    max_precedence: u8,
) -> Result<RawTree, ParseTreeError> {
    let mut result = parse_term(tokens)?;
    loop {
        let op = match tokens.peek() {
            Some(RawToken::Or) => LogicalOp::Or,
            Some(RawToken::And) => LogicalOp::And,
            _ => break,
        };
        let precedence = op_precedence(&op);
        if precedence > max_precedence {
            break;
        }
        let _ = tokens.next();
        let next_term = parse_group(tokens, precedence - 1)?;
        let terms = make_group(&mut result, op.clone());
        match next_term {
            RawTree::Group(other_op, mut others) if other_op == op => terms.append(&mut others),
            term => terms.push(term),
        }
    }
    Ok(result)
}

/// Parses a version-spec expression string into a raw, unclassified tree.
pub fn treeify(input: &str) -> Result<RawTree, ParseTreeError> {
    let tokens = tokenize(input);
    if tokens.is_empty() {
        return Err(ParseTreeError::UnexpectedEof);
    }
    let mut iter = tokens.into_iter().peekable();
    let tree = parse_group(&mut iter, 2)?;
    if iter.peek().is_some() {
        return Err(ParseTreeError::UnbalancedParens);
    }
    Ok(tree)
}

/// Reverses [`treeify`], parenthesizing an `Or` only when it occurs inside an
/// `And` or at non-root depth.
pub fn untreeify(tree: &RawTree) -> String {
    untreeify_at(tree, false, 0)
}

fn untreeify_at(tree: &RawTree, in_and: bool, depth: usize) -> String {
    match tree {
        RawTree::Leaf(s) => s.clone(),
        RawTree::Group(LogicalOp::And, children) => children
            .iter()
            .map(|c| untreeify_at(c, true, depth + 1))
            .collect::<Vec<_>>()
            .join(","),
        RawTree::Group(LogicalOp::Or, children) => {
            let joined = children
                .iter()
                .map(|c| untreeify_at(c, false, depth + 1))
                .collect::<Vec<_>>()
                .join("|");
            if in_and || depth > 0 {
                format!("({joined})")
            } else {
                joined
            }
        }
    }
}
