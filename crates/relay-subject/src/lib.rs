// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subject grammar and wildcard matching for the Relay bus.
//!
//! A *subject* is a dot-separated sequence of 1–8 tokens drawn from
//! `[A-Za-z0-9_-]`, at most 256 characters in total. A *pattern* is a subject
//! where any token may be `*` (matches exactly one token) and the final token
//! may be `>` (matches one or more remaining tokens). Matching is
//! case-sensitive.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use sha2::{Digest, Sha256};

/// Maximum number of dot-separated tokens in a subject or pattern.
pub const MAX_TOKENS: usize = 8;

/// Maximum total length of a subject or pattern in bytes.
pub const MAX_SUBJECT_LEN: usize = 256;

/// Token that matches exactly one arbitrary token.
pub const SINGLE_WILDCARD: &str = "*";

/// Token that matches one or more remaining tokens (tail position only).
pub const TAIL_WILDCARD: &str = ">";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a subject or pattern failed validation.
///
/// All variants surface to clients as the stable `INVALID_SUBJECT` code; the
/// variant carries the human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubjectError {
    /// The input was empty.
    #[error("subject must not be empty")]
    Empty,

    /// The input exceeds [`MAX_SUBJECT_LEN`] bytes.
    #[error("subject exceeds {MAX_SUBJECT_LEN} characters")]
    TooLong,

    /// The input has more than [`MAX_TOKENS`] tokens.
    #[error("subject has {0} tokens, maximum is {MAX_TOKENS}")]
    TooManyTokens(usize),

    /// A token between two dots (or at either end) was empty.
    #[error("empty token at position {0}")]
    EmptyToken(usize),

    /// A token contains a character outside `[A-Za-z0-9_-]`.
    #[error("disallowed character {ch:?} in token '{token}'")]
    DisallowedChar {
        /// The offending token.
        token: String,
        /// The first disallowed character in it.
        ch: char,
    },

    /// A wildcard token appeared in a concrete subject.
    #[error("wildcard '{0}' is not allowed in a concrete subject")]
    WildcardInSubject(String),

    /// `>` appeared somewhere other than the final token.
    #[error("'>' is only allowed as the final token")]
    TailNotLast,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn token_is_plain(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn first_bad_char(token: &str) -> Option<char> {
    token
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-')
}

fn validate_shape(input: &str) -> Result<Vec<&str>, SubjectError> {
    if input.is_empty() {
        return Err(SubjectError::Empty);
    }
    if input.len() > MAX_SUBJECT_LEN {
        return Err(SubjectError::TooLong);
    }
    let tokens: Vec<&str> = input.split('.').collect();
    if tokens.len() > MAX_TOKENS {
        return Err(SubjectError::TooManyTokens(tokens.len()));
    }
    for (i, t) in tokens.iter().enumerate() {
        if t.is_empty() {
            return Err(SubjectError::EmptyToken(i));
        }
    }
    Ok(tokens)
}

/// Validate a concrete subject (no wildcards allowed).
pub fn validate_subject(subject: &str) -> Result<(), SubjectError> {
    let tokens = validate_shape(subject)?;
    for t in tokens {
        if t == SINGLE_WILDCARD || t == TAIL_WILDCARD {
            return Err(SubjectError::WildcardInSubject(t.to_string()));
        }
        if !token_is_plain(t) {
            return Err(SubjectError::DisallowedChar {
                token: t.to_string(),
                ch: first_bad_char(t).unwrap_or('?'),
            });
        }
    }
    Ok(())
}

/// Validate a subscription pattern (`*` anywhere, `>` only as the tail).
pub fn validate_pattern(pattern: &str) -> Result<(), SubjectError> {
    let tokens = validate_shape(pattern)?;
    let last = tokens.len() - 1;
    for (i, t) in tokens.iter().enumerate() {
        if *t == TAIL_WILDCARD {
            if i != last {
                return Err(SubjectError::TailNotLast);
            }
            continue;
        }
        if *t == SINGLE_WILDCARD {
            continue;
        }
        if !token_is_plain(t) {
            return Err(SubjectError::DisallowedChar {
                token: t.to_string(),
                ch: first_bad_char(t).unwrap_or('?'),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Returns `true` if `pattern` matches `subject`.
///
/// Total and pure: unvalidated inputs never panic, they simply fail to match
/// token-wise. `*` consumes exactly one subject token; a trailing `>`
/// consumes one or more remaining tokens. A bare `>` matches any non-empty
/// subject.
pub fn matches(pattern: &str, subject: &str) -> bool {
    if pattern.is_empty() || subject.is_empty() {
        return false;
    }
    let pat: Vec<&str> = pattern.split('.').collect();
    let sub: Vec<&str> = subject.split('.').collect();

    for (i, pt) in pat.iter().enumerate() {
        if *pt == TAIL_WILDCARD {
            // Tail must be final and must have at least one token to consume.
            return i + 1 == pat.len() && sub.len() > i;
        }
        match sub.get(i) {
            None => return false,
            Some(st) => {
                if *pt != SINGLE_WILDCARD && pt != st {
                    return false;
                }
            }
        }
    }
    pat.len() == sub.len()
}

/// Returns `true` if the pattern can only ever match a single subject
/// (contains no wildcard tokens).
pub fn is_literal(pattern: &str) -> bool {
    pattern
        .split('.')
        .all(|t| t != SINGLE_WILDCARD && t != TAIL_WILDCARD)
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Stable 64-bit hash of a subject.
///
/// First eight bytes (big-endian) of SHA-256 over the UTF-8 subject string.
/// Used for budget visited-set membership so envelopes carry hashes rather
/// than raw subject tokens.
pub fn subject_hash(subject: &str) -> u64 {
    let digest = Sha256::digest(subject.as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(first)
}
