//! Row transformer: validates, transforms and renames the fields of one raw
//! row according to a [`ColumnRules`] set.
//!
//! For each field the steps are, in order:
//!
//! 1. resolve the rule (unknown fields get the pass-through default rule),
//! 2. drop the field if the rule discards it,
//! 3. type-check (`bool` values are canonicalized to `true`/`false`),
//! 4. exact length check, in characters,
//! 5. inclusive character range check,
//! 6. render the transform template,
//! 7. store under the target name.
//!
//! Failure handling differs between checks. Under [`FailurePolicy::Reject`]
//! any failing check drops the whole row. Under [`FailurePolicy::Keep`] a
//! type-check failure drops only that field, while a length or range failure
//! leaves the field in the row untouched. A type-check failure on a rule with
//! `allow_empty` is ignored altogether.

mod template;

pub use template::Templates;

use std::collections::BTreeMap;

use tracing::warn;

use crate::core::{ProcessedRow, RawRow};
use crate::error::Result;
use crate::rules::{ColumnRule, ColumnRules, ColumnType, FailurePolicy};

/// Result of type-checking a single value.
#[derive(Debug, PartialEq, Eq)]
enum TypeCheck {
    Valid,
    /// Valid, but stored in canonical form.
    Canonical(&'static str),
    Invalid,
}

/// Process one raw row.
///
/// Returns `Ok(None)` when the row is rejected; rejection is a data outcome,
/// not an error. The only error is a transform render failure, which is a
/// configuration problem and fatal to the run.
pub fn process(raw: RawRow, rules: &ColumnRules) -> Result<Option<ProcessedRow>> {
    let mut fields = BTreeMap::new();

    for (source, mut value) in raw {
        let rule = rules.get(&source);
        if rule.discard {
            continue;
        }

        match check_type(rule.column_type, &value) {
            TypeCheck::Valid => {}
            TypeCheck::Canonical(canonical) => value = canonical.to_string(),
            TypeCheck::Invalid if rule.allow_empty => {
                if rule.column_type == ColumnType::Bool {
                    value = "false".to_string();
                }
            }
            TypeCheck::Invalid => {
                warn!(
                    status = ?rule.failure,
                    column = %source,
                    expecting = ?rule.column_type,
                    value = %value,
                    "Unexpected type when processing field"
                );
                match rule.failure {
                    FailurePolicy::Reject => return Ok(None),
                    FailurePolicy::Keep => continue,
                }
            }
        }

        if !check_length(rule, &value) && rule.failure == FailurePolicy::Reject {
            return Ok(None);
        }
        if !check_range(rule, &value) && rule.failure == FailurePolicy::Reject {
            return Ok(None);
        }

        if rule.template().is_some() {
            value = rules.templates().render(&rule.name, &value)?;
        }

        fields.insert(rule.target_name(&source).to_string(), value);
    }

    Ok(Some(ProcessedRow::from_map(fields)))
}

fn check_type(column_type: ColumnType, value: &str) -> TypeCheck {
    let valid = match column_type {
        ColumnType::String | ColumnType::Variable => true,
        ColumnType::Int => parse_int(value).is_some(),
        ColumnType::Float => value.parse::<f64>().is_ok(),
        ColumnType::Bool => {
            return match parse_bool(value) {
                Some(true) => TypeCheck::Canonical("true"),
                Some(false) => TypeCheck::Canonical("false"),
                None => TypeCheck::Invalid,
            }
        }
    };
    if valid {
        TypeCheck::Valid
    } else {
        TypeCheck::Invalid
    }
}

fn check_length(rule: &ColumnRule, value: &str) -> bool {
    if rule.length == 0 {
        return true;
    }
    let actual = value.chars().count();
    if actual != rule.length {
        warn!(
            column = %rule.name,
            expected_length = rule.length,
            actual_length = actual,
            value = %value,
            "Row length check failed"
        );
        return false;
    }
    true
}

fn check_range(rule: &ColumnRule, value: &str) -> bool {
    let Some((low, high)) = rule.range_bounds() else {
        return true;
    };
    match value.chars().find(|c| *c < low || *c > high) {
        Some(character) => {
            warn!(
                column = %rule.name,
                lo = %low,
                hi = %high,
                character = %character,
                "Character out of range"
            );
            false
        }
        None => true,
    }
}

/// Parse an integer literal with optional sign and base prefix
/// (`0x`, `0o`, `0b`, or a leading `0` for octal). Digit separators (`_`)
/// are accepted only after a base prefix.
fn parse_int(value: &str) -> Option<i64> {
    let (negative, unsigned) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };

    let lower = unsigned.to_ascii_lowercase();
    if !underscores_ok(&lower) {
        return None;
    }
    let (radix, body) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, &lower[1..])
    } else {
        (10, lower.as_str())
    };

    let digits: String = body.chars().filter(|c| *c != '_').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    let magnitude = u64::from_str_radix(&digits, radix).ok()?;
    if negative {
        if magnitude > i64::MAX as u64 + 1 {
            return None;
        }
        Some((magnitude as i64).wrapping_neg())
    } else {
        i64::try_from(magnitude).ok()
    }
}

/// Integer literal separators: each `_` must follow a digit or a base
/// prefix and be followed by a digit. Expects lowercase, unsigned input.
fn underscores_ok(literal: &str) -> bool {
    #[derive(PartialEq)]
    enum Seen {
        Start,
        Digit,
        Underscore,
        Other,
    }

    let bytes = literal.as_bytes();
    let (mut seen, start, hex) = match bytes {
        [b'0', prefix @ (b'x' | b'o' | b'b'), ..] => (Seen::Digit, 2, *prefix == b'x'),
        _ => (Seen::Start, 0, false),
    };

    for &b in &bytes[start..] {
        if b.is_ascii_digit() || (hex && (b'a'..=b'f').contains(&b)) {
            seen = Seen::Digit;
        } else if b == b'_' {
            if seen != Seen::Digit {
                return false;
            }
            seen = Seen::Underscore;
        } else if seen == Seen::Underscore {
            return false;
        } else {
            seen = Seen::Other;
        }
    }
    seen != Seen::Underscore
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
