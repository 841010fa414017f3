//! Semantic equality.
//!
//! Attributes may carry a [`SemanticEquality`] predicate. After a provider
//! returns new data, [`schema_semantic_equality`] compares it with the prior
//! data and keeps the prior value wherever the predicate reports the two as
//! equivalent, so cosmetic differences such as `"1"` versus `"1.0"` do not
//! show up as changes.

use std::collections::BTreeMap;
use std::fmt;

use tracing::trace;

use crate::diag::Diagnostics;
use crate::logging::KEY_ATTRIBUTE_PATH;
use crate::path::AttributePath;
use crate::schema::{Attribute, Block, NestedBlock, NestingMode, Schema};
use crate::value::Value;

/// A predicate deciding whether two known values are equivalent.
pub trait SemanticEquality: Send + Sync + fmt::Debug {
    /// Compare `prior` with `proposed`. Both values are known.
    fn equal(&self, prior: &Value, proposed: &Value) -> (bool, Diagnostics);
}

/// Strings holding decimal numbers compare by exact numeric value.
///
/// `"1"`, `"1.0"` and `"1e0"` are equal; no precision is lost, so
/// `"9007199254740993"` and `"9007199254740992"` are not.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericStringEquality;

impl SemanticEquality for NumericStringEquality {
    fn equal(&self, prior: &Value, proposed: &Value) -> (bool, Diagnostics) {
        let mut diags = Diagnostics::new();
        let (Some(prior), Some(proposed)) = (prior.as_str(), proposed.as_str()) else {
            return (false, diags);
        };

        match (Decimal::parse(prior.trim()), Decimal::parse(proposed.trim())) {
            (Ok(a), Ok(b)) => (a == b, diags),
            (_, Err(e)) | (Err(e), _) => {
                diags.add_error(
                    "Semantic Equality Check Error",
                    format!(
                        "An unexpected error occurred while performing semantic equality checks. \
                         Please report this to the provider developers.\n\n\
                         Error: cannot parse numeric string: {}",
                        e
                    ),
                );
                (false, diags)
            },
        }
    }
}

/// A decimal number as `digits * 10^exponent`, with no leading or trailing
/// zeros in `digits`. Zero has empty digits.
#[derive(Debug, PartialEq, Eq)]
struct Decimal {
    negative: bool,
    digits: String,
    exponent: i64,
}

impl Decimal {
    fn parse(text: &str) -> Result<Self, String> {
        let invalid = || format!("{:?} is not a decimal number", text);

        let (negative, unsigned) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
            Some(at) => {
                let exponent = unsigned[at + 1..].parse::<i64>().map_err(|_| invalid())?;
                (&unsigned[..at], exponent)
            },
            None => (unsigned, 0),
        };
        let (integer, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (integer.is_empty() && fraction.is_empty()) || !all_digits(integer) || !all_digits(fraction) {
            return Err(invalid());
        }

        let fraction_len = i64::try_from(fraction.len()).map_err(|_| invalid())?;
        let mut exponent = exponent.checked_sub(fraction_len).ok_or_else(invalid)?;

        let joined = format!("{}{}", integer, fraction);
        let significant = joined.trim_start_matches('0');
        let digits = significant.trim_end_matches('0');
        let trailing = i64::try_from(significant.len() - digits.len()).map_err(|_| invalid())?;
        exponent = exponent.checked_add(trailing).ok_or_else(invalid)?;

        if digits.is_empty() {
            return Ok(Self {
                negative: false,
                digits: String::new(),
                exponent: 0,
            });
        }
        Ok(Self {
            negative,
            digits: digits.to_string(),
            exponent,
        })
    }
}

/// Strings holding JSON documents compare structurally.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStringEquality;

impl SemanticEquality for JsonStringEquality {
    fn equal(&self, prior: &Value, proposed: &Value) -> (bool, Diagnostics) {
        let mut diags = Diagnostics::new();
        let (Some(prior), Some(proposed)) = (prior.as_str(), proposed.as_str()) else {
            return (false, diags);
        };

        let parsed = serde_json::from_str::<serde_json::Value>(prior)
            .and_then(|a| serde_json::from_str::<serde_json::Value>(proposed).map(|b| (a, b)));

        match parsed {
            Ok((a, b)) => (a == b, diags),
            Err(e) => {
                diags.add_error(
                    "Semantic Equality Check Error",
                    format!(
                        "An unexpected error occurred while performing semantic equality checks. \
                         Please report this to the provider developers.\n\n\
                         Error: invalid JSON string: {}",
                        e
                    ),
                );
                (false, diags)
            },
        }
    }
}

/// Run every semantic equality predicate of `schema` over `proposed`.
///
/// Returns the proposed value with prior values substituted where a predicate
/// found them equal. Where a predicate reports an error, the proposed value
/// is kept.
pub fn schema_semantic_equality(schema: &Schema, prior: &Value, proposed: &Value) -> (Value, Diagnostics) {
    let mut diags = Diagnostics::new();
    let value = block_value(
        &schema.block,
        prior,
        proposed,
        &AttributePath::empty(),
        &mut diags,
    );
    (value, diags)
}

fn block_value(
    block: &Block,
    prior: &Value,
    proposed: &Value,
    path: &AttributePath,
    diags: &mut Diagnostics,
) -> Value {
    object_value(&block.attributes, Some(&block.blocks), prior, proposed, path, diags)
}

fn object_value(
    attributes: &BTreeMap<String, Attribute>,
    blocks: Option<&BTreeMap<String, NestedBlock>>,
    prior: &Value,
    proposed: &Value,
    path: &AttributePath,
    diags: &mut Diagnostics,
) -> Value {
    let (Value::Map(prior_entries), Value::Map(proposed_entries)) = (prior, proposed) else {
        return proposed.clone();
    };

    let entries = proposed_entries
        .iter()
        .map(|(name, proposed)| {
            let child_path = path.clone().attribute(name);
            let value = match (prior_entries.get(name), attributes.get(name)) {
                (Some(prior), Some(attr)) => attribute_value(attr, prior, proposed, &child_path, diags),
                (Some(prior), None) => match blocks.and_then(|b| b.get(name)) {
                    Some(block) => nested_block_value(block, prior, proposed, &child_path, diags),
                    None => proposed.clone(),
                },
                (None, _) => proposed.clone(),
            };
            (name.clone(), value)
        })
        .collect();

    Value::Map(entries)
}

fn attribute_value(
    attr: &Attribute,
    prior: &Value,
    proposed: &Value,
    path: &AttributePath,
    diags: &mut Diagnostics,
) -> Value {
    if !prior.is_known() || !proposed.is_known() {
        return proposed.clone();
    }

    if let Some(predicate) = &attr.semantic_equality {
        trace!({ KEY_ATTRIBUTE_PATH } = %path, "Calling provider defined semantic equality");
        let (equal, predicate_diags) = predicate.equal(prior, proposed);
        let failed = predicate_diags.has_error();
        diags.append(predicate_diags.into_iter().map(|d| match d.path {
            Some(_) => d,
            None => d.with_path(path.clone()),
        }));

        if failed {
            return proposed.clone();
        }
        if equal {
            trace!({ KEY_ATTRIBUTE_PATH } = %path, "Semantic equality found prior value equal");
            return prior.clone();
        }
    }

    match &attr.nested {
        None => proposed.clone(),
        Some(nested) => collection_value(
            nested.nesting_mode,
            prior,
            proposed,
            path,
            diags,
            &mut |prior, proposed, path, diags| {
                object_value(&nested.attributes, None, prior, proposed, path, diags)
            },
        ),
    }
}

fn nested_block_value(
    block: &NestedBlock,
    prior: &Value,
    proposed: &Value,
    path: &AttributePath,
    diags: &mut Diagnostics,
) -> Value {
    collection_value(
        block.nesting_mode,
        prior,
        proposed,
        path,
        diags,
        &mut |prior, proposed, path, diags| block_value(&block.block, prior, proposed, path, diags),
    )
}

type ElementFn<'a> = dyn FnMut(&Value, &Value, &AttributePath, &mut Diagnostics) -> Value + 'a;

/// Pair elements of `prior` and `proposed`: lists and sets by index, maps by key.
fn collection_value(
    mode: NestingMode,
    prior: &Value,
    proposed: &Value,
    path: &AttributePath,
    diags: &mut Diagnostics,
    element: &mut ElementFn<'_>,
) -> Value {
    match (mode, prior, proposed) {
        (NestingMode::Single, _, _) => element(prior, proposed, path, diags),
        (NestingMode::List | NestingMode::Set, Value::List(prior_items), Value::List(proposed_items)) => {
            Value::List(
                proposed_items
                    .iter()
                    .enumerate()
                    .map(|(i, proposed)| match prior_items.get(i) {
                        Some(prior) => element(prior, proposed, &path.clone().index(i), diags),
                        None => proposed.clone(),
                    })
                    .collect(),
            )
        },
        (NestingMode::Map, Value::Map(prior_entries), Value::Map(proposed_entries)) => Value::Map(
            proposed_entries
                .iter()
                .map(|(key, proposed)| {
                    let value = match prior_entries.get(key) {
                        Some(prior) => element(prior, proposed, &path.clone().key(key), diags),
                        None => proposed.clone(),
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        _ => proposed.clone(),
    }
}
