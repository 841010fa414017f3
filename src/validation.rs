//! Schema validation of configuration values.
//!
//! Validates a configuration [`Value`] against a [`Schema`] before provider
//! defined validation runs. Unknown values are accepted anywhere: they
//! satisfy required attributes and are not type checked, since their final
//! value is not known yet.
//!
//! # Example
//!
//! ```
//! use hemmer_plugin_framework::schema::{Attribute, Schema};
//! use hemmer_plugin_framework::validation::validate;
//! use hemmer_plugin_framework::value::Value;
//! use hemmer_plugin_framework::AttributePath;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("count", Attribute::optional_int64());
//!
//! let diagnostics = validate(&schema, &Value::from(json!({"name": "test", "count": 42})));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &Value::from(json!({"name": "test", "count": "many"})));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics.iter().next().unwrap().path, Some(AttributePath::root("count")));
//! ```

use std::collections::BTreeMap;

use crate::diag::{Diagnostic, Diagnostics};
use crate::path::AttributePath;
use crate::schema::{Attribute, AttributeType, Block, NestedBlock, NestingMode, Schema};
use crate::value::Value;

/// Validate a configuration value against a schema.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Computed attributes that are not optional must not be configured
/// - Attribute types must match the schema
/// - Nested attributes and blocks are validated recursively, blocks with
///   their min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    if value.is_null() || value.is_unknown() {
        return diagnostics;
    }
    validate_block(&schema.block, value, &AttributePath::empty(), &mut diagnostics);
    diagnostics
}

/// Validate a value, returning `Ok` if valid or `Err` with the diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Diagnostics> {
    let diagnostics = validate(schema, value);
    if diagnostics.has_error() {
        Err(diagnostics)
    } else {
        Ok(())
    }
}

/// Whether a value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    !validate(schema, value).has_error()
}

fn validate_block(block: &Block, value: &Value, path: &AttributePath, diagnostics: &mut Diagnostics) {
    let Some(obj) = expect_object(value, path, diagnostics) else {
        return;
    };

    validate_attributes(&block.attributes, obj, path, diagnostics);

    for (name, nested) in &block.blocks {
        validate_nested_block(nested, obj.get(name), &path.clone().attribute(name.clone()), diagnostics);
    }

    report_undeclared(obj, |name| block.attributes.contains_key(name) || block.blocks.contains_key(name), path, diagnostics);
}

fn validate_attributes(
    attributes: &BTreeMap<String, Attribute>,
    obj: &BTreeMap<String, Value>,
    path: &AttributePath,
    diagnostics: &mut Diagnostics,
) {
    for (name, attr) in attributes {
        validate_attribute(attr, obj.get(name), &path.clone().attribute(name.clone()), diagnostics);
    }
}

/// Returns the map inside `value`, reporting anything else. Null and unknown
/// yield `None` without a diagnostic.
fn expect_object<'v>(
    value: &'v Value,
    path: &AttributePath,
    diagnostics: &mut Diagnostics,
) -> Option<&'v BTreeMap<String, Value>> {
    match value {
        Value::Map(obj) => Some(obj),
        Value::Null | Value::Unknown => None,
        other => {
            diagnostics.push(
                with_path_if_not_root(Diagnostic::error("Expected object"), path)
                    .with_detail(format!("Got {}", other.kind())),
            );
            None
        },
    }
}

fn report_undeclared(
    obj: &BTreeMap<String, Value>,
    declared: impl Fn(&str) -> bool,
    path: &AttributePath,
    diagnostics: &mut Diagnostics,
) {
    for name in obj.keys().filter(|name| !declared(name)) {
        diagnostics.add_attribute_error(
            path.clone().attribute(name.clone()),
            "Unsupported argument",
            format!("An argument named {:?} is not expected here.", name),
        );
    }
}

fn validate_attribute(attr: &Attribute, value: Option<&Value>, path: &AttributePath, diagnostics: &mut Diagnostics) {
    let read_only = attr.flags.computed && !attr.flags.optional && !attr.flags.required;

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.add_attribute_error(
                    path.clone(),
                    "Missing Configuration for Required Attribute",
                    format!("Must set a configuration value for the {} attribute as the provider has marked it as required.", path),
                );
            }
        },
        Some(Value::Unknown) => {},
        Some(v) => {
            if read_only {
                diagnostics.add_attribute_error(
                    path.clone(),
                    "Invalid Configuration for Read-Only Attribute",
                    "Cannot set value for this attribute as the provider has marked it as read-only. Remove the configuration line setting the value.\n\nRefer to the provider documentation or contact the provider developers for additional information about configurable and read-only attributes that are supported.",
                );
                return;
            }
            match &attr.nested {
                Some(nested) => validate_nested_attributes(nested.nesting_mode, &nested.attributes, v, path, diagnostics),
                None => validate_attribute_type(&attr.attr_type, v, path, diagnostics),
            }
        },
    }
}

fn validate_nested_attributes(
    mode: NestingMode,
    attributes: &BTreeMap<String, Attribute>,
    value: &Value,
    path: &AttributePath,
    diagnostics: &mut Diagnostics,
) {
    let object = |item: &Value, item_path: &AttributePath, diagnostics: &mut Diagnostics| {
        if let Some(obj) = expect_object(item, item_path, diagnostics) {
            validate_attributes(attributes, obj, item_path, diagnostics);
            report_undeclared(obj, |name| attributes.contains_key(name), item_path, diagnostics);
        }
    };

    match (mode, value) {
        (NestingMode::Single, _) => object(value, path, diagnostics),
        (NestingMode::List, Value::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                object(item, &path.clone().index(i), diagnostics);
            }
        },
        (NestingMode::Set, Value::List(items)) => {
            for item in items {
                object(item, &path.clone().element(item.clone()), diagnostics);
            }
        },
        (NestingMode::Map, Value::Map(entries)) => {
            for (key, item) in entries {
                object(item, &path.clone().key(key.clone()), diagnostics);
            }
        },
        (mode, v) => diagnostics.push(type_error(path, mode.kind(), v)),
    }
}

fn validate_attribute_type(attr_type: &AttributeType, value: &Value, path: &AttributePath, diagnostics: &mut Diagnostics) {
    // Unknown and null elements carry no type of their own.
    if value.is_null() || value.is_unknown() {
        return;
    }

    match attr_type {
        AttributeType::String => {
            if value.as_str().is_none() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Float64 | AttributeType::Number => {
            if value.as_number().is_none() {
                diagnostics.push(type_error(path, "number", value));
            }
        },
        AttributeType::Bool => {
            if value.as_bool().is_none() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) => match value.as_list() {
            Some(items) => {
                for (i, elem) in items.iter().enumerate() {
                    validate_attribute_type(element_type, elem, &path.clone().index(i), diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "list", value)),
        },
        AttributeType::Set(element_type) => match value.as_list() {
            Some(items) => {
                for elem in items {
                    validate_attribute_type(element_type, elem, &path.clone().element(elem.clone()), diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "set", value)),
        },
        AttributeType::Map(value_type) => match value.as_map() {
            Some(entries) => {
                for (key, val) in entries {
                    validate_attribute_type(value_type, val, &path.clone().key(key.clone()), diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "map", value)),
        },
        AttributeType::Object(attrs) => match value.as_map() {
            // Object attribute types carry no presence flags.
            Some(obj) => {
                for (name, attr_type) in attrs {
                    if let Some(value) = obj.get(name) {
                        validate_attribute_type(attr_type, value, &path.clone().attribute(name.clone()), diagnostics);
                    }
                }
            },
            None => diagnostics.push(type_error(path, "object", value)),
        },
        AttributeType::Dynamic => {},
    }
}

fn validate_nested_block(nested: &NestedBlock, value: Option<&Value>, path: &AttributePath, diagnostics: &mut Diagnostics) {
    let value = match value {
        Some(Value::Unknown) => return,
        Some(v) if !v.is_null() => v,
        _ => {
            if nested.min_items > 0 {
                diagnostics.add_attribute_error(
                    path.clone(),
                    "Missing required block",
                    format!("Block {} requires at least {} item(s)", path, nested.min_items),
                );
            }
            return;
        },
    };

    let len = match (nested.nesting_mode, value) {
        (NestingMode::Single, v) => {
            validate_block(&nested.block, v, path, diagnostics);
            return;
        },
        (NestingMode::List, Value::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                validate_block(&nested.block, item, &path.clone().index(i), diagnostics);
            }
            items.len()
        },
        (NestingMode::Set, Value::List(items)) => {
            for item in items {
                validate_block(&nested.block, item, &path.clone().element(item.clone()), diagnostics);
            }
            items.len()
        },
        (NestingMode::Map, Value::Map(entries)) => {
            for (key, item) in entries {
                validate_block(&nested.block, item, &path.clone().key(key.clone()), diagnostics);
            }
            entries.len()
        },
        (mode, v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected {} for block {}", mode.kind(), path))
                    .with_detail(format!("Got {}", v.kind()))
                    .with_path(path.clone()),
            );
            return;
        },
    };

    let len = len as u32;

    if len < nested.min_items {
        diagnostics.add_attribute_error(
            path.clone(),
            "Insufficient blocks",
            format!("Block {} requires at least {} item(s), got {}", path, nested.min_items, len),
        );
    }

    // max_items of 0 means unlimited
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.add_attribute_error(
            path.clone(),
            "Too many blocks",
            format!("Block {} allows at most {} item(s), got {}", path, nested.max_items, len),
        );
    }
}

fn is_int64(value: &Value) -> bool {
    match value.as_number() {
        Some(n) if n.as_i64().is_some() => true,
        Some(n) => n
            .as_f64()
            .map(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
            .unwrap_or(false),
        None => false,
    }
}

fn type_error(path: &AttributePath, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error("Incorrect attribute value type")
        .with_detail(format!("Inappropriate value for attribute {}: expected {}, got {}", path, expected, got.kind()))
        .with_path(path.clone())
}

fn with_path_if_not_root(diagnostic: Diagnostic, path: &AttributePath) -> Diagnostic {
    if path.is_empty() {
        diagnostic
    } else {
        diagnostic.with_path(path.clone())
    }
}
