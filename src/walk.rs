//! Schema-driven value transformation.
//!
//! [`transform`] visits every position of a value together with the schema
//! element describing it and rebuilds the value from what the visitor
//! returns. Positions the schema does not describe on their own (elements of
//! `list(string)`, contents of dynamic or object typed attributes) are still
//! visited but receive [`FrameworkError::PathInsideAtomicAttribute`] instead of
//! a schema node, and keys missing from the schema receive
//! [`FrameworkError::AttributeNotInSchema`]. Visitors usually leave such
//! positions untouched.

use std::collections::BTreeMap;

use crate::error::FrameworkError;
use crate::path::{AttributePath, PathStep};
use crate::schema::{Attribute, AttributeType, NestedBlock, NestingMode, Schema, SchemaNode};
use crate::value::Value;

/// Order in which a node and its children are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    /// A node is visited before its children; the children walked are
    /// those of the value the visitor returned.
    TopDown,
    /// Children are visited first; the node then sees the rebuilt value.
    BottomUp,
}

/// Walk `value` against `schema`, replacing each position with the result of `visit`.
///
/// The input is left untouched. Values whose shape cannot correspond to the
/// schema, such as a string where a block is declared, fail with
/// [`FrameworkError::ShapeMismatch`].
pub fn transform<F>(schema: &Schema, value: &Value, order: WalkOrder, mut visit: F) -> Result<Value, FrameworkError>
where
    F: FnMut(&AttributePath, Result<SchemaNode<'_>, FrameworkError>, Value) -> Result<Value, FrameworkError>,
{
    let mut walker = Walker {
        order,
        visit: &mut visit,
    };
    walker.walk(
        &AttributePath::empty(),
        Position::Schema(SchemaNode::Block(&schema.block)),
        value.clone(),
    )
}

/// What is known about the schema at a position.
#[derive(Clone, Copy)]
enum Position<'s> {
    Schema(SchemaNode<'s>),
    /// Inside an attribute with no nested schema; carries the type when known.
    Atomic(Option<&'s AttributeType>),
    /// A key the schema does not declare.
    Unmatched,
}

impl<'s> Position<'s> {
    fn node(self, path: &AttributePath) -> Result<SchemaNode<'s>, FrameworkError> {
        match self {
            Position::Schema(node) => Ok(node),
            Position::Atomic(_) => Err(FrameworkError::PathInsideAtomicAttribute(path.clone())),
            Position::Unmatched => Err(FrameworkError::AttributeNotInSchema {
                path: path.parent().unwrap_or_default(),
                name: match path.last_step() {
                    Some(PathStep::AttributeName(name)) => name.clone(),
                    Some(step) => step.to_string(),
                    None => String::new(),
                },
            }),
        }
    }
}

struct Walker<'v, F> {
    order: WalkOrder,
    visit: &'v mut F,
}

impl<F> Walker<'_, F>
where
    F: FnMut(&AttributePath, Result<SchemaNode<'_>, FrameworkError>, Value) -> Result<Value, FrameworkError>,
{
    fn walk(&mut self, path: &AttributePath, position: Position<'_>, value: Value) -> Result<Value, FrameworkError> {
        match self.order {
            WalkOrder::TopDown => {
                let value = (self.visit)(path, position.node(path), value)?;
                self.children(path, position, value)
            },
            WalkOrder::BottomUp => {
                let value = self.children(path, position, value)?;
                (self.visit)(path, position.node(path), value)
            },
        }
    }

    fn children(&mut self, path: &AttributePath, position: Position<'_>, value: Value) -> Result<Value, FrameworkError> {
        if !value.is_known() {
            return Ok(value);
        }

        match position {
            Position::Schema(SchemaNode::Block(block)) => {
                self.object(path, &block.attributes, Some(&block.blocks), value)
            },
            Position::Schema(SchemaNode::NestedObject(attributes)) => {
                self.object(path, attributes, None, value)
            },
            Position::Schema(SchemaNode::NestedBlock(nested)) => self.nested_block(path, nested, value),
            Position::Schema(SchemaNode::Attribute(attr)) => self.attribute(path, attr, value),
            Position::Atomic(ty) => self.atomic(path, ty, value),
            Position::Unmatched => self.atomic(path, None, value),
        }
    }

    fn object(
        &mut self,
        path: &AttributePath,
        attributes: &BTreeMap<String, Attribute>,
        blocks: Option<&BTreeMap<String, NestedBlock>>,
        value: Value,
    ) -> Result<Value, FrameworkError> {
        let entries = match value {
            Value::Map(entries) => entries,
            other => return Err(shape_mismatch(path, "object", &other)),
        };

        let mut result = BTreeMap::new();
        for (name, child) in entries {
            let position = match attributes.get(&name) {
                Some(attr) => Position::Schema(SchemaNode::Attribute(attr)),
                None => match blocks.and_then(|b| b.get(&name)) {
                    Some(block) => Position::Schema(SchemaNode::NestedBlock(block)),
                    None => Position::Unmatched,
                },
            };
            let child = self.walk(&path.clone().attribute(name.clone()), position, child)?;
            result.insert(name, child);
        }
        Ok(Value::Map(result))
    }

    fn nested_block(&mut self, path: &AttributePath, nested: &NestedBlock, value: Value) -> Result<Value, FrameworkError> {
        match nested.nesting_mode {
            NestingMode::Single => self.object(path, &nested.block.attributes, Some(&nested.block.blocks), value),
            mode => self.collection(path, mode, Position::Schema(SchemaNode::Block(&nested.block)), value),
        }
    }

    fn attribute(&mut self, path: &AttributePath, attr: &Attribute, value: Value) -> Result<Value, FrameworkError> {
        match &attr.nested {
            None => self.atomic(path, Some(&attr.attr_type), value),
            Some(nested) => match nested.nesting_mode {
                NestingMode::Single => self.object(path, &nested.attributes, None, value),
                mode => self.collection(
                    path,
                    mode,
                    Position::Schema(SchemaNode::NestedObject(&nested.attributes)),
                    value,
                ),
            },
        }
    }

    fn collection(
        &mut self,
        path: &AttributePath,
        mode: NestingMode,
        element: Position<'_>,
        value: Value,
    ) -> Result<Value, FrameworkError> {
        match (mode, value) {
            (NestingMode::List, Value::List(items)) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.walk(&path.clone().index(i), element, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (NestingMode::Set, Value::List(items)) => items
                .into_iter()
                .map(|item| self.walk(&path.clone().element(item.clone()), element, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (NestingMode::Map, Value::Map(entries)) => entries
                .into_iter()
                .map(|(key, item)| {
                    let item = self.walk(&path.clone().key(key.clone()), element, item)?;
                    Ok((key, item))
                })
                .collect::<Result<BTreeMap<_, _>, FrameworkError>>()
                .map(Value::Map),
            (mode, value) => Err(shape_mismatch(path, mode.kind(), &value)),
        }
    }

    fn atomic(&mut self, path: &AttributePath, ty: Option<&AttributeType>, value: Value) -> Result<Value, FrameworkError> {
        match value {
            Value::List(items) => {
                let element_type = match ty {
                    Some(AttributeType::List(inner)) | Some(AttributeType::Set(inner)) => Some(inner.as_ref()),
                    _ => None,
                };
                let is_set = matches!(ty, Some(AttributeType::Set(_)));
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let step = if is_set {
                            PathStep::ElementKeyValue(item.clone())
                        } else {
                            PathStep::ElementKeyInt(i)
                        };
                        self.walk(&path.clone().step(step), Position::Atomic(element_type), item)
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            },
            Value::Map(entries) => entries
                .into_iter()
                .map(|(key, item)| {
                    let (step, item_type) = match ty {
                        Some(AttributeType::Object(fields)) => (PathStep::AttributeName(key.clone()), fields.get(&key)),
                        Some(AttributeType::Map(inner)) => (PathStep::ElementKeyString(key.clone()), Some(inner.as_ref())),
                        _ => (PathStep::ElementKeyString(key.clone()), None),
                    };
                    let item = self.walk(&path.clone().step(step), Position::Atomic(item_type), item)?;
                    Ok((key, item))
                })
                .collect::<Result<BTreeMap<_, _>, FrameworkError>>()
                .map(Value::Map),
            scalar => Ok(scalar),
        }
    }
}

/// Add a null entry for every attribute and block the schema declares but
/// `value` leaves out, at every object position.
///
/// Absent keys and explicit nulls mean the same thing on the wire; filling
/// them in lets later walks visit every declared position.
pub fn fill_absent(schema: &Schema, value: &Value) -> Result<Value, FrameworkError> {
    transform(schema, value, WalkOrder::TopDown, |_, node, value| {
        let Value::Map(mut entries) = value else {
            return Ok(value);
        };

        let (attributes, blocks) = match node {
            Ok(SchemaNode::Block(block)) => (Some(&block.attributes), Some(&block.blocks)),
            Ok(SchemaNode::NestedObject(attributes)) => (Some(attributes), None),
            Ok(SchemaNode::NestedBlock(nested)) if nested.nesting_mode == NestingMode::Single => {
                (Some(&nested.block.attributes), Some(&nested.block.blocks))
            },
            Ok(SchemaNode::Attribute(attr)) => match &attr.nested {
                Some(nested) if nested.nesting_mode == NestingMode::Single => (Some(&nested.attributes), None),
                _ => (None, None),
            },
            _ => (None, None),
        };

        let names = attributes
            .into_iter()
            .flat_map(|a| a.keys())
            .chain(blocks.into_iter().flat_map(|b| b.keys()));
        for name in names {
            entries.entry(name.clone()).or_insert(Value::Null);
        }
        Ok(Value::Map(entries))
    })
}

fn shape_mismatch(path: &AttributePath, expected: &'static str, value: &Value) -> FrameworkError {
    FrameworkError::ShapeMismatch {
        path: path.clone(),
        expected,
        found: value.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeFlags, Block};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("tags", Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::optional()))
            .with_attribute(
                "disks",
                Attribute::nested(
                    NestingMode::List,
                    BTreeMap::from([("size".to_string(), Attribute::computed_int64())]),
                    AttributeFlags::optional(),
                ),
            )
            .with_block(
                "ingress",
                NestedBlock::set(Block::new().with_attribute("port", Attribute::required_int64())),
            )
    }

    fn value() -> Value {
        Value::from(json!({
            "name": "web",
            "tags": ["a", "b"],
            "disks": [{"size": 10}],
            "ingress": [{"port": 80}]
        }))
    }

    #[test]
    fn test_identity_transform() {
        let input = value();
        let output = transform(&schema(), &input, WalkOrder::BottomUp, |_, _, v| Ok(v)).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_visit_order() {
        let mut top_down = Vec::new();
        transform(&schema(), &value(), WalkOrder::TopDown, |path, _, v| {
            top_down.push(path.to_string());
            Ok(v)
        })
        .unwrap();

        assert_eq!(top_down[0], "");
        assert_eq!(top_down[1], "AttributeName(\"disks\")");
        assert_eq!(top_down[2], "AttributeName(\"disks\").ElementKeyInt(0)");

        let mut bottom_up = Vec::new();
        transform(&schema(), &value(), WalkOrder::BottomUp, |path, _, v| {
            bottom_up.push(path.to_string());
            Ok(v)
        })
        .unwrap();

        assert_eq!(bottom_up.last().unwrap(), "");
        assert_eq!(bottom_up.len(), top_down.len());
    }

    #[test]
    fn test_schema_nodes_reported() {
        let mut computed = Vec::new();
        let mut atomic = Vec::new();
        let mut blocks = Vec::new();

        transform(&schema(), &value(), WalkOrder::TopDown, |path, node, v| {
            match node {
                Ok(SchemaNode::Attribute(attr)) if attr.flags.computed => computed.push(path.clone()),
                Ok(SchemaNode::NestedBlock(_)) => blocks.push(path.clone()),
                Err(e) if e.is_schemaless_position() => atomic.push(path.clone()),
                _ => {},
            }
            Ok(v)
        })
        .unwrap();

        assert_eq!(computed, vec![AttributePath::root("disks").index(0).attribute("size")]);
        assert_eq!(blocks, vec![AttributePath::root("ingress")]);
        assert_eq!(
            atomic,
            vec![AttributePath::root("tags").index(0), AttributePath::root("tags").index(1)]
        );
    }

    #[test]
    fn test_top_down_replacement_prunes_children() {
        let mut visited = Vec::new();
        let output = transform(&schema(), &value(), WalkOrder::TopDown, |path, _, v| {
            visited.push(path.clone());
            if *path == AttributePath::root("disks") {
                return Ok(Value::Unknown);
            }
            Ok(v)
        })
        .unwrap();

        assert_eq!(output.get("disks"), Some(&Value::Unknown));
        assert!(!visited.contains(&AttributePath::root("disks").index(0)));
    }

    #[test]
    fn test_shape_mismatch() {
        let input = Value::from(json!({"ingress": "not a set"}));
        let err = transform(&schema(), &input, WalkOrder::BottomUp, |_, _, v| Ok(v)).unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::ShapeMismatch { expected: "set", found: "string", .. }
        ));

        let err = transform(&schema(), &Value::from("scalar"), WalkOrder::TopDown, |_, _, v| Ok(v)).unwrap_err();
        assert!(matches!(err, FrameworkError::ShapeMismatch { expected: "object", .. }));
    }

    #[test]
    fn test_unmatched_key() {
        let input = Value::from(json!({"extra": 1}));
        let mut errors = Vec::new();
        transform(&schema(), &input, WalkOrder::TopDown, |_, node, v| {
            if let Err(e) = node {
                errors.push(e.to_string());
            }
            Ok(v)
        })
        .unwrap();
        assert_eq!(
            errors,
            vec!["no attribute or block named \"extra\" exists in the schema at ".to_string()]
        );
    }

    #[test]
    fn test_input_untouched() {
        let input = value();
        let output = transform(&schema(), &input, WalkOrder::BottomUp, |_, node, v| match node {
            Ok(SchemaNode::Attribute(attr)) if attr.attr_type == AttributeType::String => Ok(Value::Unknown),
            _ => Ok(v),
        })
        .unwrap();
        assert_eq!(input, value());
        assert_eq!(output.get("name"), Some(&Value::Unknown));
    }
    #[test]
    fn test_fill_absent() {
        let schema = schema().with_block(
            "network",
            NestedBlock::single(
                Block::new()
                    .with_attribute("cidr", Attribute::optional_string())
                    .with_attribute("gateway", Attribute::computed_string()),
            ),
        );
        let input = Value::from(json!({
            "name": "web",
            "disks": [{}],
            "ingress": [{}],
            "network": {"cidr": "10.0.0.0/16"}
        }));

        let output = fill_absent(&schema, &input).unwrap();
        assert_eq!(
            output,
            Value::from(json!({
                "name": "web",
                "tags": null,
                "disks": [{"size": null}],
                "ingress": [{"port": null}],
                "network": {"cidr": "10.0.0.0/16", "gateway": null}
            }))
        );
    }

    #[test]
    fn test_fill_absent_keeps_nulls() {
        assert_eq!(fill_absent(&schema(), &Value::Null).unwrap(), Value::Null);

        let input = Value::from(json!({"name": "web", "disks": null}));
        let output = fill_absent(&schema(), &input).unwrap();
        assert_eq!(output.get("disks"), Some(&Value::Null));
        assert_eq!(output.get("ingress"), Some(&Value::Null));
    }
}
