//! Schema types for describing provider, resource and data source structure.
//!
//! Schemas describe the shape of provider configuration, resources, data
//! sources, ephemeral resources and state stores. They drive validation, the
//! marking of computed values during planning, attribute plan modifiers and
//! semantic equality. Attribute and block maps are ordered, so every walk
//! over a schema visits siblings in lexical name order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FrameworkError;
use crate::path::{AttributePath, PathStep};
use crate::plan_modifier::AttributePlanModifier;
use crate::semantic::SemanticEquality;
use crate::value::Value;

/// The type of an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// A string value.
    String,
    /// A 64-bit integer.
    Int64,
    /// A 64-bit floating point number.
    Float64,
    /// An arbitrary precision number.
    Number,
    /// A boolean value.
    Bool,
    /// A list of values of a single type.
    List(Box<AttributeType>),
    /// A set of unique values of a single type.
    Set(Box<AttributeType>),
    /// A map from string keys to values of a single type.
    Map(Box<AttributeType>),
    /// An object with a fixed set of attributes.
    Object(BTreeMap<String, AttributeType>),
    /// A dynamic type that can hold any value.
    Dynamic,
}

impl AttributeType {
    /// Create a list type.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }

    /// Create a set type.
    pub fn set(element_type: AttributeType) -> Self {
        Self::Set(Box::new(element_type))
    }

    /// Create a map type.
    pub fn map(element_type: AttributeType) -> Self {
        Self::Map(Box::new(element_type))
    }

    /// Create an object type.
    pub fn object<K: Into<String>>(attributes: impl IntoIterator<Item = (K, AttributeType)>) -> Self {
        Self::Object(attributes.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Describes how an attribute can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// The attribute is required in configuration.
    pub required: bool,
    /// The attribute is optional in configuration.
    pub optional: bool,
    /// The attribute may be set by the provider.
    pub computed: bool,
    /// The attribute is sensitive and should be hidden in logs/UI.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Create flags for a required attribute.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional attribute.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Create flags for a computed attribute (read-only, set by provider).
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional+computed attribute (settable, else computed).
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }

    /// Mark the attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// The nesting mode of a block or nested attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NestingMode {
    /// A single nested object.
    #[default]
    Single,
    /// A list of nested objects (ordered).
    List,
    /// A set of nested objects (unordered, unique).
    Set,
    /// A map of nested objects keyed by string.
    Map,
}

impl NestingMode {
    pub(crate) fn kind(self) -> &'static str {
        match self {
            NestingMode::Single => "object",
            NestingMode::List => "list",
            NestingMode::Set => "set",
            NestingMode::Map => "map",
        }
    }
}

/// Attributes nested under an attribute, with their nesting mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedAttributes {
    /// How the nested objects are collected.
    #[serde(default)]
    pub nesting_mode: NestingMode,
    /// The attributes of each nested object.
    pub attributes: BTreeMap<String, Attribute>,
}

/// Describes a single attribute in a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    /// The type of the attribute. Ignored when `nested` is set.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Flags describing how the attribute can be used.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Human-readable description of the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Attributes nested under this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested: Option<NestedAttributes>,
    /// Value planned when the configuration leaves this attribute null.
    /// Only meaningful on computed attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Plan modifiers, run in declared order.
    #[serde(skip)]
    pub plan_modifiers: Vec<Arc<dyn AttributePlanModifier>>,
    /// Predicate suppressing cosmetic differences in values of this attribute.
    #[serde(skip)]
    pub semantic_equality: Option<Arc<dyn SemanticEquality>>,
}

impl Attribute {
    /// Create a new attribute with the given type and flags.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            nested: None,
            default: None,
            plan_modifiers: Vec::new(),
            semantic_equality: None,
        }
    }

    /// Create an attribute holding nested attributes.
    pub fn nested(
        nesting_mode: NestingMode,
        attributes: BTreeMap<String, Attribute>,
        flags: AttributeFlags,
    ) -> Self {
        let mut attr = Self::new(AttributeType::Dynamic, flags);
        attr.nested = Some(NestedAttributes {
            nesting_mode,
            attributes,
        });
        attr
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Create an optional+computed string attribute.
    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional_computed())
    }

    /// Create a required int64 attribute.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Create an optional int64 attribute.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Create a computed int64 attribute.
    pub fn computed_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::computed())
    }

    /// Create a required bool attribute.
    pub fn required_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::required())
    }

    /// Create an optional bool attribute.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Create a computed bool attribute.
    pub fn computed_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::computed())
    }

    /// Set the description for this attribute.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set a default value for this attribute.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Append a plan modifier.
    pub fn with_plan_modifier(mut self, modifier: impl AttributePlanModifier + 'static) -> Self {
        self.plan_modifiers.push(Arc::new(modifier));
        self
    }

    /// Require resource replacement when this attribute changes.
    pub fn requires_replace(self) -> Self {
        self.with_plan_modifier(crate::plan_modifier::RequiresReplace)
    }

    /// Attach a semantic equality predicate.
    pub fn with_semantic_equality(mut self, predicate: impl SemanticEquality + 'static) -> Self {
        self.semantic_equality = Some(Arc::new(predicate));
        self
    }

    /// Mark this attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }
}

/// A block: attributes plus nested blocks.
///
/// Blocks are used for complex nested structures that have their own
/// set of attributes (e.g., `ingress` blocks in a security group).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    /// The attributes within this block.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    /// Nested blocks within this block.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blocks: BTreeMap<String, NestedBlock>,
    /// Human-readable description of the block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Block {
    /// Create a new empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute to this block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to this block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    /// Set the description for this block.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A nested block with its nesting mode and constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedBlock {
    /// The block definition.
    #[serde(flatten)]
    pub block: Block,
    /// How the block is nested (single, list, set, map).
    #[serde(default)]
    pub nesting_mode: NestingMode,
    /// Minimum number of blocks required.
    #[serde(default)]
    pub min_items: u32,
    /// Maximum number of blocks allowed (0 = unlimited).
    #[serde(default)]
    pub max_items: u32,
}

impl NestedBlock {
    fn with_mode(block: Block, nesting_mode: NestingMode, max_items: u32) -> Self {
        Self {
            block,
            nesting_mode,
            min_items: 0,
            max_items,
        }
    }

    /// Create a single nested block (0 or 1 allowed).
    pub fn single(block: Block) -> Self {
        Self::with_mode(block, NestingMode::Single, 1)
    }

    /// Create a list of nested blocks.
    pub fn list(block: Block) -> Self {
        Self::with_mode(block, NestingMode::List, 0)
    }

    /// Create a set of nested blocks.
    pub fn set(block: Block) -> Self {
        Self::with_mode(block, NestingMode::Set, 0)
    }

    /// Create a map of nested blocks.
    pub fn map(block: Block) -> Self {
        Self::with_mode(block, NestingMode::Map, 0)
    }

    /// Set the minimum number of blocks required.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Set the maximum number of blocks allowed.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }
}

/// Schema for a provider, resource, data source, ephemeral resource or state store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    /// The version of this schema (for state upgrades).
    #[serde(default)]
    pub version: i64,
    /// The root block containing all attributes and nested blocks.
    #[serde(flatten)]
    pub block: Block,
}

/// The schema element found at a position of a value.
#[derive(Debug, Clone, Copy)]
pub enum SchemaNode<'a> {
    /// An object described by a block: the root, or one element of a block collection.
    Block(&'a Block),
    /// A nested block position.
    NestedBlock(&'a NestedBlock),
    /// An attribute position.
    Attribute(&'a Attribute),
    /// One element of a nested attribute collection.
    NestedObject(&'a BTreeMap<String, Attribute>),
}

impl Schema {
    /// Create a new schema with the given version.
    pub fn new(version: i64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// Create a schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add an attribute to the schema.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to the schema.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block.blocks.insert(name.into(), block);
        self
    }

    /// Resolve the schema element at `path`.
    pub fn node_at_path(&self, path: &AttributePath) -> Result<SchemaNode<'_>, FrameworkError> {
        let mut node = SchemaNode::Block(&self.block);
        let mut walked = AttributePath::empty();

        for step in path.steps() {
            node = match (node, step) {
                (SchemaNode::Block(block), PathStep::AttributeName(name)) => {
                    lookup(&block.attributes, Some(&block.blocks), &walked, name)?
                },
                (SchemaNode::NestedObject(attributes), PathStep::AttributeName(name)) => {
                    lookup(attributes, None, &walked, name)?
                },
                (SchemaNode::Attribute(attr), step) => match &attr.nested {
                    None => return Err(FrameworkError::PathInsideAtomicAttribute(path.clone())),
                    Some(nested) => match (nested.nesting_mode, step) {
                        (NestingMode::Single, PathStep::AttributeName(name)) => {
                            lookup(&nested.attributes, None, &walked, name)?
                        },
                        (NestingMode::List, PathStep::ElementKeyInt(_))
                        | (NestingMode::Set, PathStep::ElementKeyValue(_))
                        | (NestingMode::Map, PathStep::ElementKeyString(_)) => {
                            SchemaNode::NestedObject(&nested.attributes)
                        },
                        _ => return Err(invalid_step(&walked, step)),
                    },
                },
                (SchemaNode::NestedBlock(nested), step) => match (nested.nesting_mode, step) {
                    (NestingMode::Single, PathStep::AttributeName(name)) => lookup(
                        &nested.block.attributes,
                        Some(&nested.block.blocks),
                        &walked,
                        name,
                    )?,
                    (NestingMode::List, PathStep::ElementKeyInt(_))
                    | (NestingMode::Set, PathStep::ElementKeyValue(_))
                    | (NestingMode::Map, PathStep::ElementKeyString(_)) => {
                        SchemaNode::Block(&nested.block)
                    },
                    _ => return Err(invalid_step(&walked, step)),
                },
                (_, step) => return Err(invalid_step(&walked, step)),
            };
            walked = walked.step(step.clone());
        }

        Ok(node)
    }

    /// Resolve the attribute at `path`.
    ///
    /// Positions without a schema of their own, such as collection elements,
    /// report [`FrameworkError::PathInsideAtomicAttribute`]; block positions
    /// report [`FrameworkError::PathIsBlock`].
    pub fn attribute_at_path(&self, path: &AttributePath) -> Result<&Attribute, FrameworkError> {
        match self.node_at_path(path)? {
            SchemaNode::Attribute(attr) => Ok(attr),
            SchemaNode::NestedBlock(_) => Err(FrameworkError::PathIsBlock(path.clone())),
            SchemaNode::Block(_) | SchemaNode::NestedObject(_) => {
                Err(FrameworkError::PathInsideAtomicAttribute(path.clone()))
            },
        }
    }
}

fn lookup<'a>(
    attributes: &'a BTreeMap<String, Attribute>,
    blocks: Option<&'a BTreeMap<String, NestedBlock>>,
    parent: &AttributePath,
    name: &str,
) -> Result<SchemaNode<'a>, FrameworkError> {
    if let Some(attr) = attributes.get(name) {
        return Ok(SchemaNode::Attribute(attr));
    }
    if let Some(block) = blocks.and_then(|b| b.get(name)) {
        return Ok(SchemaNode::NestedBlock(block));
    }
    Err(FrameworkError::AttributeNotInSchema {
        path: parent.clone(),
        name: name.to_string(),
    })
}

fn invalid_step(walked: &AttributePath, step: &PathStep) -> FrameworkError {
    FrameworkError::InvalidStep {
        path: walked.clone(),
        step: step.to_string(),
    }
}

impl fmt::Display for NestingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NestingMode::Single => "single",
            NestingMode::List => "list",
            NestingMode::Set => "set",
            NestingMode::Map => "map",
        })
    }
}

/// All schemas served by a provider.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderSchema {
    /// Schema for provider configuration.
    pub provider: Schema,
    /// Schema for provider meta data in resource configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<Schema>,
    /// Schemas for each resource type.
    pub resources: BTreeMap<String, Schema>,
    /// Schemas for each data source type.
    pub data_sources: BTreeMap<String, Schema>,
    /// Schemas for each ephemeral resource type.
    pub ephemeral_resources: BTreeMap<String, Schema>,
    /// Schemas for each state store type.
    pub state_stores: BTreeMap<String, Schema>,
}
