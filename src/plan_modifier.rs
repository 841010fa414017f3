//! Attribute plan modifiers.
//!
//! A plan modifier runs during PlanResourceChange for the attribute it is
//! attached to. It may replace the planned value, request resource
//! replacement, report diagnostics and read or write provider private state.
//! Modifiers of one attribute run in declared order; attributes are visited
//! in lexical name order, parents before their nested attributes.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::data::{Config, Plan, State};
use crate::diag::Diagnostics;
use crate::logging::KEY_ATTRIBUTE_PATH;
use crate::path::AttributePath;
use crate::private_state::ProviderData;
use crate::schema::{Attribute, Block, NestingMode, Schema};
use crate::value::Value;

/// Input of a single attribute plan modifier.
#[derive(Debug)]
pub struct AttributePlanRequest<'a> {
    /// Path of the attribute being planned.
    pub path: &'a AttributePath,
    /// Configuration value of the attribute.
    pub config_value: &'a Value,
    /// Planned value of the attribute as left by earlier modifiers.
    pub plan_value: &'a Value,
    /// Prior state value of the attribute.
    pub state_value: &'a Value,
    /// The whole configuration.
    pub config: &'a Config,
    /// The whole plan as it was before attribute plan modification began.
    pub plan: &'a Plan,
    /// The whole prior state.
    pub state: &'a State,
    /// Provider meta data from the resource configuration.
    pub provider_meta: &'a Config,
    /// Provider private state as left by earlier modifiers.
    pub private: &'a ProviderData,
}

/// Output of a single attribute plan modifier.
#[derive(Debug, Clone, Default)]
pub struct AttributePlanResponse {
    /// The planned attribute value.
    pub plan_value: Value,
    /// Whether a change of this attribute requires replacing the resource.
    pub requires_replace: bool,
    /// Diagnostics reported by the modifier.
    pub diagnostics: Diagnostics,
    /// Provider private state.
    pub private: ProviderData,
}

/// Modifies the planned value of one attribute.
pub trait AttributePlanModifier: Send + Sync + fmt::Debug {
    /// Plain text description, used in logs and documentation.
    fn description(&self) -> String;

    /// Modify the plan. `resp` starts with the current planned value and private state.
    fn modify(&self, req: &AttributePlanRequest<'_>, resp: &mut AttributePlanResponse);
}

/// Whether replacement checks apply: the resource exists, is not being
/// destroyed, and the attribute is not left to the provider.
fn replacement_applies(req: &AttributePlanRequest<'_>) -> bool {
    if req.state.is_null() || req.plan.is_null() {
        return false;
    }

    if req.config_value.is_null() {
        let computed = req
            .config
            .schema
            .attribute_at_path(req.path)
            .map(|attr| attr.flags.computed)
            .unwrap_or(false);
        if computed {
            return false;
        }
    }

    req.plan_value != req.state_value
}

/// Requires replacing the resource when the attribute changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiresReplace;

impl AttributePlanModifier for RequiresReplace {
    fn description(&self) -> String {
        "If the value of this attribute changes, the resource will be destroyed and recreated.".to_string()
    }

    fn modify(&self, req: &AttributePlanRequest<'_>, resp: &mut AttributePlanResponse) {
        if replacement_applies(req) {
            resp.requires_replace = true;
        }
    }
}

/// Decides whether a change requires replacement.
pub type RequiresReplaceFn =
    dyn Fn(&AttributePlanRequest<'_>) -> (bool, Diagnostics) + Send + Sync;

/// Requires replacing the resource when the attribute changes and a
/// provider supplied function agrees.
#[derive(Clone)]
pub struct RequiresReplaceIf {
    check: Arc<RequiresReplaceFn>,
    description: String,
}

impl RequiresReplaceIf {
    /// Create the modifier from a check function and its description.
    pub fn new<F>(check: F, description: impl Into<String>) -> Self
    where
        F: Fn(&AttributePlanRequest<'_>) -> (bool, Diagnostics) + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
            description: description.into(),
        }
    }
}

impl fmt::Debug for RequiresReplaceIf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequiresReplaceIf")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl AttributePlanModifier for RequiresReplaceIf {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn modify(&self, req: &AttributePlanRequest<'_>, resp: &mut AttributePlanResponse) {
        if !replacement_applies(req) {
            return;
        }

        let (replace, diags) = (self.check)(req);
        resp.diagnostics.append(diags);
        if replace {
            resp.requires_replace = true;
        }
    }
}

/// Copies the prior state value into the plan when the planned value is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct UseStateForUnknown;

impl AttributePlanModifier for UseStateForUnknown {
    fn description(&self) -> String {
        "Once set, the value of this attribute in state will not change.".to_string()
    }

    fn modify(&self, req: &AttributePlanRequest<'_>, resp: &mut AttributePlanResponse) {
        if req.state_value.is_null() || !resp.plan_value.is_unknown() || req.config_value.is_unknown() {
            return;
        }
        resp.plan_value = req.state_value.clone();
    }
}

/// Input of [`schema_modify_plan`].
#[derive(Debug, Clone)]
pub struct SchemaPlanRequest {
    /// The configuration.
    pub config: Config,
    /// The plan before attribute plan modification.
    pub plan: Plan,
    /// The prior state.
    pub state: State,
    /// Provider meta data.
    pub provider_meta: Config,
    /// Provider private state.
    pub private: ProviderData,
}

/// Output of [`schema_modify_plan`].
#[derive(Debug, Clone)]
pub struct SchemaPlanResponse {
    /// The modified plan.
    pub plan: Plan,
    /// Paths whose change requires replacement.
    pub requires_replace: Vec<AttributePath>,
    /// Diagnostics reported by modifiers.
    pub diagnostics: Diagnostics,
    /// Provider private state.
    pub private: ProviderData,
}

impl SchemaPlanResponse {
    /// Start a response from its request.
    pub fn from_request(req: &SchemaPlanRequest) -> Self {
        Self {
            plan: req.plan.clone(),
            requires_replace: Vec::new(),
            diagnostics: Diagnostics::new(),
            private: req.private.clone(),
        }
    }
}

/// Run every attribute plan modifier declared in `schema`.
///
/// An error reported for one attribute stops the modifiers of that attribute
/// and of its nested attributes; sibling attributes still run.
pub fn schema_modify_plan(schema: &Schema, req: &SchemaPlanRequest, resp: &mut SchemaPlanResponse) {
    let mut walker = ModifierWalk {
        req,
        resp_private: resp.private.clone(),
        diagnostics: Diagnostics::new(),
        requires_replace: Vec::new(),
    };
    let mut plan = resp.plan.raw.clone();

    walker.block(
        &schema.block,
        &req.config.raw,
        &req.state.raw,
        &mut plan,
        &AttributePath::empty(),
    );

    resp.plan.raw = plan;
    resp.private = walker.resp_private;
    resp.diagnostics.append(walker.diagnostics);
    resp.requires_replace.extend(walker.requires_replace);
}

struct ModifierWalk<'r> {
    req: &'r SchemaPlanRequest,
    resp_private: ProviderData,
    diagnostics: Diagnostics,
    requires_replace: Vec<AttributePath>,
}

impl ModifierWalk<'_> {
    fn block(&mut self, block: &Block, config: &Value, state: &Value, plan: &mut Value, path: &AttributePath) {
        self.attributes(&block.attributes, config, state, plan, path);

        let Value::Map(entries) = plan else {
            return;
        };

        for (name, nested) in &block.blocks {
            let Some(child) = entries.get_mut(name) else {
                continue;
            };
            let child_path = path.clone().attribute(name);
            let config = config.get(name).unwrap_or(&Value::Null);
            let state = state.get(name).unwrap_or(&Value::Null);

            self.collection(nested.nesting_mode, config, state, child, &child_path, &mut |walk, config, state, plan, path| {
                walk.block(&nested.block, config, state, plan, path)
            });
        }
    }

    fn attributes(
        &mut self,
        attributes: &std::collections::BTreeMap<String, Attribute>,
        config: &Value,
        state: &Value,
        plan: &mut Value,
        path: &AttributePath,
    ) {
        let Value::Map(entries) = plan else {
            return;
        };

        for (name, attr) in attributes {
            let child_path = path.clone().attribute(name);
            let config = config.get(name).unwrap_or(&Value::Null);
            let state = state.get(name).unwrap_or(&Value::Null);

            match entries.get_mut(name) {
                Some(plan) => self.attribute(attr, config, state, plan, &child_path),
                None => {
                    let mut plan = Value::Null;
                    self.attribute(attr, config, state, &mut plan, &child_path);
                    if !plan.is_null() {
                        entries.insert(name.clone(), plan);
                    }
                },
            }
        }
    }

    fn attribute(&mut self, attr: &Attribute, config: &Value, state: &Value, plan: &mut Value, path: &AttributePath) {
        let mut failed = false;

        for modifier in &attr.plan_modifiers {
            let req = AttributePlanRequest {
                path,
                config_value: config,
                plan_value: &*plan,
                state_value: state,
                config: &self.req.config,
                plan: &self.req.plan,
                state: &self.req.state,
                provider_meta: &self.req.provider_meta,
                private: &self.resp_private,
            };
            let mut resp = AttributePlanResponse {
                plan_value: plan.clone(),
                requires_replace: false,
                diagnostics: Diagnostics::new(),
                private: self.resp_private.clone(),
            };

            debug!(
                { KEY_ATTRIBUTE_PATH } = %path,
                description = %modifier.description(),
                "Calling provider defined AttributePlanModifier"
            );
            modifier.modify(&req, &mut resp);
            debug!({ KEY_ATTRIBUTE_PATH } = %path, "Called provider defined AttributePlanModifier");

            *plan = resp.plan_value;
            self.resp_private = resp.private;
            if resp.requires_replace {
                trace!({ KEY_ATTRIBUTE_PATH } = %path, "attribute requires replacement");
                self.requires_replace.push(path.clone());
            }

            failed = resp.diagnostics.has_error();
            self.diagnostics.append(resp.diagnostics);
            if failed {
                break;
            }
        }

        if failed {
            return;
        }

        if let Some(nested) = &attr.nested {
            self.collection(nested.nesting_mode, config, state, plan, path, &mut |walk, config, state, plan, path| {
                walk.attributes(&nested.attributes, config, state, plan, path)
            });
        }
    }

    /// Visit the objects of a nested collection. Set elements are paired with
    /// the configuration and state element of equal value.
    fn collection(
        &mut self,
        mode: NestingMode,
        config: &Value,
        state: &Value,
        plan: &mut Value,
        path: &AttributePath,
        visit: &mut dyn FnMut(&mut Self, &Value, &Value, &mut Value, &AttributePath),
    ) {
        match (mode, plan) {
            (NestingMode::Single, plan) => visit(self, config, state, plan, path),
            (NestingMode::List, Value::List(items)) => {
                for (i, item) in items.iter_mut().enumerate() {
                    let config = config.as_list().and_then(|l| l.get(i)).unwrap_or(&Value::Null);
                    let state = state.as_list().and_then(|l| l.get(i)).unwrap_or(&Value::Null);
                    visit(self, config, state, item, &path.clone().index(i));
                }
            },
            (NestingMode::Set, Value::List(items)) => {
                for item in items.iter_mut() {
                    let element = item.clone();
                    let matching = |v: &Value| -> Value {
                        v.as_list()
                            .and_then(|l| l.iter().find(|e| **e == element))
                            .cloned()
                            .unwrap_or(Value::Null)
                    };
                    let config = matching(config);
                    let state = matching(state);
                    visit(self, &config, &state, item, &path.clone().element(element));
                }
            },
            (NestingMode::Map, Value::Map(entries)) => {
                for (key, item) in entries.iter_mut() {
                    let config = config.get(key).unwrap_or(&Value::Null);
                    let state = state.get(key).unwrap_or(&Value::Null);
                    visit(self, config, state, item, &path.clone().key(key));
                }
            },
            _ => {},
        }
    }
}
