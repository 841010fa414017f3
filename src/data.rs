//! Schema-typed wrappers around [`Value`].
//!
//! [`Config`], [`Plan`] and [`State`] pair a raw value with the schema that
//! describes it. Configuration is read-only; plans and state may be changed
//! attribute by attribute.

use std::sync::Arc;

use crate::error::FrameworkError;
use crate::path::AttributePath;
use crate::schema::Schema;
use crate::value::Value;

macro_rules! schema_data {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            /// The raw value.
            pub raw: Value,
            /// The schema describing `raw`.
            pub schema: Arc<Schema>,
        }

        impl $name {
            /// Wrap `raw` with its schema.
            pub fn new(raw: Value, schema: Arc<Schema>) -> Self {
                Self { raw, schema }
            }

            /// A null value of `schema`.
            pub fn null(schema: Arc<Schema>) -> Self {
                Self::new(Value::Null, schema)
            }

            /// Whether the whole value is null.
            pub fn is_null(&self) -> bool {
                self.raw.is_null()
            }

            /// Read the value at `path`.
            ///
            /// Positions beneath a null or unknown parent read as null. Paths the
            /// schema does not describe fail.
            pub fn get_attribute(&self, path: &AttributePath) -> Result<Value, FrameworkError> {
                self.schema.node_at_path(path)?;
                match self.raw.at_path(path) {
                    Ok(value) => Ok(value.clone()),
                    Err(FrameworkError::InvalidStep { .. }) => Ok(Value::Null),
                    Err(e) => Err(e),
                }
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.raw == other.raw && Arc::ptr_eq(&self.schema, &other.schema)
            }
        }
    };
}

schema_data!(
    /// User-authored configuration.
    Config
);

schema_data!(
    /// A planned next state.
    Plan
);

schema_data!(
    /// Prior or resulting state.
    State
);

macro_rules! settable {
    ($name:ident) => {
        impl $name {
            /// Replace the value at `path`.
            pub fn set_attribute(&mut self, path: &AttributePath, value: Value) -> Result<(), FrameworkError> {
                self.schema.node_at_path(path)?;
                self.raw.set_at_path(path, value)
            }
        }
    };
}

settable!(Plan);
settable!(State);

impl From<State> for Plan {
    fn from(state: State) -> Self {
        Plan::new(state.raw, state.schema)
    }
}

impl From<Plan> for State {
    fn from(plan: Plan) -> Self {
        State::new(plan.raw, plan.schema)
    }
}
