//! Function RPCs.
//!
//! CallFunction reports failures as a single [`FuncError`] rather than
//! diagnostics, so lookup problems are folded into one.

use std::collections::BTreeMap;

use tracing::{debug, instrument, warn};

use super::Server;
use crate::diag::Diagnostics;
use crate::function::{FuncError, FunctionDefinition, RunRequest, RunResponse};
use crate::logging::KEY_FUNCTION_NAME;
use crate::registry::Registrable;
use crate::value::Value;

/// Input of [`Server::get_functions`].
#[derive(Debug, Clone, Default)]
pub struct GetFunctionsRequest;

/// Output of [`Server::get_functions`].
#[derive(Debug, Clone, Default)]
pub struct GetFunctionsResponse {
    /// Definitions by function name.
    pub functions: BTreeMap<String, FunctionDefinition>,
    /// Problems found while building the definitions.
    pub diagnostics: Diagnostics,
}

/// Input of [`Server::call_function`].
#[derive(Debug, Clone, Default)]
pub struct CallFunctionRequest {
    /// The function name.
    pub name: String,
    /// Call arguments in parameter order.
    pub arguments: Vec<Value>,
}

/// Output of [`Server::call_function`].
#[derive(Debug, Clone, Default)]
pub struct CallFunctionResponse {
    /// The result; null when the call failed.
    pub result: Value,
    /// Set when the call failed.
    pub error: Option<FuncError>,
}

impl Server {
    /// Report the definition of every function.
    #[instrument(skip(self, req, resp), name = "rpc.get_functions")]
    pub async fn get_functions(&self, req: Option<GetFunctionsRequest>, resp: &mut GetFunctionsResponse) {
        if req.is_none() {
            return;
        }
        debug!("GetFunctions called");

        let (definitions, diags) = self.descriptors(&self.functions, || self.provider.functions()).await;
        resp.functions = definitions;
        resp.diagnostics.append(diags);
    }

    /// Run a function.
    #[instrument(skip(self, req, resp), name = "rpc.call_function")]
    pub async fn call_function(&self, req: Option<CallFunctionRequest>, resp: &mut CallFunctionResponse) {
        let Some(req) = req else { return };
        debug!({ KEY_FUNCTION_NAME } = %req.name, "CallFunction called");

        let (resolved, diags) = self.resolve(&self.functions, &req.name, || self.provider.functions()).await;
        let Some((entry, definition)) = resolved else {
            resp.error = FuncError::from_diagnostics(&diags);
            return;
        };

        let arguments = match definition.arguments(req.arguments) {
            Ok(arguments) => arguments,
            Err(err) => {
                warn!(error = %err, "CallFunction rejected arguments");
                resp.error = Some(err);
                return;
            },
        };

        let function = entry.factory.instantiate();
        let mut run_resp = RunResponse::default();

        debug!("Calling provider defined Function Run");
        function.run(RunRequest { arguments }, &mut run_resp).await;
        debug!("Called provider defined Function Run");

        match run_resp.error {
            Some(err) => {
                warn!(error = %err, "CallFunction completed with an error");
                resp.error = Some(err);
            },
            None => resp.result = run_resp.result,
        }
    }
}
