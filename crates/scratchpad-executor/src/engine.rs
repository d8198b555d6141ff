//! Script execution engine.
//!
//! Every call compiles the script text into a fresh `AsyncFunction` taking
//! `(client, variables)`, runs it in a fresh QuickJS runtime and awaits the
//! returned promise. Nothing is cached between calls.
//!
//! Scripts run with full access to the client handle. There is no sandbox,
//! no timeout and no memory ceiling.

use std::{sync::Arc, time::Instant};

use rquickjs::{
    AsyncContext, AsyncRuntime, CatchResultExt, CaughtError, Ctx, Function, Promise, Value,
    async_with,
};
use scratchpad_core::{BackendClient, ClientSource, NOT_INITIALIZED, ScriptRequest, ScriptResult};
use thiserror::Error;

use crate::bridge;

const ASYNC_FUNCTION_CONSTRUCTOR: &str = "Object.getPrototypeOf(async function () {}).constructor";

/// Why a script did not produce a value.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Script engine error: {0}")]
    Runtime(String),
    /// Script text did not compile.
    #[error("{0}")]
    Compile(String),
    /// Script threw or its promise rejected.
    #[error("{0}")]
    Thrown(String),
    #[error("Script result is not serializable: {0}")]
    Conversion(String),
}

struct Completed {
    data: serde_json::Value,
    elapsed_ms: u64,
}

/// Runs scripts against the current client.
pub struct ScriptEngine {
    clients: Arc<dyn ClientSource>,
}

impl ScriptEngine {
    /// Create an engine reading the client from `clients` at call time.
    #[must_use]
    pub fn new(clients: Arc<dyn ClientSource>) -> Self {
        Self { clients }
    }

    /// Execute a script. Never fails: every problem becomes a failure result.
    #[allow(clippy::future_not_send)]
    pub async fn execute(&self, request: &ScriptRequest) -> ScriptResult {
        let Some(client) = self.clients.current_client() else {
            return ScriptResult::failure(NOT_INITIALIZED);
        };

        match run(client, request).await {
            Ok(done) => {
                tracing::debug!(elapsed_ms = done.elapsed_ms, "script completed");
                ScriptResult::success(done.data, done.elapsed_ms)
            }
            Err(e) => {
                tracing::debug!(error = %e, "script failed");
                ScriptResult::failure(e.to_string())
            }
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(client: Arc<dyn BackendClient>, request: &ScriptRequest) -> Result<Completed, ScriptError> {
    let runtime = AsyncRuntime::new().map_err(|e| ScriptError::Runtime(e.to_string()))?;
    let context = AsyncContext::full(&runtime)
        .await
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;

    let code = request.code.clone();
    let variables = serde_json::to_string(&request.variables)
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;

    async_with!(context => |ctx| {
        run_in_context(ctx, client, code, variables).await
    })
    .await
}

#[allow(clippy::future_not_send)]
async fn run_in_context<'js>(
    ctx: Ctx<'js>,
    client: Arc<dyn BackendClient>,
    code: String,
    variables: String,
) -> Result<Completed, ScriptError> {
    let setup = |e: CaughtError<'js>| ScriptError::Runtime(describe(&e));

    bridge::install_console(&ctx).catch(&ctx).map_err(setup)?;
    bridge::install_timers(&ctx).catch(&ctx).map_err(setup)?;
    let client = bridge::client_object(&ctx, client)
        .catch(&ctx)
        .map_err(setup)?;
    let variables: Value<'js> = ctx.json_parse(variables).catch(&ctx).map_err(setup)?;

    let constructor: Function<'js> = ctx
        .eval(ASYNC_FUNCTION_CONSTRUCTOR)
        .catch(&ctx)
        .map_err(setup)?;
    let unit: Function<'js> = constructor
        .call(("client", "variables", code))
        .catch(&ctx)
        .map_err(|e| ScriptError::Compile(describe(&e)))?;

    let started = Instant::now();
    let settled = match unit.call::<_, Promise<'js>>((client, variables)).catch(&ctx) {
        Ok(promise) => promise.into_future::<Value<'js>>().await.catch(&ctx),
        Err(e) => Err(e),
    };
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let value = settled.map_err(|e| ScriptError::Thrown(describe(&e)))?;
    let data = to_json(&ctx, value)?;
    Ok(Completed { data, elapsed_ms })
}

/// Convert a settled value to JSON. `undefined` becomes `null`.
fn to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<serde_json::Value, ScriptError> {
    if value.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    let text = ctx
        .json_stringify(value)
        .catch(ctx)
        .map_err(|e| ScriptError::Conversion(describe(&e)))?;
    let Some(text) = text else {
        return Ok(serde_json::Value::Null);
    };
    let text = text
        .to_string()
        .map_err(|e| ScriptError::Conversion(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| ScriptError::Conversion(e.to_string()))
}

/// String form of a thrown value, as `String(error)` would render it.
fn describe(error: &CaughtError<'_>) -> String {
    match error {
        CaughtError::Exception(exception) => {
            let name = exception
                .as_object()
                .get::<_, Option<String>>("name")
                .ok()
                .flatten()
                .unwrap_or_else(|| "Error".to_string());
            match exception.message() {
                Some(message) if !message.is_empty() => format!("{name}: {message}"),
                _ => name,
            }
        }
        CaughtError::Value(value) => {
            if let Some(s) = value.as_string() {
                return s.to_string().unwrap_or_default();
            }
            value
                .ctx()
                .json_stringify(value.clone())
                .ok()
                .flatten()
                .and_then(|s| s.to_string().ok())
                .unwrap_or_else(|| format!("{value:?}"))
        }
        CaughtError::Error(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use scratchpad_core::{BackendConfig, InMemoryClientFactory, traits::ClientFactory};
    use serde_json::json;

    use super::*;

    struct Fixed(Option<Arc<dyn BackendClient>>);

    impl ClientSource for Fixed {
        fn current_client(&self) -> Option<Arc<dyn BackendClient>> {
            self.0.clone()
        }
    }

    fn engine() -> ScriptEngine {
        let client = InMemoryClientFactory::new()
            .with_account("a@b.test", "pw")
            .create_client(&BackendConfig::new("memory://local", "key"));
        ScriptEngine::new(Arc::new(Fixed(Some(client))))
    }

    async fn run_ok(code: &str) -> serde_json::Value {
        let result = engine().execute(&ScriptRequest::new(code)).await;
        match result {
            ScriptResult::Success { data, .. } => data,
            ScriptResult::Failure { error } => panic!("script failed: {error}"),
        }
    }

    async fn run_err(code: &str) -> String {
        let result = engine().execute(&ScriptRequest::new(code)).await;
        result.error().expect("script should fail").to_string()
    }

    #[tokio::test]
    async fn test_returns_value() {
        let result = engine().execute(&ScriptRequest::new("return 1+1")).await;
        assert!(result.is_success());
        assert_eq!(result.data(), Some(&json!(2)));
        assert!(matches!(result, ScriptResult::Success { .. }));
    }

    #[tokio::test]
    async fn test_thrown_error_is_captured() {
        let error = run_err("throw new Error('x')").await;
        assert_eq!(error, "Error: x");
    }

    #[tokio::test]
    async fn test_thrown_non_error_values() {
        assert_eq!(run_err("throw 'plain'").await, "plain");
        assert_eq!(run_err("throw { code: 7 }").await, r#"{"code":7}"#);
    }

    #[tokio::test]
    async fn test_syntax_error_is_captured() {
        let error = run_err("return (").await;
        assert!(error.starts_with("SyntaxError"), "{error}");
    }

    #[tokio::test]
    async fn test_rejected_await_is_captured() {
        let error = run_err("await Promise.reject(new TypeError('nope'))").await;
        assert_eq!(error, "TypeError: nope");
    }

    #[tokio::test]
    async fn test_without_client() {
        let engine = ScriptEngine::new(Arc::new(Fixed(None)));
        let result = engine.execute(&ScriptRequest::new("return 1")).await;
        assert_eq!(result, ScriptResult::failure(NOT_INITIALIZED));
    }

    #[tokio::test]
    async fn test_variables_are_passed() {
        let request = ScriptRequest::new("return `${variables.greeting}, ${variables.name}!`")
            .with_variable("greeting", "hello")
            .with_variable("name", "world");
        let result = engine().execute(&request).await;
        assert_eq!(result.data(), Some(&json!("hello, world!")));
    }

    #[tokio::test]
    async fn test_undefined_becomes_null() {
        assert_eq!(run_ok("const x = 1;").await, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_client_calls() {
        let data = run_ok(
            r"
            const session = await client.signInWithPassword('a@b.test', 'pw');
            const echoed = await client.invoke('hello', { n: 3 });
            const fetched = await client.request('get', '/rest/v1/items');
            return {
                email: session.user.email,
                fn: echoed.function,
                authorized: echoed.authorized,
                method: fetched.method,
                endpoint: client.endpoint,
            };
            ",
        )
        .await;
        assert_eq!(
            data,
            json!({
                "email": "a@b.test",
                "fn": "hello",
                "authorized": true,
                "method": "GET",
                "endpoint": "memory://local",
            })
        );
    }

    #[tokio::test]
    async fn test_client_errors_reject() {
        let error = run_err("await client.signInWithPassword('a@b.test', 'wrong')").await;
        assert_eq!(error, "Error: Invalid login credentials");

        let caught = run_ok(
            r"
            try {
                await client.signInWithPassword('a@b.test', 'wrong');
                return 'signed in';
            } catch (e) {
                return e.message;
            }
            ",
        )
        .await;
        assert_eq!(caught, json!("Invalid login credentials"));
    }

    #[tokio::test]
    async fn test_each_run_is_isolated() {
        let engine = engine();
        let code = "globalThis.runs = (globalThis.runs || 0) + 1; return runs;";
        for _ in 0..2 {
            let result = engine.execute(&ScriptRequest::new(code)).await;
            assert_eq!(result.data(), Some(&json!(1)));
        }
    }

    #[tokio::test]
    async fn test_console_is_available() {
        assert_eq!(run_ok("console.log('hi', { a: 1 }); return true;").await, json!(true));
    }

    #[tokio::test]
    async fn test_timers() {
        let data = run_ok("await new Promise(r => setTimeout(r, 10)); return 'done';").await;
        assert_eq!(data, json!("done"));

        let data = run_ok(
            r"
            const fired = [];
            const cancelled = setTimeout(() => fired.push('cancelled'), 5);
            clearTimeout(cancelled);
            setTimeout((a, b) => fired.push(a + b), 1, 'x', 'y');
            await new Promise(r => setTimeout(r, 20));
            return fired;
            ",
        )
        .await;
        assert_eq!(data, json!(["xy"]));
    }

    #[tokio::test]
    async fn test_timers_keep_elapsed_time() {
        let result = engine()
            .execute(&ScriptRequest::new("await new Promise(r => setTimeout(r, 30));"))
            .await;
        let ScriptResult::Success {
            execution_time_ms, ..
        } = result
        else {
            panic!("script failed: {result:?}");
        };
        assert!(execution_time_ms >= 25, "{execution_time_ms}");
    }

    #[tokio::test]
    async fn test_timing_is_reported() {
        let result = engine().execute(&ScriptRequest::new("return 'x'")).await;
        let wire = serde_json::to_value(&result).unwrap();
        assert!(wire["executionTimeMs"].as_u64().is_some());
    }
}
