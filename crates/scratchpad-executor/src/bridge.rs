//! Host bridge between script code and the backend client.
//!
//! Scripts never see Rust values directly. A single host function takes a
//! JSON-encoded call, runs it against the client on the runtime's spawner
//! and resolves with a JSON-encoded reply. The JS prelude turns replies
//! into returned values or thrown `Error`s. Timers are a second prelude
//! over a host sleep.

use std::{sync::Arc, time::Duration};

use rquickjs::{Ctx, Function, Object, Promise};
use scratchpad_core::{BackendClient, ClientError, Credentials};
use serde::Deserialize;
use serde_json::{Value, json};

/// Log target for script `console` output.
pub const SCRIPT_LOG_TARGET: &str = "scratchpad::script";

const CLIENT_PRELUDE: &str = r#"
(function (host, endpoint) {
  const call = async (request) => {
    const reply = JSON.parse(await host(JSON.stringify(request)));
    if (!reply.ok) {
      throw new Error(reply.error);
    }
    return reply.value;
  };
  return Object.freeze({
    endpoint,
    signInWithPassword: (principal, secret) =>
      call({ op: "signInWithPassword", principal: String(principal), secret: String(secret) }),
    signOut: () => call({ op: "signOut" }),
    getSession: () => call({ op: "getSession" }),
    invoke: (name, body) => call({ op: "invoke", name: String(name), body }),
    request: (method, path, body) =>
      call({ op: "request", method: String(method), path: String(path), body }),
  });
})
"#;

const CONSOLE_PRELUDE: &str = r#"
(function (emit) {
  const render = (value) => {
    if (typeof value === "string") {
      return value;
    }
    try {
      const json = JSON.stringify(value);
      return json === undefined ? String(value) : json;
    } catch (_) {
      return String(value);
    }
  };
  const level = (name) => (...args) => emit(name, args.map(render).join(" "));
  globalThis.console = Object.freeze({
    log: level("info"),
    info: level("info"),
    debug: level("debug"),
    warn: level("warn"),
    error: level("error"),
  });
})
"#;

const TIMER_PRELUDE: &str = r#"
(function (sleep) {
  const timers = new Map();
  let nextId = 1;
  globalThis.setTimeout = (callback, delay, ...args) => {
    const id = nextId++;
    timers.set(id, callback);
    sleep(Number(delay) || 0).then(() => {
      const pending = timers.get(id);
      if (!timers.delete(id) || typeof pending !== "function") {
        return;
      }
      try {
        pending(...args);
      } catch (e) {
        console.error("Timer callback error:", String(e));
      }
    });
    return id;
  };
  globalThis.clearTimeout = (id) => {
    timers.delete(id);
  };
})
"#;

/// Longest delay a timer honours, matching the usual 32-bit timer limit.
const MAX_TIMER_MS: f64 = 2_147_483_647.0;

/// One call from script code into the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum HostCall {
    SignInWithPassword {
        principal: String,
        secret: String,
    },
    SignOut,
    GetSession,
    Invoke {
        name: String,
        #[serde(default)]
        body: Value,
    },
    Request {
        method: String,
        path: String,
        #[serde(default)]
        body: Option<Value>,
    },
}

impl HostCall {
    async fn run(self, client: &dyn BackendClient) -> Result<Value, ClientError> {
        match self {
            Self::SignInWithPassword { principal, secret } => {
                client
                    .sign_in_with_password(&Credentials::new(principal, secret))
                    .await?;
                session_value(client).await
            }
            Self::SignOut => client.sign_out().await.map(|()| Value::Null),
            Self::GetSession => session_value(client).await,
            Self::Invoke { name, body } => client.invoke(&name, body).await,
            Self::Request { method, path, body } => client.request(&method, &path, body).await,
        }
    }
}

async fn session_value(client: &dyn BackendClient) -> Result<Value, ClientError> {
    Ok(client.get_session().await?.map_or(Value::Null, |s| s.0))
}

/// Run one encoded host call and encode the reply.
pub(crate) async fn dispatch(client: &dyn BackendClient, raw: &str) -> String {
    let reply = match serde_json::from_str::<HostCall>(raw) {
        Ok(call) => match call.run(client).await {
            Ok(value) => json!({ "ok": true, "value": value }),
            Err(e) => json!({ "ok": false, "error": e.to_string() }),
        },
        Err(e) => json!({ "ok": false, "error": format!("invalid client call: {e}") }),
    };
    reply.to_string()
}

/// Build the script-facing `client` object.
pub(crate) fn client_object<'js>(
    ctx: &Ctx<'js>,
    client: Arc<dyn BackendClient>,
) -> rquickjs::Result<Object<'js>> {
    let endpoint = client.config().endpoint().to_string();
    let host = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, raw: String| -> rquickjs::Result<Promise<'js>> {
            let (promise, resolve, _reject) = Promise::new(&ctx)?;
            let client = Arc::clone(&client);
            ctx.spawn(async move {
                let reply = dispatch(client.as_ref(), &raw).await;
                if let Err(e) = resolve.call::<_, ()>((reply,)) {
                    tracing::warn!(error = %e, "failed to deliver client reply to script");
                }
            });
            Ok(promise)
        },
    )?;

    let make_client: Function = ctx.eval(CLIENT_PRELUDE)?;
    make_client.call((host, endpoint))
}

/// Install a `console` global that forwards to tracing.
pub(crate) fn install_console(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let emit = Function::new(ctx.clone(), |level: String, message: String| {
        match level.as_str() {
            "error" => tracing::error!(target: SCRIPT_LOG_TARGET, "{message}"),
            "warn" => tracing::warn!(target: SCRIPT_LOG_TARGET, "{message}"),
            "debug" => tracing::debug!(target: SCRIPT_LOG_TARGET, "{message}"),
            _ => tracing::info!(target: SCRIPT_LOG_TARGET, "{message}"),
        }
    })?;

    let install: Function = ctx.eval(CONSOLE_PRELUDE)?;
    install.call::<_, ()>((emit,))
}

/// Install `setTimeout`/`clearTimeout` backed by tokio timers.
pub(crate) fn install_timers<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<()> {
    let sleep = Function::new(
        ctx.clone(),
        |ctx: Ctx<'js>, delay_ms: f64| -> rquickjs::Result<Promise<'js>> {
            let (promise, resolve, _reject) = Promise::new(&ctx)?;
            let delay = timer_delay(delay_ms);
            ctx.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = resolve.call::<_, ()>(()) {
                    tracing::warn!(error = %e, "failed to fire script timer");
                }
            });
            Ok(promise)
        },
    )?;

    let install: Function = ctx.eval(TIMER_PRELUDE)?;
    install.call::<_, ()>((sleep,))
}

fn timer_delay(delay_ms: f64) -> Duration {
    if delay_ms.is_nan() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(delay_ms.clamp(0.0, MAX_TIMER_MS) / 1000.0)
}
