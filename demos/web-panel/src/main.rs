//! Browser panel for running scratch scripts against a backend.
//!
//! Run with: cargo run -p scratchpad-web-panel -- --offline
//!
//! Then open http://localhost:3000 in your browser.

mod config;

use std::sync::Arc;

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use clap::Parser;
use scratchpad_core::{InMemoryClientFactory, traits::ClientFactory};
use scratchpad_session::{PersistentStore, client::HttpClientFactory};
use scratchpad_transport::{PanelHost, websocket::create_ws_router};
use tokio::task::LocalSet;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Args;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let data_dir = args.data_dir();

    let backend = config::open_store(args.store, &data_dir).await?;
    let store = Arc::new(PersistentStore::new());
    store
        .initialize(backend)
        .context("binding persistent store")?;
    tracing::info!(store = ?args.store, data_dir = %data_dir.display(), "state store ready");

    let factory: Arc<dyn ClientFactory> = if args.offline {
        tracing::info!("offline mode, using in-memory backend");
        Arc::new(InMemoryClientFactory::new())
    } else {
        let http = reqwest::Client::builder()
            .user_agent(concat!("scratchpad/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Arc::new(HttpClientFactory::new(http))
    };

    let (registry, requests) = scratchpad_transport::registry();

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(registry))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    tracing::info!("Server listening on http://{}", args.bind);

    // Panels run scripts, which are not `Send`; keep them on this thread.
    let local = LocalSet::new();
    local
        .run_until(async move {
            let host = PanelHost::new(store, factory);
            tokio::task::spawn_local(host.serve(requests));

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")
        })
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Scratchpad</title>
    <meta charset="utf-8">
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: -apple-system, BlinkMacSystemFont, sans-serif;
        }
        h1 { margin: 0 0 12px; font-size: 20px; }
        h2 { font-size: 14px; margin: 16px 0 6px; color: #9cdcfe; }
        input, textarea {
            background: #252526;
            color: #d4d4d4;
            border: 1px solid #3c3c3c;
            padding: 6px;
            font-family: Menlo, Monaco, "Courier New", monospace;
        }
        textarea { width: 100%; box-sizing: border-box; }
        button { margin-top: 6px; padding: 6px 12px; }
        pre { background: #252526; padding: 10px; white-space: pre-wrap; }
        .status { padding: 5px 10px; margin-bottom: 10px; border-radius: 4px; }
        .connected { background: #2d5a2d; }
        .disconnected { background: #5a2d2d; }
        .error { color: #f48771; }
    </style>
</head>
<body>
    <h1>Scratchpad</h1>
    <div class="status" id="status">Connecting...</div>

    <h2>Backend</h2>
    <input id="endpoint" placeholder="https://project.example.co" size="40">
    <input id="credentialKey" placeholder="anon key" size="40">
    <button id="save">Save</button>
    <span id="configStatus"></span>

    <h2>Sign in</h2>
    <input id="principal" placeholder="email">
    <input id="secret" type="password" placeholder="password">
    <button id="signIn">Sign in</button>
    <button id="signOut">Sign out</button>
    <span id="authStatus"></span>

    <h2>Script</h2>
    <textarea id="code" rows="12">const session = await client.getSession();
return { signedIn: session !== null, variables };</textarea>
    <h2>Variables (JSON object of strings)</h2>
    <textarea id="variables" rows="3">{}</textarea>
    <button id="run">Run</button>

    <h2>Result</h2>
    <pre id="output"></pre>

    <script>
        const $ = (id) => document.getElementById(id);
        const status = $('status');
        let ws;

        function send(envelope) {
            if (ws && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify(envelope));
            }
        }

        function ack(el, msg) {
            el.textContent = msg.success ? 'ok' : msg.error;
            el.className = msg.success ? '' : 'error';
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                let msg;
                try {
                    msg = JSON.parse(event.data);
                } catch (e) {
                    console.error('Failed to parse message:', e);
                    return;
                }
                switch (msg.command) {
                    case 'configLoaded':
                        if (msg.config) {
                            $('endpoint').value = msg.config.endpoint;
                            $('credentialKey').value = msg.config.credentialKey;
                        }
                        $('configStatus').textContent = msg.error || '';
                        $('configStatus').className = msg.error ? 'error' : '';
                        break;
                    case 'configSaved':
                        ack($('configStatus'), msg);
                        break;
                    case 'signInResult':
                        ack($('authStatus'), msg.result);
                        break;
                    case 'signOutResult':
                        ack($('authStatus'), msg);
                        break;
                    case 'functionResult': {
                        const r = msg.result;
                        $('output').className = r.success ? '' : 'error';
                        $('output').textContent = r.success
                            ? `${JSON.stringify(r.data, null, 2)}\n\n(${r.executionTimeMs} ms)`
                            : r.error;
                        break;
                    }
                    case 'error':
                        $('output').className = 'error';
                        $('output').textContent = msg.error;
                        break;
                }
            };
        }

        $('save').onclick = () => send({
            command: 'saveConfig',
            config: { endpoint: $('endpoint').value, credentialKey: $('credentialKey').value },
        });
        $('signIn').onclick = () => send({
            command: 'signIn',
            auth: { principal: $('principal').value, secret: $('secret').value },
        });
        $('signOut').onclick = () => send({ command: 'signOut' });
        $('run').onclick = () => {
            let variables;
            try {
                variables = JSON.parse($('variables').value || '{}');
            } catch (e) {
                $('output').className = 'error';
                $('output').textContent = `Invalid variables: ${e}`;
                return;
            }
            $('output').className = '';
            $('output').textContent = 'Running...';
            send({ command: 'executeFunction', code: $('code').value, variables });
        };

        connect();
    </script>
</body>
</html>
"#;
