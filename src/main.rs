//! `dispatch-cli`: drive the dispatch core from the command line.
//!
//! ```text
//! dispatch-cli [--config FILE] get URL [--follow] [--proxy HOST:PORT]
//! dispatch-cli [--config FILE] ws URL [--message TEXT]
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use hyper::Method;
use serde_json::{json, Map, Value};
use tokio_tungstenite::tungstenite::Message;

use http_dispatch::config::{load_config, ClientConfig, ProxyOptions};
use http_dispatch::http::{ClientResponse, HttpClient, WebSocket, WebSocketConnectOptions};
use http_dispatch::net::host::url_host;
use http_dispatch::observability::logging::init_logging;
use http_dispatch::ClientError;

#[derive(Parser)]
#[command(name = "dispatch-cli")]
#[command(about = "Send HTTP and WebSocket requests through the dispatch core", long_about = None)]
struct Cli {
    /// Client configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a GET request and print a JSON summary
    Get {
        url: String,
        /// Follow redirects
        #[arg(long)]
        follow: bool,
        /// Forward proxy as HOST:PORT
        #[arg(long)]
        proxy: Option<String>,
        #[arg(long, requires = "proxy")]
        proxy_user: Option<String>,
        #[arg(long, requires = "proxy_user")]
        proxy_pass: Option<String>,
    },
    /// Open a WebSocket, send one text message and print the first reply
    Ws {
        url: String,
        #[arg(short, long, default_value = "ping")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    init_logging(&config.observability);

    match cli.command {
        Commands::Get {
            url,
            follow,
            proxy,
            proxy_user,
            proxy_pass,
        } => {
            if let Some(proxy) = proxy {
                let (host, port) = proxy
                    .rsplit_once(':')
                    .ok_or("proxy must be HOST:PORT")?;
                let mut options = ProxyOptions::http(host, port.parse()?);
                if let (Some(user), Some(pass)) = (proxy_user, proxy_pass) {
                    options = options.with_credentials(user, pass);
                }
                config.proxy = Some(options);
            }

            let client = HttpClient::with_tcp_pool(config, None)?;
            let mut request = client.dispatch_absolute(Method::GET, &url)?;
            if follow {
                request.set_follow_redirects(true);
            }
            tracing::info!(request_id = %request.id(), uri = %request.absolute_uri(), "Sending");

            let result = request.send().await;
            client.close()?;
            println!("{}", serde_json::to_string_pretty(&summarize(&result?))?);
        }
        Commands::Ws { url, message } => {
            let target = url::Url::parse(&url)?;
            let ssl = target.scheme() == "wss";
            let host = url_host(&target).ok_or("url has no host")?;
            let port = target.port_or_known_default().unwrap_or(if ssl { 443 } else { 80 });
            let mut uri = target.path().to_string();
            if let Some(query) = target.query() {
                uri.push('?');
                uri.push_str(query);
            }

            let client = HttpClient::with_tcp_pool(config, None)?;
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Result<WebSocket, ClientError>>();

            let mut stream = client.websocket_stream(WebSocketConnectOptions::new(uri).host(host).port(port).ssl(ssl));
            let failed = tx.clone();
            stream.exception_handler(move |err| {
                let _ = failed.send(Err(err));
            });
            stream.handler(move |ws| {
                let _ = tx.send(Ok(ws));
            })?;

            let mut ws = rx.recv().await.ok_or("upgrade abandoned")??;
            ws.send(Message::Text(message.into())).await?;
            let reply = match ws.next().await {
                Some(frame) => frame?.to_text()?.to_string(),
                None => String::new(),
            };
            let _ = ws.close(None).await;
            client.close()?;

            println!("{}", serde_json::to_string_pretty(&json!({ "url": url, "reply": reply }))?);
        }
    }

    Ok(())
}

fn summarize(response: &ClientResponse) -> Value {
    let headers: Map<String, Value> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().unwrap_or("<binary>");
            (name.to_string(), Value::String(value.to_string()))
        })
        .collect();

    json!({
        "request_id": response.request().request_id,
        "method": response.request().method.as_str(),
        "uri": response.request().absolute_uri,
        "status": response.status().as_u16(),
        "version": format!("{:?}", response.version()),
        "headers": headers,
        "body_bytes": response.body().len(),
        "body": response.text(),
    })
}
