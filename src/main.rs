mod game;
mod gateway;
mod messages;
mod state;
mod timer;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{error, info};
use tokio::sync::Mutex;

use state::{ServerState, SharedState};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ROOM_IDLE_SECS: u64 = 3600;
const SWEEP_INTERVAL_SECS: u64 = 600;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

async fn handle_request(
    mut req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    // CORS preflight for browser clients served from another origin.
    if req.method() == Method::OPTIONS {
        return Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .header("Access-Control-Max-Age", "86400")
            .body(Body::empty())
            .unwrap());
    }

    if req.uri().path() == "/healthz" {
        let body = format!(
            r#"{{"ok":true,"ts":{}}}"#,
            chrono::Utc::now().timestamp_millis()
        );
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(Body::from(body))
            .unwrap());
    }

    if hyper_tungstenite::is_upgrade_request(&req) {
        match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                tokio::spawn(async move {
                    match websocket.await {
                        Ok(ws) => gateway::handle_connection(ws, state).await,
                        Err(err) => error!("WebSocket handshake failed: {err}"),
                    }
                });
                return Ok(response);
            }
            Err(err) => {
                error!("WebSocket upgrade error: {err}");
                return Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Body::from("Invalid WebSocket upgrade request"))
                    .unwrap());
            }
        }
    }

    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from(
            "Not found. Use /healthz for health check or upgrade to WebSocket.",
        ))
        .unwrap())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let room_idle = Duration::from_secs(env_u64("ROOM_IDLE_SECS", DEFAULT_ROOM_IDLE_SECS));
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    let state: SharedState = Arc::new(Mutex::new(ServerState::new()));

    // Abandoned rooms would otherwise accumulate for the process lifetime.
    let sweeper_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
            let evicted = sweeper_state.lock().await.evict_idle_rooms(room_idle);
            if evicted > 0 {
                info!("evicted {evicted} idle room(s)");
            }
        }
    });

    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| handle_request(req, state.clone())))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!("quiz server listening on http://{addr}");
    info!("WebSocket endpoint: ws://{addr}");
    info!("Health check: http://{addr}/healthz");

    if let Err(err) = server.await {
        error!("server error: {err}");
    }
}
