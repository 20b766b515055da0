mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use courier_api::auth::{self, AppState, AppStateInner};
use courier_api::middleware::require_auth;
use courier_api::push::{DisabledPushSender, FcmPushSender, PushSender};
use courier_api::service::ChatService;
use courier_api::{chats, media, messages};
use courier_db::Database;
use courier_gateway::{ConnectionRegistry, connection};
use courier_types::error::ChatError;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Push transport
    let push: Arc<dyn PushSender> = match &config.fcm_server_key {
        Some(key) => {
            info!("FCM push enabled ({})", config.fcm_endpoint);
            Arc::new(FcmPushSender::new(
                config.fcm_endpoint.clone(),
                key.clone(),
                config.push_timeout,
            )?)
        }
        None => {
            warn!("COURIER_FCM_SERVER_KEY not set, push notifications disabled");
            Arc::new(DisabledPushSender)
        }
    };

    // Shared state
    let registry = ConnectionRegistry::new();
    let chats = ChatService::new(db.clone(), registry.clone(), push);
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl_days: config.token_ttl_days,
        chats,
        registry: registry.clone(),
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/gateway", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/chats", post(chats::create_chat).get(chats::list_chats))
        .route("/chats/{chat_id}", get(chats::get_chat))
        .route(
            "/chats/{chat_id}/messages",
            post(messages::send_message)
                .get(messages::get_messages)
                .patch(messages::read_messages),
        )
        .route("/messages/unread-count", get(chats::unread_count))
        .route("/users/{user_id}/status", get(chats::user_status))
        .route("/images", post(media::create_image))
        .route("/devices", post(media::register_device))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Courier server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Authenticate before upgrading; the socket starts subscribed to every chat
/// the user is an active member of.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let Some(token) = query.token.or(bearer) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(claims) = auth::decode_token(&state.jwt_secret, &token) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let user_id = claims.sub;
    match state.chats.require_active_user(user_id).await {
        Ok(()) => {}
        Err(ChatError::Unauthorized) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            error!("Gateway lookup for user {} failed: {}", user_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let chats = state.chats.clone();
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| async move {
        let (socket_id, outbound_rx) = match chats.connect(user_id).await {
            Ok(registered) => registered,
            Err(e) => {
                error!("Failed to register socket for user {}: {}", user_id, e);
                return;
            }
        };
        connection::handle_connection(
            socket,
            registry,
            socket_id,
            outbound_rx,
            user_id,
            claims.username,
        )
        .await
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
