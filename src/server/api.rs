use crate::agent::Reply;
use crate::cli::Args;
use crate::config::persona::Persona;
use crate::models::chat::{ ChatMessage, Role };
use crate::server::AppState;
use crate::server::websocket::load_tls_config;

use std::error::Error;
use std::net::SocketAddr;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::State,
    response::{ IntoResponse, Response },
    http::{ header, StatusCode },
};
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    persona: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersonaResponse {
    persona: Persona,
    system_instruction: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/persona", get(persona_handler))
        .route("/api/avatar", get(avatar_handler))
        .route("/api/chat", post(chat_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    http_port: u16,
    state: AppState,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(state);

    if let (true, Some(cert_path), Some(key_path)) = (
        args.enable_tls,
        args.tls_cert_path.as_ref(),
        args.tls_key_path.as_ref(),
    ) {
        let server_config = load_tls_config(cert_path, key_path)?;
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_config(server_config);

        tokio::spawn(async move {
            let result = axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await;

            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });

        info!("HTTPS server started with TLS enabled");
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e|
            format!("Failed to bind HTTP server to {}: {}", addr, e)
        )?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                error!("HTTP server error: {}", e);
            }
        });

        info!("HTTP server started");
    }

    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        persona: state.persona.name.clone(),
    })
}

async fn persona_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(PersonaResponse {
        persona: (*state.persona).clone(),
        system_instruction: state.agent.system_instruction().to_string(),
    })
}

async fn avatar_handler(State(state): State<AppState>) -> Response {
    match &state.avatar {
        Some(avatar) =>
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, avatar.content_type.clone())],
                avatar.bytes.clone(),
            ).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Stateless completion: the caller owns the history.
async fn chat_handler(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let message = req.message.trim();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { message: "message is empty".to_string() }),
        ).into_response();
    }

    let history: Vec<ChatMessage> = req.history
        .into_iter()
        .map(|entry| ChatMessage::new(entry.role, entry.content))
        .collect();
    let reply: Reply = state.agent.send_message(&history, message).await;
    Json(reply).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ ChatAgent, HISTORY_SIZE, RATE_LIMIT_TEXT, ReplyStatus };
    use crate::avatar::Avatar;
    use crate::config::persona::builtin_persona;
    use crate::llm::chat::testing::ScriptedClient;
    use crate::llm::ChatError;
    use serde_json::{ json, Value };
    use std::sync::Arc;

    async fn serve(client: Arc<ScriptedClient>, avatar: Option<Avatar>) -> String {
        let persona = builtin_persona().unwrap();
        let agent = ChatAgent::with_client(client, &persona, HISTORY_SIZE);
        let state = AppState {
            agent: Arc::new(agent),
            persona: Arc::new(persona),
            avatar: avatar.map(Arc::new),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state).into_make_service()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn health_and_persona() {
        let base = serve(Arc::new(ScriptedClient::new()), None).await;
        let health: Value = reqwest::get(format!("{}/api/health", base)).await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["persona"], "Kubidu");

        let persona: Value = reqwest::get(format!("{}/api/persona", base)).await.unwrap().json().await.unwrap();
        assert_eq!(persona["persona"]["name"], "Kubidu");
        assert!(persona["systemInstruction"].as_str().unwrap().contains("## Identity"));
    }

    #[tokio::test]
    async fn avatar_route() {
        let base = serve(Arc::new(ScriptedClient::new()), None).await;
        let resp = reqwest::get(format!("{}/api/avatar", base)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        let avatar = Avatar { content_type: "image/png".into(), bytes: vec![9, 9] };
        let base = serve(Arc::new(ScriptedClient::new()), Some(avatar)).await;
        let resp = reqwest::get(format!("{}/api/avatar", base)).await.unwrap();
        assert_eq!(resp.headers()[reqwest::header::CONTENT_TYPE], "image/png");
        assert_eq!(resp.bytes().await.unwrap().to_vec(), vec![9, 9]);
    }

    #[tokio::test]
    async fn chat_trims_history_and_classifies() {
        let client = Arc::new(
            ScriptedClient::new()
                .push(Ok(Some("hello back".into())))
                .push(Err(ChatError::RateLimited { status: 429, body: String::new() }))
        );
        let base = serve(client.clone(), None).await;
        let http = reqwest::Client::new();

        let history: Vec<Value> = (0..6)
            .map(|i| json!({ "role": if i % 2 == 0 { "user" } else { "model" }, "content": format!("m{}", i) }))
            .collect();
        let reply: Reply = http
            .post(format!("{}/api/chat", base))
            .json(&json!({ "history": history, "message": "hi" }))
            .send().await
            .unwrap()
            .json().await
            .unwrap();
        assert_eq!(reply.content, "hello back");
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(client.requests()[0].turns.len(), 5);

        let reply: Reply = http
            .post(format!("{}/api/chat", base))
            .json(&json!({ "message": "again" }))
            .send().await
            .unwrap()
            .json().await
            .unwrap();
        assert_eq!(reply.content, RATE_LIMIT_TEXT);
        assert_eq!(reply.status, ReplyStatus::RateLimited);
    }

    #[tokio::test]
    async fn chat_rejects_empty_message() {
        let base = serve(Arc::new(ScriptedClient::new()), None).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", base))
            .json(&json!({ "message": "   " }))
            .send().await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
