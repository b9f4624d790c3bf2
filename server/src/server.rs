use crate::ServerConfig;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parley_core::llm::ApiMessage;
use parley_core::relay::{ErrorBody, ImageUploader, RelayRequest, RelayResponse};
use parley_core::state::IMAGE_CAPTION;
use parley_core::{ChatError, ChatModel, ChatResult, ImageModel, MessageKind, MessageRole};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

pub const IMAGE_URL_REQUIRED: &str = "Image URL is required";
pub const UPLOAD_FAILED: &str = "Failed to upload image";
pub const API_KEY_REQUIRED: &str = "OpenAI API key is required";
pub const CHAT_FAILED: &str = "Failed to process the request";

pub fn router(config: ServerConfig) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/images/upload", post(upload_image))
        .with_state(config);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

/// JSON `{ "error": ... }` with a fixed, client-facing message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
    detail: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: &'static str) -> Self {
        Self {
            status,
            message,
            detail: None,
        }
    }

    fn relay(err: ChatError) -> Self {
        match err {
            ChatError::BadRequest(_) => Self::new(StatusCode::BAD_REQUEST, IMAGE_URL_REQUIRED),
            ChatError::UpstreamFetch(detail) => Self {
                status: StatusCode::BAD_GATEWAY,
                message: "Failed to fetch image",
                detail: Some(detail),
            },
            other => {
                tracing::error!(err = %other, "image upload failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, UPLOAD_FAILED)
            }
        }
    }

    fn chat(err: ChatError) -> Self {
        match err {
            ChatError::MissingCredential => Self::new(StatusCode::BAD_REQUEST, API_KEY_REQUIRED),
            other => {
                tracing::error!(err = %other, "chat proxy request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, CHAT_FAILED)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match self.detail {
            Some(detail) => format!("{}: {detail}", self.message),
            None => self.message.to_string(),
        };
        (self.status, Json(ErrorBody { error })).into_response()
    }
}

/// Parses the body leniently: clients may omit the JSON content type.
async fn upload_image(
    State(config): State<ServerConfig>,
    body: Bytes,
) -> Result<Json<RelayResponse>, ApiError> {
    let request: RelayRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, IMAGE_URL_REQUIRED))?;
    let source = request
        .image_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, IMAGE_URL_REQUIRED))?;

    let url = config.relay.rehost(&source).await.map_err(ApiError::relay)?;
    tracing::debug!(%url, "relayed image");
    Ok(Json(RelayResponse { url }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatProxyRequest {
    #[serde(default)]
    pub messages: Vec<ApiMessage>,
    #[serde(default)]
    pub model: ChatModel,
    #[serde(default)]
    pub image_model: ImageModel,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageReply {
    pub role: MessageRole,
    pub content: String,
    pub image_url: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

async fn chat(State(config): State<ServerConfig>, body: Bytes) -> Response {
    let request: ChatProxyRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return ApiError::chat(ChatError::BadRequest(err.to_string())).into_response(),
    };
    let Some(api_key) = request
        .openai_api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
    else {
        return ApiError::chat(ChatError::MissingCredential).into_response();
    };

    let result = match request.kind {
        MessageKind::Text => complete_text(&config, &api_key, &request)
            .await
            .map(IntoResponse::into_response),
        MessageKind::Image => generate_image(&config, &api_key, &request)
            .await
            .map(IntoResponse::into_response),
    };
    result.unwrap_or_else(|err| ApiError::chat(err).into_response())
}

async fn complete_text(
    config: &ServerConfig,
    api_key: &str,
    request: &ChatProxyRequest,
) -> ChatResult<Json<ApiMessage>> {
    let reply = config
        .llm
        .complete_chat(api_key, &request.messages, request.model)
        .await?;
    Ok(Json(reply))
}

async fn generate_image(
    config: &ServerConfig,
    api_key: &str,
    request: &ChatProxyRequest,
) -> ChatResult<Json<ImageReply>> {
    let fallback = request
        .messages
        .iter()
        .rev()
        .find(|message| message.role == MessageRole::User)
        .map(|message| message.content.as_str())
        .unwrap_or_default();
    let prompt = config
        .llm
        .image_prompt(api_key, &request.messages, request.model, fallback)
        .await?;
    let source = config
        .llm
        .generate_image(api_key, &prompt, request.image_model)
        .await?;
    let image_url = config.relay.rehost(&source).await?;

    Ok(Json(ImageReply {
        role: MessageRole::Assistant,
        content: IMAGE_CAPTION.to_string(),
        image_url,
        kind: MessageKind::Image,
    }))
}

/// Stands in for the image host when no ImageKit credentials are configured.
pub struct UnconfiguredHost;

#[async_trait]
impl ImageUploader for UnconfiguredHost {
    async fn rehost(&self, _source_url: &str) -> ChatResult<String> {
        Err(ChatError::Upload(
            "IMAGEKIT_PUBLIC_KEY, IMAGEKIT_PRIVATE_KEY and IMAGEKIT_URL_ENDPOINT are not set".into(),
        ))
    }
}
