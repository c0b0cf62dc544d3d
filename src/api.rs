use axum::{
    extract::{
        Multipart, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::error::ProcessError;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Serialize)]
pub struct StatusResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

impl ErrorResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            timestamp: None,
        }
    }

    fn stamped(message: impl Into<String>) -> Self {
        Self {
            timestamp: Some(now()),
            ..Self::new(message)
        }
    }
}

/// First message of every streamed upload.
#[derive(Debug, Deserialize)]
pub struct StreamHeader {
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default = "default_chunks")]
    pub chunks: u32,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_filename() -> String {
    "image.jpg".to_string()
}

fn default_chunks() -> u32 {
    1
}

#[derive(Serialize)]
pub struct ChunkAck {
    chunk_received: bool,
    chunk_number: u32,
    total_received: usize,
}

#[derive(Serialize)]
pub struct StreamResult {
    success: bool,
    message: String,
    timestamp: String,
    output_size: usize,
    output_filename: String,
}

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

/// `watermarked_<name>`, with any directory part of `name` dropped.
pub fn output_filename(name: &str) -> String {
    let base = std::path::Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(default_filename);
    format!("watermarked_{}", base)
}

fn token_matches(expected: Option<&str>, given: Option<&str>) -> bool {
    match expected {
        Some(expected) => given == Some(expected),
        None => true,
    }
}

fn error_status(e: &ProcessError) -> StatusCode {
    match e {
        ProcessError::MissingTimestamp | ProcessError::ImageError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn status_handler() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "online",
        service: "Photo Watermark API",
    })
}

pub async fn watermark_file_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let given = headers.get(API_KEY_HEADER).and_then(|h| h.to_str().ok());
    if !token_matches(app_state.config.server.api_token.as_deref(), given) {
        warn!("Rejected upload with invalid API key");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::stamped("Invalid API token")),
        )
            .into_response();
    }

    let mut upload: Option<(String, Vec<u8>)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let filename = field.file_name().unwrap_or("image.jpg").to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((filename, bytes.to_vec())),
                    Err(e) => {
                        return (
                            e.status(),
                            Json(ErrorResponse::stamped(format!("Error reading upload: {}", e))),
                        )
                            .into_response();
                    }
                }
            }
            Ok(Some(field)) => debug!("Ignoring multipart field {:?}", field.name()),
            Ok(None) => break,
            Err(e) => {
                return (
                    e.status(),
                    Json(ErrorResponse::stamped(format!("Error reading upload: {}", e))),
                )
                    .into_response();
            }
        }
    }

    let Some((filename, data)) = upload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::stamped("Missing 'file' field")),
        )
            .into_response();
    };

    info!("Processing upload {} ({} bytes)", filename, data.len());
    match app_state.watermarker.process_bytes(data).await {
        Ok(result) => {
            let disposition = format!("attachment; filename=\"{}\"", output_filename(&filename));
            let mut response = result.bytes.into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(result.format.mime_type()),
            );
            if let Ok(value) = HeaderValue::from_str(&disposition) {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            response
        }
        Err(e) => {
            error!("Failed to process {}: {}", filename, e);
            (
                error_status(&e),
                Json(ErrorResponse::stamped(format!("Error processing image: {}", e))),
            )
                .into_response()
        }
    }
}

pub async fn watermark_stream_handler(
    State(app_state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.max_message_size(app_state.config.server.max_upload_bytes)
        .on_upgrade(move |socket| handle_stream(socket, app_state))
}

enum ReceiveFailure {
    /// Report to the client and wait for the next upload.
    Reply(String),
    Disconnected,
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize WebSocket reply: {}", e);
            false
        }
    }
}

/// One connection can carry any number of uploads, each a JSON header
/// followed by its binary chunks.
async fn handle_stream(mut socket: WebSocket, app_state: AppState) {
    info!("WebSocket connection opened");

    loop {
        let header_text = match socket.recv().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                if !send_json(&mut socket, &ErrorResponse::new("Expected file metadata")).await {
                    break;
                }
                continue;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        };

        let (filename, data) = match receive_upload(&mut socket, &app_state, header_text.as_str()).await {
            Ok(upload) => upload,
            Err(ReceiveFailure::Reply(message)) => {
                warn!("WebSocket upload rejected: {}", message);
                if !send_json(&mut socket, &ErrorResponse::new(message)).await {
                    break;
                }
                continue;
            }
            Err(ReceiveFailure::Disconnected) => break,
        };

        info!("WebSocket: processing {} ({} bytes)", filename, data.len());
        match app_state.watermarker.process_bytes(data).await {
            Ok(result) => {
                let reply = StreamResult {
                    success: true,
                    message: "Image successfully watermarked".to_string(),
                    timestamp: now(),
                    output_size: result.bytes.len(),
                    output_filename: output_filename(&filename),
                };
                if !send_json(&mut socket, &reply).await
                    || socket
                        .send(Message::Binary(result.bytes.into()))
                        .await
                        .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                error!("WebSocket: failed to process {}: {}", filename, e);
                let reply = ErrorResponse::new(format!("Error processing file: {}", e));
                if !send_json(&mut socket, &reply).await {
                    break;
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

async fn receive_upload(
    socket: &mut WebSocket,
    app_state: &AppState,
    header_text: &str,
) -> Result<(String, Vec<u8>), ReceiveFailure> {
    let header: StreamHeader = serde_json::from_str(header_text)
        .map_err(|e| ReceiveFailure::Reply(format!("Invalid file metadata: {}", e)))?;

    if !token_matches(
        app_state.config.server.api_token.as_deref(),
        header.token.as_deref(),
    ) {
        return Err(ReceiveFailure::Reply("Invalid API token".to_string()));
    }

    let max_size = app_state.config.server.max_upload_bytes;
    if header.size <= 0 {
        return Err(ReceiveFailure::Reply("Invalid file size".to_string()));
    }
    let expected = header.size as usize;
    if expected > max_size {
        return Err(ReceiveFailure::Reply(format!(
            "File too large: {} bytes exceeds limit of {}",
            expected, max_size
        )));
    }
    if header.chunks == 0 {
        return Err(ReceiveFailure::Reply("Invalid chunk count".to_string()));
    }

    debug!(
        "WebSocket: receiving {} ({} bytes in {} chunks)",
        header.filename, expected, header.chunks
    );

    let mut data = Vec::with_capacity(expected);
    for chunk_number in 1..=header.chunks {
        let chunk = match socket.recv().await {
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(_))) | None => return Err(ReceiveFailure::Disconnected),
            Some(Ok(_)) => {
                return Err(ReceiveFailure::Reply(format!(
                    "Expected binary chunk {} of {}",
                    chunk_number, header.chunks
                )));
            }
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                return Err(ReceiveFailure::Disconnected);
            }
        };

        data.extend_from_slice(&chunk);
        if data.len() > max_size {
            return Err(ReceiveFailure::Reply(format!(
                "File too large: exceeds limit of {} bytes",
                max_size
            )));
        }

        if chunk_number < header.chunks {
            let ack = ChunkAck {
                chunk_received: true,
                chunk_number,
                total_received: data.len(),
            };
            if !send_json(socket, &ack).await {
                return Err(ReceiveFailure::Disconnected);
            }
        }
    }

    if data.len() != expected {
        return Err(ReceiveFailure::Reply(format!(
            "Data size mismatch: expected {}, got {}",
            expected,
            data.len()
        )));
    }

    Ok((header.filename, data))
}
