//! HTTP front end
//!
//! Plain tokio listener, one task per connection. Routes:
//! `POST /generate-sql` with `{"query": "...", "db_id": null}`, `GET /health`.

use crate::db;
use crate::error::SketchError;
use crate::pipeline::SqlSketcher;
use crate::schema::LoadedSchema;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_BYTES: usize = 1_000_000;

/// Where each request gets its schema snapshot from.
pub enum SchemaSource {
    /// Introspect the database again for every request.
    Database(String),
    Static(LoadedSchema),
}

impl SchemaSource {
    async fn load(&self) -> crate::error::Result<LoadedSchema> {
        match self {
            SchemaSource::Database(url) => db::load_schema(url).await,
            SchemaSource::Static(schema) => Ok(schema.clone()),
        }
    }
}

pub struct AppState {
    pub sketcher: SqlSketcher,
    pub schema: SchemaSource,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    query: String,
    /// Accepted for compatibility; a server talks to one database.
    #[serde(default)]
    #[allow(dead_code)]
    db_id: Option<String>,
}

pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    info!("Server listening on {}", listener.local_addr()?);
    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, Arc::clone(&state)));
    }
}

/// Outcome of reading one request off a connection.
#[derive(Debug, PartialEq)]
enum RequestRead {
    Complete(Vec<u8>),
    TooLarge,
    Closed,
}

async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<RequestRead> {
    let mut buffer = Vec::new();
    let mut temp_buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut temp_buf).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&temp_buf[..n]);
        if request_complete(&buffer) {
            break;
        }
        if buffer.len() > MAX_REQUEST_BYTES {
            return Ok(RequestRead::TooLarge);
        }
    }
    if buffer.is_empty() {
        return Ok(RequestRead::Closed);
    }
    if buffer.len() > MAX_REQUEST_BYTES {
        return Ok(RequestRead::TooLarge);
    }
    Ok(RequestRead::Complete(buffer))
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) {
    let response = match timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Err(_) => {
            warn!("Request read timeout");
            return;
        }
        Ok(Err(e)) => {
            warn!("Failed to read from stream: {}", e);
            return;
        }
        Ok(Ok(RequestRead::Closed)) => return,
        Ok(Ok(RequestRead::TooLarge)) => {
            warn!("Rejecting request over {} bytes", MAX_REQUEST_BYTES);
            create_response(413, "Payload Too Large", &error_body("Request body too large"))
        }
        Ok(Ok(RequestRead::Complete(buffer))) => {
            let request = String::from_utf8_lossy(&buffer);
            handle_request(&request, &state).await
        }
    };
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

fn request_complete(buffer: &[u8]) -> bool {
    let text = String::from_utf8_lossy(buffer);
    match text.find("\r\n\r\n") {
        Some(end) => {
            let body_len = extract_content_length(&text[..end]).unwrap_or(0);
            buffer.len() >= end + 4 + body_len
        }
        None => false,
    }
}

fn extract_content_length(headers: &str) -> Option<usize> {
    headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

pub async fn handle_request(request: &str, state: &AppState) -> String {
    let Some(request_line) = request.lines().next() else {
        return create_response(400, "Bad Request", &error_body("Empty request"));
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", &error_body("Malformed request line"));
    }
    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/");
    let path = match path.trim_end_matches('/') {
        "" => "/",
        p => p,
    };
    let body = request.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/health") => create_response(200, "OK", r#"{"status":"ok"}"#),
        ("POST", "/generate-sql") => generate_sql(body, state).await,
        _ => create_response(404, "Not Found", &error_body("Not found")),
    }
}

async fn generate_sql(body: &str, state: &AppState) -> String {
    let request: GenerateRequest = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => return create_response(400, "Bad Request", &error_body(&format!("Invalid request body: {}", e))),
    };
    let request_id = Uuid::new_v4();
    info!("[{}] POST /generate-sql: {}", request_id, request.query);

    let schema = match state.schema.load().await {
        Ok(schema) => schema,
        Err(e) => {
            error!("[{}] Schema load failed: {}", request_id, e);
            return create_response(500, "Internal Server Error", &error_body(&e.to_string()));
        }
    };

    match state.sketcher.generate(&request.query, &schema).await {
        Ok(response) => match serde_json::to_string(&response) {
            Ok(json) => {
                info!("[{}] Generated: {}", request_id, response.final_query);
                create_response(200, "OK", &json)
            }
            Err(e) => create_response(500, "Internal Server Error", &error_body(&e.to_string())),
        },
        Err(SketchError::Intent(message)) => {
            warn!("[{}] Intent parser error: {}", request_id, message);
            create_response(422, "Unprocessable Entity", &error_body(&message))
        }
        Err(e) => {
            error!("[{}] Generation failed: {}", request_id, e);
            create_response(500, "Internal Server Error", &error_body(&e.to_string()))
        }
    }
}

fn error_body(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
