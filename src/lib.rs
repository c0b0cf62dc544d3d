use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub mod api;
pub mod error;
pub mod exif;
pub mod formats;
pub mod geocode;
pub mod logging;
pub mod processor;
pub mod startup_checks;
pub mod watermark;

use formats::ChromaSubsampling;
use watermark::WatermarkStyle;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    pub paths: PathsConfig,
    pub fonts: FontsConfig,
    pub style: WatermarkStyle,
    pub jpeg: JpegConfig,
    pub geocode: GeocodeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// When set, uploads must carry it in `X-API-Key` (HTTP) or `token`
    /// (WebSocket).
    pub api_token: Option<String>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
    /// Also write logs here, rotated daily.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_directory: PathBuf,
    pub output_directory: PathBuf,
    /// Lowercase, with the leading dot.
    pub image_extensions: Vec<String>,
    pub batch_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FontsConfig {
    /// Font for the timestamp line.
    pub primary_path: PathBuf,
    /// Font for the location line; falls back to the primary font.
    pub secondary_path: PathBuf,
}

/// Used when the source JPEG's compression can't be inferred.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JpegConfig {
    pub default_quality: u8,
    pub default_subsampling: ChromaSubsampling,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeocodeConfig {
    pub amap_api_key: Option<String>,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_token: None,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Photo Watermark".to_string(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_directory: PathBuf::from("input"),
            output_directory: PathBuf::from("output"),
            image_extensions: vec![".jpg".to_string(), ".jpeg".to_string(), ".png".to_string()],
            batch_concurrency: 4,
        }
    }
}

impl Default for FontsConfig {
    fn default() -> Self {
        Self {
            primary_path: PathBuf::from("sarasa-mono-sc-semibold.ttf"),
            secondary_path: PathBuf::from("sarasa-mono-sc-semibold.ttf"),
        }
    }
}

impl Default for JpegConfig {
    fn default() -> Self {
        Self {
            default_quality: 95,
            default_subsampling: ChromaSubsampling::Full444,
        }
    }
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            amap_api_key: None,
            endpoint: "https://restapi.amap.com/v3/geocode/regeo".to_string(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml_edit::de::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

impl Config {
    /// Load from `path` (defaults when the file doesn't exist), then apply
    /// `WATERMARK_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml_edit::de::from_str::<Config>(&content)?
        } else {
            info!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(token) = lookup("WATERMARK_API_TOKEN") {
            self.server.api_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(key) = lookup("WATERMARK_AMAP_API_KEY") {
            self.geocode.amap_api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(host) = lookup("WATERMARK_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env(&lookup, "WATERMARK_SERVER_PORT")? {
            self.server.port = port;
        }
        if let Some(dir) = lookup("WATERMARK_INPUT_DIR") {
            self.paths.input_directory = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("WATERMARK_OUTPUT_DIR") {
            self.paths.output_directory = PathBuf::from(dir);
        }
        if let Some(exts) = lookup("WATERMARK_IMAGE_EXTS") {
            self.paths.image_extensions = parse_extensions(&exts);
        }
        if let Some(font) = lookup("WATERMARK_TIME_FONT_PATH") {
            self.fonts.primary_path = PathBuf::from(font);
        }
        if let Some(font) = lookup("WATERMARK_LOCATION_FONT_PATH") {
            self.fonts.secondary_path = PathBuf::from(font);
        }

        let style = &mut self.style;
        if let Some(ratio) = parse_env(&lookup, "WATERMARK_TIME_FONT_SIZE_RATIO")? {
            style.primary_size_ratio = ratio;
        }
        if let Some(ratio) = parse_env(&lookup, "WATERMARK_LOCATION_FONT_SIZE_RATIO")? {
            style.secondary_size_ratio = ratio;
        }
        if let Some(ratio) = parse_env(&lookup, "WATERMARK_MARGIN_RATIO")? {
            style.margin_ratio = ratio;
        }
        if let Some(ratio) = parse_env(&lookup, "WATERMARK_PADDING_RATIO")? {
            style.padding_ratio = ratio;
        }
        if let Some(spacing) = parse_env(&lookup, "WATERMARK_LINE_SPACING")? {
            style.line_spacing = spacing;
        }
        if let Some(radius) = parse_env(&lookup, "WATERMARK_BLUR_RADIUS")? {
            style.blur_radius = radius;
        }

        if let Some(quality) = parse_env(&lookup, "WATERMARK_DEFAULT_JPEG_QUALITY")? {
            self.jpeg.default_quality = quality;
        }
        if let Some(subsampling) = parse_env(&lookup, "WATERMARK_DEFAULT_JPEG_SUBSAMPLING")? {
            self.jpeg.default_subsampling = subsampling;
        }

        if let Some(level) = lookup("WATERMARK_LOG_LEVEL") {
            self.app.log_level = level;
        }
        if let Some(file) = lookup("WATERMARK_LOG_FILE") {
            self.app.log_file = Some(PathBuf::from(file)).filter(|f| !f.as_os_str().is_empty());
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    match value.trim().parse() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::InvalidEnv { name, value }),
    }
}

/// `".JPG, png"` → `[".jpg", ".png"]`
fn parse_extensions(list: &str) -> Vec<String> {
    list.split(',')
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{}", ext)
            }
        })
        .collect()
}

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use processor::Watermarker;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub watermarker: Arc<Watermarker>,
}

/// Build the router, loading fonts and the geocoder from `config`.
pub async fn create_app(config: Config) -> Result<Router, error::ProcessError> {
    let watermarker = Arc::new(Watermarker::from_config(&config)?);
    Ok(create_app_with(config, watermarker))
}

pub fn create_app_with(config: Config, watermarker: Arc<Watermarker>) -> Router {
    let max_upload_bytes = config.server.max_upload_bytes;
    let app_state = AppState {
        config,
        watermarker,
    };

    Router::new()
        .route("/", axum::routing::get(api::status_handler))
        .route(
            "/watermark/file",
            axum::routing::post(api::watermark_file_handler),
        )
        .route(
            "/watermark/stream",
            axum::routing::get(api::watermark_stream_handler),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::info_span!(
                        "http_request",
                        method = %method,
                        uri = %uri,
                        matched_path,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    let user_agent = request
                        .headers()
                        .get("user-agent")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");

                    tracing::info!(
                        target: "access_log",
                        method = %request.method(),
                        path = %request.uri().path(),
                        user_agent = %user_agent,
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let size = response
                            .headers()
                            .get("content-length")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("-");

                        tracing::info!(
                            target: "access_log",
                            status = %response.status(),
                            size = %size,
                            latency_ms = %latency.as_millis(),
                            "response"
                        );
                    },
                ),
        )
        // Browser clients call the API from any origin
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}
