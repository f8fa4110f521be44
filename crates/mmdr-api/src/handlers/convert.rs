//! Request/response render handlers.

use crate::error::ApiError;
use crate::headers;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use mmdr_core::{Error, Format, RenderOptions, RenderRequest, RenderResult};
use mmdr_trace::render_span;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::Instrument;

/// Accepts padded and unpadded input.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const MMD_REQUIRED: &str = "mmd parameter (base64 encoded mermaid code) is required";

#[derive(Debug, Default, Deserialize)]
pub struct RenderQuery {
    pub mmd: Option<String>,
    pub theme: Option<String>,
    pub bg: Option<String>,
    pub w: Option<String>,
    pub h: Option<String>,
}

impl RenderQuery {
    fn options(&self) -> RenderOptions {
        RenderOptions {
            theme: self.theme.clone(),
            background_color: self.bg.clone(),
            width: self.w.as_deref().and_then(parse_dimension),
            height: self.h.as_deref().and_then(parse_dimension),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertBody {
    #[serde(default)]
    pub mermaid: Option<String>,
    #[serde(flatten)]
    pub options: RenderOptions,
    /// `binary` (default) or `base64`, PNG only.
    #[serde(default)]
    pub format: Option<String>,
}

/// Leading decimal digits, like a lenient integer parse. Zero and garbage
/// fall back to the server default.
fn parse_dimension(value: &str) -> Option<u32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().filter(|v| *v > 0)
}

/// Decode the `mmd` query parameter.
///
/// Query parsing turns `+` into a space, so spaces are mapped back. The
/// URL-safe alphabet is accepted too.
pub fn decode_source(encoded: &str) -> Result<String, ApiError> {
    let normalized: String = encoded
        .chars()
        .filter(|c| *c != '\n' && *c != '\r' && *c != '\t')
        .map(|c| match c {
            ' ' | '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let bytes = LENIENT
        .decode(normalized.trim())
        .map_err(|_| ApiError::bad_request("mmd parameter is not valid base64"))?;
    String::from_utf8(bytes)
        .map_err(|_| ApiError::bad_request("mmd parameter does not decode to UTF-8 text"))
}

async fn render(state: &AppState, request: RenderRequest) -> Result<RenderResult, ApiError> {
    let span = render_span("http", request.format.as_str());
    let result = state
        .coordinator
        .convert(&request)
        .instrument(span.clone())
        .await?;
    span.record("mmdr.cache_status", result.cache_status.as_str());
    span.record("mmdr.cache_key", result.cache_key.as_str());
    Ok(result)
}

fn artifact_response(result: RenderResult, client_cache: bool) -> Response {
    let mut headers = headers::diagnostics(&result);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(result.format.content_type()),
    );
    if client_cache {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=3600"),
        );
    }
    (headers, result.artifact).into_response()
}

async fn get_render(state: Arc<AppState>, query: RenderQuery, format: Format) -> Result<Response, ApiError> {
    let encoded = query
        .mmd
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(MMD_REQUIRED))?;
    let source = decode_source(encoded)?;

    let result = render(&state, RenderRequest::new(source, format, query.options())).await?;
    Ok(artifact_response(result, state.config.client_cache_enabled))
}

pub async fn get_svg(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, ApiError> {
    get_render(state, query, Format::Svg).await
}

pub async fn get_png(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, ApiError> {
    get_render(state, query, Format::Png).await
}

fn parse_body(body: Result<Json<ConvertBody>, JsonRejection>, format: Format) -> Result<(RenderRequest, ConvertBody), ApiError> {
    let Json(body) = body.map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;
    let source = body
        .mermaid
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(Error::MissingSource)?
        .to_string();
    let request = RenderRequest::new(source, format, body.options.clone());
    Ok((request, body))
}

pub async fn convert_svg(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConvertBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let (request, _) = parse_body(body, Format::Svg)?;
    let result = render(&state, request).await?;
    Ok(artifact_response(result, false))
}

pub async fn convert_png(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConvertBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let (request, body) = parse_body(body, Format::Png)?;
    let result = render(&state, request).await?;

    if body.format.as_deref() != Some("base64") {
        return Ok(artifact_response(result, false));
    }

    let headers = headers::diagnostics(&result);
    let payload = json!({
        "success": true,
        "format": "png",
        "encoding": "base64",
        "data": STANDARD.encode(&result.artifact),
        "size": result.artifact.len(),
    });
    Ok((headers, Json(payload)).into_response())
}
