use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use log::{debug, error, info};
use serde_json::{json, Map, Value};

use crate::api::body::{parse_body, parse_query};
use crate::api::routes::StubRouter;
use crate::logic::{Coercer, DataGenerator, GenerateParams, Validator};
use crate::model::{extract_expansions, Fixtures, Schema, Spec};

const REQUEST_ID: &str = "req_123";
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const INVALID_AUTHORIZATION: &str = "Please authenticate by specifying an `Authorization` \
     header with any valid looking testmode secret API key. For example, `Authorization: \
     Bearer KEYSUPERSECRET`.";

const INTERNAL_SERVER_ERROR: &str = "An internal error occurred.";

const TYPE_INVALID_REQUEST_ERROR: &str = "invalid_request_error";

/// Everything a request handler needs, shared read-only across requests.
pub struct AppState {
    pub spec: Spec,
    pub fixtures: Fixtures,
    pub router: StubRouter,
    pub version: String,
}

pub type SharedState = Arc<AppState>;

/// A request that could not be served, carrying the status it maps to. The
/// message always surfaces in the `invalid_request_error` body shape.
struct ApiFailure {
    status: StatusCode,
    message: String,
}

impl ApiFailure {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiFailure {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        ApiFailure {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        ApiFailure {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

/// Serves every route in the loaded OpenAPI document: authorizes, routes,
/// validates the payload, generates a response from the schema and
/// fixtures, and writes it back.
pub async fn handle_request(State(state): State<SharedState>, request: Request) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or("").to_string();
    let headers = parts.headers;

    info!("request: {method} {path}");

    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !validate_auth(auth) {
        let message = format!("{INVALID_AUTHORIZATION} Authorization was '{auth}'.");
        return write_error(&state, &headers, StatusCode::UNAUTHORIZED, false, &message, start);
    }

    let body_bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let message = format!("Couldn't read request body: {e}");
            return write_error(&state, &headers, StatusCode::BAD_REQUEST, true, &message, start);
        }
    };

    match process(&state, &headers, &method, &path, &query, &body_bytes) {
        Ok(data) => write_response(&state, &headers, StatusCode::OK, true, &data, start),
        Err(failure) => {
            write_error(&state, &headers, failure.status, true, &failure.message, start)
        }
    }
}

/// The CPU-bound part of request handling; suspension points stay in
/// `handle_request`.
fn process(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    query: &str,
    body: &[u8],
) -> Result<Value, ApiFailure> {
    let Some((route, mut path_params)) = state.router.route(method, path) else {
        return Err(ApiFailure::not_found(format!(
            "Unrecognized request URL ({method}: {path})."
        )));
    };

    debug!("path params: {path_params:?}");

    let response = ["200", "201", "202"]
        .iter()
        .find_map(|code| route.operation.responses.get(*code))
        .ok_or_else(|| {
            error!("couldn't find a success response for {method} {path}");
            ApiFailure::internal(INTERNAL_SERVER_ERROR)
        })?;

    let (wrap_with_list, item_schema, meta_schema) =
        analyze_response(state, response).map_err(|e| {
            error!("couldn't analyze response schema for {method} {path}: {e:#}");
            ApiFailure::internal(INTERNAL_SERVER_ERROR)
        })?;

    let content_type_raw = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    // Parameters after `;` don't participate in the media type check.
    let content_type = content_type_raw.split(';').next().unwrap_or("").trim();

    let is_query_method = method == "GET" || method == "DELETE";
    let mut request_data = if is_query_method {
        Value::Object(parse_query(query))
    } else {
        Value::Object(
            parse_body(content_type, body)
                .map_err(|e| ApiFailure::bad_request(format!("Couldn't parse query/body: {e}")))?,
        )
    };

    debug!("request data: {request_data}");

    // GET sends parameters only in the query; DELETE parameters are rare
    // enough that their content type isn't policed either.
    if !is_query_method {
        if let Some(expected) = &route.request_media_type {
            if content_type_raw.is_empty() {
                return Err(ApiFailure::bad_request(format!(
                    "Request's `Content-Type` header was empty. Expected: `{expected}`."
                )));
            }
            if content_type != expected {
                return Err(ApiFailure::bad_request(format!(
                    "Request's `Content-Type` didn't match the path's expected media type. \
                     Expected: `{expected}`. Was: `{content_type}`."
                )));
            }
        }
    }

    if let Some(schema) = &route.request_schema {
        Coercer::coerce_params(schema, &mut request_data)
            .map_err(|e| ApiFailure::bad_request(format!("Request coercion error: {e}")))?;

        let validator = Validator::new(&state.spec.components.schemas);
        validator
            .validate(schema, &request_data)
            .map_err(|e| ApiFailure::bad_request(format!("Request validation error: {e}")))?;
    }

    let request_map = match request_data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let expansions = extract_expansions(&request_map);
    debug!("expansions: {expansions:?}");

    let generator = DataGenerator::new(&state.spec.components.schemas, &state.fixtures);
    generator
        .generate(
            item_schema,
            meta_schema,
            GenerateParams {
                expansions: expansions.as_ref(),
                path_params: path_params.as_mut(),
                request_data: &request_map,
                request_method: method,
                request_path: path,
                wrap_with_list,
            },
        )
        .map_err(|e| {
            error!("couldn't generate response: {e:#}");
            ApiFailure::internal(e.to_string())
        })
}

/// Resolves a route's success response down to the schema the generator
/// consumes: whether `data` is a list (by presence of `items`), the item
/// schema, and the `meta` schema for list envelopes.
fn analyze_response<'a>(
    state: &'a AppState,
    response: &'a crate::model::Response,
) -> anyhow::Result<(bool, &'a Schema, Option<&'a Schema>)> {
    let response = state.spec.components.resolve_response_ref(response)?;

    let content = response
        .content
        .get("application/json")
        .ok_or_else(|| anyhow::anyhow!("response has no application/json content"))?;
    let envelope = content
        .schema
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("response content has no schema"))?;
    let data_property = envelope
        .properties
        .get("data")
        .ok_or_else(|| anyhow::anyhow!("response envelope has no `data` property"))?;

    let (wrap_with_list, item_schema) = match &data_property.items {
        Some(items) => (true, items.as_ref()),
        None => (false, data_property),
    };
    let item_schema = state.spec.components.resolve_schema_ref(item_schema)?;

    let meta_schema = if wrap_with_list {
        match envelope.properties.get("meta") {
            Some(meta) => Some(state.spec.components.resolve_schema_ref(meta)?),
            None => None,
        }
    } else {
        None
    };

    Ok((wrap_with_list, item_schema, meta_schema))
}

/// Accepts `Bearer KEY<anything-non-empty>` and nothing else.
pub fn validate_auth(auth: &str) -> bool {
    if auth.is_empty() {
        return false;
    }

    let parts: Vec<&str> = auth.split(' ').collect();
    if parts.len() != 2 || parts[0] != "Bearer" || parts[1].is_empty() {
        return false;
    }

    let key_parts: Vec<&str> = parts[1].split("KEY").collect();
    key_parts.len() == 2 && key_parts[0].is_empty() && !key_parts[1].is_empty()
}

fn write_error(
    state: &AppState,
    request_headers: &HeaderMap,
    status: StatusCode,
    include_request_ids: bool,
    message: &str,
    start: Instant,
) -> Response {
    let body = json!({
        "error": {
            "type": TYPE_INVALID_REQUEST_ERROR,
            "message": message,
        }
    });
    write_response(state, request_headers, status, include_request_ids, &body, start)
}

fn write_response(
    state: &AppState,
    request_headers: &HeaderMap,
    status: StatusCode,
    include_request_ids: bool,
    data: &Value,
    start: Instant,
) -> Response {
    let user_agent = request_headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    // curl users get something readable on the terminal.
    let encoded = if user_agent.starts_with("curl/") {
        let mut pretty =
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "null".to_string());
        pretty.push('\n');
        pretty
    } else {
        serde_json::to_string(data).unwrap_or_else(|_| "null".to_string())
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(version) = HeaderValue::from_str(&state.version) {
        headers.insert(HeaderName::from_static("stub-api-version"), version);
    }
    if include_request_ids {
        headers.insert(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static(REQUEST_ID),
        );
        if let Some(inbound) = request_headers.get("request-id") {
            headers.insert(HeaderName::from_static("request-id"), inbound.clone());
        }
    }

    info!(
        "response: elapsed={:?} status={}",
        start.elapsed(),
        status.as_u16()
    );

    (status, headers, encoded).into_response()
}

/// Response rendered when a handler panics, matching the JSON error shape
/// of every other failure. The `Request-Id` echo and version header are
/// filled in by [`propagate_response_headers`], which still has the request
/// in hand.
pub fn panic_response() -> Response {
    let body = json!({
        "error": {
            "type": TYPE_INVALID_REQUEST_ERROR,
            "message": INTERNAL_SERVER_ERROR,
        }
    });
    let encoded = body.to_string();

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static(REQUEST_ID),
            ),
        ],
        Body::from(encoded),
    )
        .into_response()
}

/// Outermost middleware: makes sure the headers every non-401 response must
/// carry are present even when the handler panicked and the catch-panic
/// layer rendered the 500 without request context.
pub async fn propagate_response_headers(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let inbound_request_id = request.headers().get("request-id").cloned();
    let mut response = next.run(request).await;

    if response.status() != StatusCode::UNAUTHORIZED {
        let headers = response.headers_mut();
        if !headers.contains_key("x-request-id") {
            headers.insert(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static(REQUEST_ID),
            );
        }
        if let Some(inbound) = inbound_request_id {
            if !headers.contains_key("request-id") {
                headers.insert(HeaderName::from_static("request-id"), inbound);
            }
        }
        if !headers.contains_key("stub-api-version") {
            if let Ok(version) = HeaderValue::from_str(&state.version) {
                headers.insert(HeaderName::from_static("stub-api-version"), version);
            }
        }
    }

    response
}
