//! JSON HTTP ingress: routed and direct Diameter/RADIUS exchanges, plus the
//! Prometheus text endpoint.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use radiam_codec::{DiameterMessage, RadiusPacket};
use radiam_config::HttpConfig;
use radiam_core::{RadiamError, Result};
use radiam_metrics as metrics;
use radiam_router::{RadiusRouteParams, Router};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub default_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct DiameterBody {
    #[serde(rename = "Message")]
    message: DiameterMessage,
    #[serde(rename = "destination", default)]
    destination: Option<String>,
    #[serde(rename = "timeoutSpec", default)]
    timeout_spec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RadiusBody {
    #[serde(rename = "Packet")]
    packet: RadiusPacket,
    #[serde(rename = "destination", default)]
    destination: Option<String>,
    #[serde(rename = "timeoutSpec", default)]
    timeout_spec: Option<String>,
    #[serde(rename = "tries", default)]
    tries: Option<u32>,
    #[serde(rename = "serverTries", default)]
    server_tries: Option<u32>,
    #[serde(rename = "secret", default)]
    secret: Option<String>,
}

/// Parse a duration spec such as `"2s"` or `"250ms"`
fn parse_duration(spec: &str) -> Option<Duration> {
    if let Some(millis) = spec.strip_suffix("ms") {
        return millis.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = spec.strip_suffix('s') {
        return secs
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| *v > 0.0 && v.is_finite())
            .map(Duration::from_secs_f64);
    }
    None
}

fn status_for(error: &RadiamError) -> StatusCode {
    match error {
        RadiamError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        RadiamError::MalformedHeader(_)
        | RadiamError::Truncated { .. }
        | RadiamError::InvalidAvpValue { .. }
        | RadiamError::Dictionary(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn count(path: &str, status: StatusCode) {
    metrics::HTTP_ROUTER_EXCHANGES
        .with_label_values(&[path, status.as_str()])
        .inc();
}

fn reply<T: serde::Serialize>(path: &str, result: Result<T>) -> Response {
    match result {
        Ok(value) => {
            count(path, StatusCode::OK);
            (StatusCode::OK, Json(value)).into_response()
        }
        Err(e) => {
            let status = status_for(&e);
            count(path, status);
            (status, e.to_string()).into_response()
        }
    }
}

fn bad_request(path: &str, detail: String) -> Response {
    count(path, StatusCode::BAD_REQUEST);
    (StatusCode::BAD_REQUEST, detail).into_response()
}

fn timeout_from(state: &AppState, spec: &Option<String>) -> std::result::Result<Duration, String> {
    match spec {
        None => Ok(state.default_timeout),
        Some(spec) => {
            parse_duration(spec).ok_or_else(|| format!("invalid timeoutSpec {spec:?}"))
        }
    }
}

async fn route_diameter_request(
    State(state): State<AppState>,
    body: std::result::Result<Json<DiameterBody>, JsonRejection>,
) -> Response {
    const PATH: &str = "/routeDiameterRequest";
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(PATH, rejection.to_string()),
    };
    let timeout = match timeout_from(&state, &body.timeout_spec) {
        Ok(timeout) => timeout,
        Err(detail) => return bad_request(PATH, detail),
    };
    reply(PATH, state.router.route_diameter(body.message, timeout).await)
}

async fn diameter_request(
    State(state): State<AppState>,
    body: std::result::Result<Json<DiameterBody>, JsonRejection>,
) -> Response {
    const PATH: &str = "/diameterRequest";
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(PATH, rejection.to_string()),
    };
    let Some(peer) = body.destination.clone().filter(|d| !d.is_empty()) else {
        return bad_request(PATH, "destination peer is required".to_string());
    };
    let timeout = match timeout_from(&state, &body.timeout_spec) {
        Ok(timeout) => timeout,
        Err(detail) => return bad_request(PATH, detail),
    };
    reply(
        PATH,
        state.router.send_to_peer(&peer, body.message, timeout).await,
    )
}

fn radius_params(state: &AppState, body: &RadiusBody) -> std::result::Result<RadiusRouteParams, String> {
    let timeout = timeout_from(state, &body.timeout_spec)?;
    let defaults = RadiusRouteParams::default();
    Ok(RadiusRouteParams {
        timeout,
        tries: body.tries.unwrap_or(defaults.tries),
        server_tries: body.server_tries.unwrap_or(defaults.server_tries),
        secret: body.secret.clone(),
    })
}

async fn route_radius_request(
    State(state): State<AppState>,
    body: std::result::Result<Json<RadiusBody>, JsonRejection>,
) -> Response {
    const PATH: &str = "/routeRadiusRequest";
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(PATH, rejection.to_string()),
    };
    let params = match radius_params(&state, &body) {
        Ok(params) => params,
        Err(detail) => return bad_request(PATH, detail),
    };
    let destination = body.destination.clone().unwrap_or_default();
    reply(
        PATH,
        state
            .router
            .route_radius(body.packet, &destination, params)
            .await,
    )
}

async fn radius_request(
    State(state): State<AppState>,
    body: std::result::Result<Json<RadiusBody>, JsonRejection>,
) -> Response {
    const PATH: &str = "/radiusRequest";
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(PATH, rejection.to_string()),
    };
    let Some(destination) = body.destination.clone().filter(|d| !d.is_empty()) else {
        return bad_request(PATH, "destination server group is required".to_string());
    };
    let params = match radius_params(&state, &body) {
        Ok(params) => params,
        Err(detail) => return bad_request(PATH, detail),
    };
    reply(
        PATH,
        state
            .router
            .route_radius(body.packet, &destination, params)
            .await,
    )
}

async fn metrics_endpoint() -> Response {
    (StatusCode::OK, metrics::gather_metrics()).into_response()
}

pub fn build_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/routeDiameterRequest", post(route_diameter_request))
        .route("/routeRadiusRequest", post(route_radius_request))
        .route("/diameterRequest", post(diameter_request))
        .route("/radiusRequest", post(radius_request))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the ingress: HTTP/2 over TLS by default, plain HTTP when the
/// config opts out.
pub async fn serve(state: AppState, config: &HttpConfig) -> Result<()> {
    let app = build_app(state);
    let addr: std::net::SocketAddr = config
        .bind
        .parse()
        .map_err(|_| RadiamError::Config(format!("bad http bind address {}", config.bind)))?;

    if config.use_plain_http {
        info!(%addr, "http ingress listening (plain)");
        axum_server::bind(addr)
            .serve(app.into_make_service())
            .await?;
    } else {
        let (Some(cert), Some(key)) = (&config.cert_path, &config.key_path) else {
            return Err(RadiamError::Config(
                "cert_path and key_path are required unless use_plain_http is set".to_string(),
            ));
        };
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
            .await
            .map_err(|e| RadiamError::Config(format!("tls setup: {e}")))?;
        info!(%addr, "http ingress listening (tls)");
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await?;
    }
    Ok(())
}
