use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use vg_domain::config::{Config, ConfigSeverity};
use vg_providers::OpenAiCompatProvider;

mod agent;
mod runtime;
mod session;
mod state;
mod ws;

use agent::AgentConfig;
use runtime::BuiltinToolExecutor;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config_path = std::env::var("VOXRELAY_CONFIG").ok().map(std::path::PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    run_server(config).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vg_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("voxrelay starting");

    let issues = config.validate();
    let mut has_errors = false;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("{issue}"),
            ConfigSeverity::Error => {
                tracing::error!("{issue}");
                has_errors = true;
            }
        }
    }
    if has_errors {
        anyhow::bail!("configuration is invalid, refusing to start");
    }

    let llm_api_key = read_api_key(&config.platform.llm.api_key_env)?;
    let stt_api_key = read_api_key(&config.platform.stt.api_key_env)?;
    let tts_api_key = read_api_key(&config.platform.tts.api_key_env)?;

    let llm = Arc::new(OpenAiCompatProvider::new(
        config.platform.llm.base_url.clone(),
        llm_api_key,
    )?);
    let builtins = Arc::new(BuiltinToolExecutor::new());
    let agent = AgentConfig::default_agent();

    let state = AppState::new(
        config.platform.clone(),
        llm,
        builtins,
        agent,
        stt_api_key,
        tts_api_key,
    );

    let cors_layer = build_cors_layer(&config.server.cors);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/session", get(ws::session_ws))
        .layer(cors_layer)
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "voxrelay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn read_api_key(env_var: &str) -> anyhow::Result<String> {
    std::env::var(env_var).with_context(|| format!("missing required environment variable {env_var}"))
}

/// Splits a configured origin list into exact `HeaderValue`s and
/// `"scheme://host:"` prefixes for the `:*` wildcard-port entries.
/// Unparseable entries are logged and dropped rather than rejected outright.
fn partition_cors_origins(origins: &[String]) -> (Vec<HeaderValue>, Vec<String>) {
    let mut exact = Vec::new();
    let mut port_wildcard_prefixes = Vec::new();
    for origin in origins {
        if let Some(prefix) = origin.strip_suffix('*').filter(|_| origin.ends_with(":*")) {
            port_wildcard_prefixes.push(prefix.to_owned());
            continue;
        }
        match origin.parse::<HeaderValue>() {
            Ok(hv) => exact.push(hv),
            Err(_) => tracing::warn!(origin = %origin, "invalid CORS origin, skipping"),
        }
    }
    (exact, port_wildcard_prefixes)
}

/// True if `origin` is `prefix` followed by one or more digits — i.e. the
/// same host/scheme as `prefix` on some numeric port. Validating that the
/// remainder is digits-only keeps `"http://localhost:"` from also matching
/// `"http://localhost:3000.evil.com"`.
fn matches_port_wildcard(origin: &str, prefix: &str) -> bool {
    match origin.strip_prefix(prefix) {
        Some(port) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn is_allowed_origin(origin: &HeaderValue, exact: &[HeaderValue], port_wildcard_prefixes: &[String]) -> bool {
    if exact.contains(origin) {
        return true;
    }
    let origin_str = origin.to_str().unwrap_or("");
    port_wildcard_prefixes
        .iter()
        .any(|prefix| matches_port_wildcard(origin_str, prefix))
}

/// A literal `"*"` entry opens the gateway to any origin; otherwise origins
/// are matched exactly or, for `"scheme://host:*"` entries, against any
/// numeric port on that host.
fn build_cors_layer(cors: &vg_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" -- all origins allowed");
        return base.allow_origin(tower_http::cors::Any);
    }

    let (exact, port_wildcard_prefixes) = partition_cors_origins(&cors.allowed_origins);
    let allow_origin = if port_wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| is_allowed_origin(origin, &exact, &port_wildcard_prefixes))
    };

    base.allow_origin(allow_origin).allow_credentials(true)
}

#[cfg(test)]
mod cors_tests {
    use super::*;

    #[test]
    fn partitions_exact_and_wildcard_entries() {
        let origins = vec![
            "https://app.example.com".to_string(),
            "http://localhost:*".to_string(),
            "bad\nheader\nvalue".to_string(),
        ];
        let (exact, wildcards) = partition_cors_origins(&origins);
        assert_eq!(exact, vec![HeaderValue::from_static("https://app.example.com")]);
        assert_eq!(wildcards, vec!["http://localhost:".to_string()]);
    }

    #[test]
    fn wildcard_matches_only_numeric_ports() {
        assert!(matches_port_wildcard("http://localhost:3000", "http://localhost:"));
        assert!(!matches_port_wildcard("http://localhost", "http://localhost:"));
        assert!(!matches_port_wildcard("http://localhost:", "http://localhost:"));
        assert!(!matches_port_wildcard(
            "http://localhost:3000.evil.com",
            "http://localhost:"
        ));
    }

    #[test]
    fn is_allowed_origin_checks_exact_then_wildcard() {
        let exact = vec![HeaderValue::from_static("https://app.example.com")];
        let wildcards = vec!["http://localhost:".to_string()];

        assert!(is_allowed_origin(
            &HeaderValue::from_static("https://app.example.com"),
            &exact,
            &wildcards
        ));
        assert!(is_allowed_origin(
            &HeaderValue::from_static("http://localhost:5173"),
            &exact,
            &wildcards
        ));
        assert!(!is_allowed_origin(
            &HeaderValue::from_static("https://evil.example.com"),
            &exact,
            &wildcards
        ));
    }
}
