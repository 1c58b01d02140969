mod auth;
pub mod config;
pub mod error;
mod middleware;
pub mod models;
pub mod pkce;
mod routes;
pub mod service;
pub mod store;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use error::app_error::AppError;

use crate::middleware::RequestLogger;
use crate::routes as app_routes;
use crate::service::provider::ProviderRegistry;
use crate::store::stage_session_store;
use rocket::{Build, Rocket, catchers, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str, json_format: bool) {
    // RUST_LOG overrides the configured level, e.g.
    //   RUST_LOG=info,socialnest::service=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    // A subscriber may already be installed when several rockets are built in one process.
    let _ = if json_format { subscriber.json().try_init() } else { subscriber.try_init() };
}

fn build_cors(cors_config: &config::CorsConfig) -> CorsOptions {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    // Credentialed requests cannot use a wildcard origin.
    if is_wildcard && cors_config.allow_credentials {
        panic!(
            "Invalid CORS configuration: Cannot use wildcard origins (*) with credentials enabled. \
            Either set specific origins or disable credentials."
        );
    }

    let allowed_origins = if cors_config.allowed_origins.is_empty() {
        AllowedOrigins::some_exact::<&str>(&[])
    } else if is_wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&cors_config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
    };

    CorsOptions {
        allowed_origins,
        allowed_methods: vec![Method::Get, Method::Post, Method::Options, Method::Head]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Accept"]),
        allow_credentials: cors_config.allow_credentials,
        ..Default::default()
    }
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return config::DEFAULT_API_BASE_PATH.to_string();
    }

    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }

    normalized
}

fn join_base_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');

    if base.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("{}/{}", base, suffix)
    }
}

struct RouteSpec {
    path: &'static str,
    routes: Vec<rocket::Route>,
}

fn collect_route_specs(api_config: &config::ApiConfig) -> Vec<RouteSpec> {
    let mut specs = vec![
        RouteSpec {
            path: "/auth",
            routes: app_routes::auth::routes(),
        },
        RouteSpec {
            path: "/health",
            routes: app_routes::health::routes(),
        },
    ];

    if api_config.enable_diagnostics {
        specs.push(RouteSpec {
            path: "/sessions",
            routes: app_routes::session::routes(),
        });
    }

    specs
}

fn mount_api_routes(mut rocket: Rocket<Build>, base_path: &str, api_config: &config::ApiConfig) -> Rocket<Build> {
    for spec in collect_route_specs(api_config) {
        rocket = rocket.mount(join_base_path(base_path, spec.path), spec.routes);
    }
    rocket
}

/// Builds the server with provider clients derived from configuration.
pub fn build_rocket(config: Config) -> Rocket<Build> {
    let providers = ProviderRegistry::from_config(&config.providers);
    build_rocket_with_providers(config, providers)
}

pub fn build_rocket_with_providers(config: Config, providers: ProviderRegistry) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);

    for provider in models::session::Provider::ALL {
        if !config.providers.get(provider).is_configured() {
            warn!(%provider, "provider credentials missing, connect attempts will fail");
        }
    }

    let cors = build_cors(&config.cors).to_cors().expect("Failed to create CORS fairing");
    let base_path = normalize_base_path(&config.api.base_path);

    let figment = rocket::Config::figment()
        .merge(("address", config.server.address.clone()))
        .merge(("port", config.server.port));

    let mut rocket = rocket::custom(figment)
        .attach(stage_session_store(config.session.clone()))
        .attach(cors)
        .attach(RequestLogger);

    rocket = mount_api_routes(rocket, &base_path, &config.api);
    rocket = rocket.register(
        base_path.as_str(),
        catchers![
            app_routes::error::not_found,
            app_routes::error::conflict,
            app_routes::error::unprocessable,
            app_routes::error::internal_error
        ],
    );

    info!(base_path = %base_path, diagnostics = config.api.enable_diagnostics, "routes mounted");

    rocket.manage(providers).manage(config)
}
