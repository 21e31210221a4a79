pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod cron_tasks;
pub mod database;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod service;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use cron_tasks::sweep_expired;

use crate::auth::IdentityResolver;
use crate::clock::{Clock, SystemClock};
use crate::config::StorageBackend;
use crate::database::CheckinStore;
use crate::database::memory::InMemoryStore;
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::middleware::{DEADLINE_HEADER, RequestLogger};
use crate::rate_limit::build_rate_limiter;
use crate::routes as app_routes;
use crate::service::checkin::{CheckinService, spawn_sweep_task};
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, catchers, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};
use rocket_okapi::{get_openapi_route, okapi::merge::marge_spec_list};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str, json_format: bool) {
    // Configure logging with environment variable support
    // RUST_LOG environment variable can be used for fine-grained control per module:
    // Examples:
    //   RUST_LOG=debug                    - Set all to debug
    //   RUST_LOG=campus_checkin=debug               - Set this crate to debug
    //   RUST_LOG=campus_checkin::service=trace      - Set specific module to trace
    //   RUST_LOG=info,campus_checkin::routes=debug  - Global info, routes at debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    if json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn ensure_rocket_secret_key() {
    let profile = std::env::var("ROCKET_PROFILE").unwrap_or_else(|_| "debug".to_string());

    // Only enforce ROCKET_SECRET_KEY requirement for non-debug profiles
    if profile != "debug" && std::env::var("ROCKET_SECRET_KEY").is_err() {
        panic!(
            "ROCKET_SECRET_KEY is required for profile '{}'. Generate one with: openssl rand -base64 32",
            profile
        );
    }
}

fn build_cors(cors_config: &config::CorsConfig) -> CorsOptions {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    // Validate that wildcard origins are not combined with credentials
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
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Accept", DEADLINE_HEADER]),
        allow_credentials: cors_config.allow_credentials,
        ..Default::default()
    }
}

fn get_swagger_config(openapi_url: &str) -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: openapi_url.to_string(),
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
    openapi: rocket_okapi::okapi::openapi3::OpenApi,
}

fn collect_route_specs() -> Vec<RouteSpec> {
    let (session_routes, session_openapi) = app_routes::session::routes();
    let (credential_routes, credential_openapi) = app_routes::credential::routes();
    let (redemption_routes, redemption_openapi) = app_routes::redemption::routes();
    let (health_routes, health_openapi) = app_routes::health::routes();

    vec![
        RouteSpec {
            path: "/sessions",
            routes: session_routes,
            openapi: session_openapi,
        },
        RouteSpec {
            path: "/credentials",
            routes: credential_routes,
            openapi: credential_openapi,
        },
        RouteSpec {
            path: "/redemptions",
            routes: redemption_routes,
            openapi: redemption_openapi,
        },
        RouteSpec {
            path: "/health",
            routes: health_routes,
            openapi: health_openapi,
        },
    ]
}

fn mount_api_routes(mut rocket: Rocket<Build>, base_path: &str, enable_swagger: bool) -> Rocket<Build> {
    let route_specs = collect_route_specs();

    if enable_swagger {
        let mut openapi_list = Vec::new();
        for spec in route_specs {
            rocket = rocket.mount(format!("{}{}", base_path, spec.path), spec.routes);
            openapi_list.push((spec.path, spec.openapi));
        }

        let openapi_docs = match marge_spec_list(&openapi_list) {
            Ok(docs) => docs,
            Err(err) => panic!("Could not merge OpenAPI spec: {}", err),
        };

        let settings = rocket_okapi::settings::OpenApiSettings::default();
        rocket = rocket.mount(base_path, vec![get_openapi_route(openapi_docs, &settings)]);

        let docs_path = join_base_path(base_path, "docs");
        let openapi_url = join_base_path(base_path, "openapi.json");
        rocket = rocket.mount(docs_path, make_swagger_ui(&get_swagger_config(&openapi_url)));
    } else {
        for spec in route_specs {
            rocket = rocket.mount(format!("{}{}", base_path, spec.path), spec.routes);
        }
    }

    rocket
}

/// Shared services handed to request handlers.
pub struct AppState {
    pub service: Arc<CheckinService>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    fn manage(self, rocket: Rocket<Build>) -> Rocket<Build> {
        rocket.manage(self.service).manage(self.identity)
    }
}

async fn init_app_state(config: &Config) -> Result<AppState, AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (store, identity): (Arc<dyn CheckinStore>, Arc<dyn IdentityResolver>) = match config.storage.backend {
        StorageBackend::Postgres => {
            let repo = Arc::new(PostgresRepository {
                pool: db::connect(&config.database).await?,
            });
            let store: Arc<dyn CheckinStore> = repo.clone();
            let identity: Arc<dyn IdentityResolver> = repo;
            (store, identity)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; redemptions will not survive a restart");
            let memory = Arc::new(InMemoryStore::new());
            let store: Arc<dyn CheckinStore> = memory.clone();
            let identity: Arc<dyn IdentityResolver> = memory;
            (store, identity)
        }
    };

    let limiter = build_rate_limiter(&config.rate_limit, clock.clone()).await?;
    let service = Arc::new(CheckinService::new(store, clock, limiter, config)?);

    Ok(AppState { service, identity })
}

fn stage_checkin(config: Config) -> AdHoc {
    AdHoc::try_on_ignite("Check-in services", |rocket| async move {
        match init_app_state(&config).await {
            Ok(state) => {
                tracing::info!(storage = config.storage.backend.as_str(), "Check-in services initialized");
                if config.sweep.enabled {
                    let interval = std::time::Duration::from_secs(config.sweep.interval_seconds.max(1));
                    spawn_sweep_task(state.service.clone(), interval);
                }
                Ok(state.manage(rocket))
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to initialize check-in services");
                Err(rocket)
            }
        }
    })
}

fn assemble(rocket: Rocket<Build>, config: &Config) -> Rocket<Build> {
    let cors = match build_cors(&config.cors).to_cors() {
        Ok(cors) => cors,
        Err(err) => panic!("Failed to create CORS fairing: {}", err),
    };

    let base_path = normalize_base_path(&config.api.base_path);

    let rocket = rocket
        .manage(config.clone())
        .attach(cors)
        .attach(RequestLogger); // Attach request/response logging middleware

    mount_api_routes(rocket, &base_path, config.api.enable_swagger).register(
        base_path.as_str(),
        catchers![
            app_routes::error::bad_request,
            app_routes::error::unauthorized,
            app_routes::error::not_found,
            app_routes::error::conflict,
            app_routes::error::unprocessable,
            app_routes::error::too_many_requests,
            app_routes::error::service_unavailable
        ],
    )
}

pub fn build_rocket(config: Config) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);
    ensure_rocket_secret_key();

    let figment = rocket::Config::figment()
        .merge(("port", config.server.port))
        .merge(("address", config.server.address.clone()));

    let rocket = rocket::custom(figment).attach(stage_checkin(config.clone()));
    assemble(rocket, &config)
}

/// Build the application around services constructed by the caller.
pub fn build_rocket_with(config: Config, state: AppState) -> Rocket<Build> {
    let rocket = state.manage(rocket::build());
    assemble(rocket, &config)
}
