//! Appointment Scheduler
//!
//! A booking service for a small team of staff users.
//!
//! ## Features
//!
//! - **Availability**: weekly hours, holiday closures and per-slot overrides
//! - **Booking**: race-free slot reservation on a 30 minute grid
//! - **Staff Portal**: manage own hours, blocked slots and appointments
//! - **Multisite Sync**: child sites book through a master site

mod availability;
mod booking;
mod config;
mod db;
mod error;
mod handlers;
mod holidays;
mod ledger;
mod models;
mod scheduling;
mod services;
mod sync;
mod validation;

use std::net::SocketAddr;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use handlers::{admin, auth, availability as public, bookings, staff, AppState};
use sync::{SyncClient, SyncMode};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Largest accepted JSON request body
const MAX_BODY_BYTES: usize = 256 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appointment_scheduler=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Starting Appointment Scheduler");
    tracing::info!("Environment: {:?}", config.environment);
    tracing::info!("Sync mode: {:?}", config.sync.mode);

    // Create database pool
    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url, config.max_connections).await?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    // Appointments used to be stored in local time
    ledger::mark_utc_if_empty(&pool).await?;
    let tz = db::settings::load_timezone(&pool).await?;
    if ledger::migrate_local_to_utc(&pool, tz).await? {
        tracing::info!(timezone = %tz.name(), "Stored appointments converted to UTC");
    }

    if let Some((username, password)) = &config.bootstrap_admin {
        auth::bootstrap_admin(&pool, username, password).await?;
    }

    let events = booking::EventBus::default();
    booking::events::spawn_audit_listener(pool.clone(), &events);

    // Children hold no appointments, so there is nothing to purge
    if config.sync.mode != SyncMode::Child {
        ledger::cleanup::spawn(pool.clone(), config.cleanup_interval);
    }

    let sync_client = match (&config.sync.mode, &config.sync.master_url) {
        (SyncMode::Child, Some(url)) => {
            tracing::info!("Delegating bookings to master site {}", url);
            Some(SyncClient::new(url, &config.sync.key, config.sync.timeout)?)
        }
        _ => None,
    };

    // Create application state
    let state = AppState {
        pool: pool.clone(),
        is_production: config.is_production(),
        trusted_proxies: config.trusted_proxies.clone(),
        session_expiry_hours: config.session_expiry_hours,
        debug_errors: config.debug_errors,
        lock_wait: config.lock_wait,
        sync_mode: config.sync.mode,
        sync_key: config.sync.key.clone(),
        sync_client,
        events,
    };

    // Build CORS layer
    let cors = if config.is_production() {
        CorsLayer::new()
            .allow_origin(
                config
                    .cors_origins
                    .iter()
                    .filter_map(|o| o.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::permissive()
    };

    let public_routes = Router::new()
        .route("/services", get(public::get_services))
        .route("/holidays", get(public::get_holidays))
        .route("/availability/times", get(public::get_available_times))
        .route("/availability/days", get(public::get_available_days))
        .route("/availability/months", get(public::get_available_months))
        .route("/bookings", post(bookings::create_booking))
        .route("/auth/login", post(auth::staff_login))
        .route("/auth/logout", post(auth::staff_logout))
        .route("/auth/me", get(auth::get_current_staff));

    let staff_routes = Router::new()
        .route("/staff/availability", get(staff::get_availability))
        .route("/staff/availability/weekly", get(staff::get_weekly).put(staff::update_weekly))
        .route("/staff/availability/holidays", get(staff::get_holidays).put(staff::update_holidays))
        .route(
            "/staff/availability/overrides",
            get(staff::get_overrides)
                .put(staff::update_overrides)
                .patch(staff::set_override),
        )
        .route(
            "/staff/blocks",
            get(staff::list_blocks)
                .post(staff::block_slots)
                .delete(staff::unblock_slot),
        )
        .route("/staff/appointments", get(staff::list_appointments))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::middleware::require_local_bookings,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::middleware::require_staff,
        ));

    let admin_routes = Router::new()
        .route("/admin/settings", get(admin::get_settings))
        .route("/admin/settings/timezone", put(admin::update_timezone))
        .route("/admin/services", put(admin::update_services))
        .route("/admin/users", get(admin::list_users).post(admin::create_user))
        .route("/admin/users/:username", put(admin::update_user_booking))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::middleware::require_admin,
        ));

    // A child site stores no appointments of its own
    let admin_booking_routes = Router::new()
        .route(
            "/admin/appointments",
            post(admin::create_appointment).delete(admin::delete_submission_appointment),
        )
        .route(
            "/admin/appointments/:id",
            axum::routing::delete(admin::delete_appointment),
        )
        .route(
            "/admin/appointments/:id/reschedule",
            put(admin::reschedule_appointment),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::middleware::require_local_bookings,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::middleware::require_admin,
        ));

    let mut api_routes = Router::new()
        .merge(public_routes)
        .merge(staff_routes)
        .merge(admin_routes)
        .merge(admin_booking_routes);

    if config.sync.mode == SyncMode::Master {
        let sync_routes = Router::new()
            .route("/sync/services", get(handlers::sync::services))
            .route("/sync/available-times", get(handlers::sync::available_times))
            .route("/sync/available-days", get(handlers::sync::available_days))
            .route("/sync/available-months", get(handlers::sync::available_months))
            .route("/sync/book", post(handlers::sync::book))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                handlers::middleware::require_sync_key,
            ));
        api_routes = api_routes.merge(sync_routes);
        tracing::info!("Serving sync endpoints for child sites");
    }

    // Build main router
    let app = Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::middleware::security_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state);

    // Start server
    let addr = config.server_addr();
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
