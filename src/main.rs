mod api;
mod auth;
mod persist;
mod settings;
mod sweeper;
mod world;

use auth::{AppState, SharedState};
use axum::{
    routing::{get, patch, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};

#[tokio::main]
async fn main() {
    #[cfg(all(feature = "profile", not(feature = "profile-console")))]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    #[cfg(feature = "profile-console")]
    console_subscriber::init();

    // ── Boot the World ─────────────────────────────────────────
    let settings = settings::Settings::load()
        .expect("Failed to load settings.json");

    let save_file = persist::SaveFile::open(&settings.save_file)
        .expect("Failed to open save file");

    let world = save_file.load_world()
        .expect("Failed to load world from save file");

    println!(
        "World loaded: {} users, {} tasks, {} tomatoes, {} punishments, revision {}",
        world.users.len(),
        world.tasks.len(),
        world.tomatoes.len(),
        world.punishments.len(),
        world.revision,
    );

    // ── Shared state ───────────────────────────────────────────
    let state: SharedState = Arc::new(AppState {
        world: std::sync::RwLock::new(world),
        save_file,
    });

    // ── Expiry sweep ───────────────────────────────────────────
    sweeper::spawn(state.clone(), settings.sweep_interval_secs);
    println!("Expiry sweep running every {}s", settings.sweep_interval_secs);

    // ── Router ─────────────────────────────────────────────────
    let app = Router::new()
        // Auth (called once per session)
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/users/me/username", patch(auth::update_username))
        // Tasks
        .route("/api/tasks", get(api::list_tasks).post(api::create_task))
        .route("/api/tasks/:id", put(api::update_task).delete(api::delete_task))
        .route("/api/tasks/:id/complete", put(api::complete_task))
        // Ledgers
        .route("/api/tomatoes/count", get(api::tomato_count))
        .route("/api/tomatoes/history", get(api::tomato_history))
        .route("/api/punishments", get(api::list_punishments))
        .route("/api/punishments/active", get(api::active_punishments))
        // Static files
        .fallback_service(ServeDir::new("frontend/dist").append_index_html_on_directories(true))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // ── Start ──────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", settings.bind_address, settings.port)
        .parse()
        .expect("Invalid bind address in settings.json");
    println!("Server running on http://localhost:{}", settings.port);
    println!("  Register: POST http://localhost:{}/api/auth/register", settings.port);
    println!("  Login:    POST http://localhost:{}/api/auth/login", settings.port);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
