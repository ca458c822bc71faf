use std::net::SocketAddr;

use axum::{routing, Router};
use dlvr::app::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "dlvr=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_state = AppState::new_from_env().await.unwrap();
    app_state.run_migration().await.unwrap();

    let api = Router::new()
        .nest(
            "/auth",
            Router::new()
                .route("/register", routing::post(dlvr::api::auth::register))
                .route("/login", routing::post(dlvr::api::auth::login))
                .route("/profile", routing::get(dlvr::api::user::profile)),
        )
        .nest(
            "/users",
            Router::new()
                .route("/", routing::get(dlvr::api::user::index))
                .route("/me", routing::get(dlvr::api::user::profile))
                .route("/me", routing::put(dlvr::api::user::update_me))
                .route("/me", routing::delete(dlvr::api::user::delete_me))
                .route("/:id", routing::get(dlvr::api::user::show))
                .route("/:id", routing::put(dlvr::api::user::update))
                .route("/:id", routing::delete(dlvr::api::user::delete)),
        )
        .nest(
            "/riders",
            Router::new()
                .route("/", routing::get(dlvr::api::rider::index))
                .route("/me", routing::get(dlvr::api::rider::me))
                .route("/me", routing::put(dlvr::api::rider::update_me))
                .route("/:id", routing::get(dlvr::api::rider::show))
                .route("/:id", routing::put(dlvr::api::rider::update))
                .route("/:id", routing::delete(dlvr::api::rider::delete)),
        )
        .nest(
            "/orders",
            Router::new()
                .route("/", routing::post(dlvr::api::order::create))
                .route("/", routing::get(dlvr::api::order::index))
                .route("/:id", routing::get(dlvr::api::order::show))
                .route("/:id", routing::put(dlvr::api::order::update))
                .route("/:id", routing::delete(dlvr::api::order::delete)),
        );

    let app = Router::new()
        .nest("/api", api)
        .with_state(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|it| it.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::debug!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .unwrap();
}
