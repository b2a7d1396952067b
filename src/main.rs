use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};
use cookbook_backend::{
    AppState,
    config::Config,
    middleware::{
        RateLimiter, auth_middleware, log_errors, optional_auth_middleware, rate_limit,
    },
    routes,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'cookbook_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 建表迁移
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // 媒体目录（头像与菜谱图片）
    tokio::fs::create_dir_all(&config.media_root)
        .await
        .expect("Failed to create media directory");

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client.clone());

    // 设置应用状态
    let state = AppState {
        pool,
        config: config.clone(),
        redis: redis_arc,
    };

    // 设置限流器
    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));

    // 公开路由：注册、登录与菜谱/食材的只读访问。
    // 只读路由也会尽量解析登录态，用于计算收藏、购物车、订阅标记
    let public_routes = Router::new()
        .route("/users", post(routes::user::register))
        .route("/auth/token/login", post(routes::user::login))
        .route("/ingredients", get(routes::ingredient::list_ingredients))
        .route(
            "/ingredients/{ingredient_id}",
            get(routes::ingredient::get_ingredient),
        )
        .route("/recipes", get(routes::recipe::list_recipes))
        .route("/recipes/{recipe_id}", get(routes::recipe::get_recipe))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            optional_auth_middleware,
        ));

    let protected_routes = Router::new()
        // 需要认证的用户路由
        .route("/users", get(routes::user::list_users))
        .route("/users/me", get(routes::user::me))
        .route("/users/set_password", post(routes::user::set_password))
        .route(
            "/users/me/avatar",
            get(routes::user::get_avatar)
                .put(routes::user::update_avatar)
                .delete(routes::user::delete_avatar),
        )
        .route("/users/subscriptions", get(routes::user::subscriptions))
        .route("/users/{user_id}", get(routes::user::get_user))
        .route(
            "/users/{user_id}/subscribe",
            post(routes::user::subscribe).delete(routes::user::unsubscribe),
        )
        // 菜谱写路由
        .route("/recipes", post(routes::recipe::create_recipe))
        .route(
            "/recipes/download_shopping_cart",
            get(routes::recipe::download_shopping_cart),
        )
        .route(
            "/recipes/{recipe_id}",
            patch(routes::recipe::update_recipe).delete(routes::recipe::delete_recipe),
        )
        .route(
            "/recipes/{recipe_id}/favorite",
            post(routes::recipe::favorite).delete(routes::recipe::unfavorite),
        )
        .route(
            "/recipes/{recipe_id}/shopping_cart",
            post(routes::recipe::add_to_shopping_cart)
                .delete(routes::recipe::remove_from_shopping_cart),
        )
        // 应用认证中间件
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // 创建基础路由
    let router = Router::new()
        .nest(
            &config.api_base_uri.clone(),
            Router::new().merge(public_routes).merge(protected_routes),
        )
        .nest_service("/media", ServeDir::new(&config.media_root));

    // 添加日志中间件和限流中间件
    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(rate_limiter, rate_limit),
    );

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        let cors = tower_http::cors::CorsLayer::permissive();
        router.layer(cors)
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
