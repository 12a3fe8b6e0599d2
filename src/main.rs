use std::sync::Arc;
use std::time::Duration;

use axum::{Router, Server};
use tracing::info;
use trading_dashboard::{api::http::rest, core::Core, oanda, pocketbase};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let pb_url = getenv_or("POCKETBASE_URL", "http://127.0.0.1:8090");
    let pb_identity = getenv_or("PB_ADMIN_EMAIL", "admin@trading.local");
    let pb_password = getenv_or("PB_ADMIN_PASSWORD", "Admin12345678");
    let pb_token_ttl_minutes: u64 = getenv_or("PB_TOKEN_TTL_MINUTES", "50")
        .parse()
        .expect("PB_TOKEN_TTL_MINUTES must be a number of minutes");

    let oanda_api_key = getenv_or("OANDA_API_KEY", "");
    let oanda_account_id = getenv_or("OANDA_ACCOUNT_ID", "101-001-38200759-001");
    let oanda_base_url = getenv_or("OANDA_BASE_URL", "https://api-fxpractice.oanda.com");

    let pb_auth_provider = pocketbase::auth::password_credentials::PasswordCredentials {
        client: reqwest_client.clone(),
        base_url: pb_url.clone(),
        identity: pb_identity,
        password: pb_password,
        token_ttl: Duration::from_secs(pb_token_ttl_minutes * 60),
    };
    let pb_auth_provider = pocketbase::auth::token_manager::TokenManager::new(pb_auth_provider);

    let database = pocketbase::Client {
        client: reqwest_client.clone(),
        base_url: pb_url,
        auth_token_provider: pb_auth_provider,
    };

    let broker = oanda::Provider {
        client: reqwest_client,
        api_key: oanda_api_key,
        account_id: oanda_account_id,
        base_url: oanda_base_url,
    };

    let core = Arc::new(Core {
        database: Box::new(database),
        broker: Box::new(broker),
    });

    let app = rest::routes(Router::new(), core);

    let bind_addr = getenv_or("BIND_ADDR", "0.0.0.0:8000");
    info!(message = "Dashboard API listening", %bind_addr);

    Server::bind(&bind_addr.parse().unwrap())
        .serve(app.into_make_service())
        .await
        .unwrap();
}

fn getenv_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
