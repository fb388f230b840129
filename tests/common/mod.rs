#![allow(dead_code)]

pub mod scenarios;

use tonga::{SchemaInstaller, TongaClient};
use uuid::Uuid;

/// Name unique to this test run, safe as a channel name
pub fn unique(base: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", base, &suffix[..8])
}

/// Connect to the test database and install the engine schema
///
/// Returns `None` (and the caller skips) when no database is configured.
pub async fn postgres_client() -> Option<TongaClient> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("TONGA_TEST_DATABASE_URL")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("DATABASE_URL").ok())?;

    let client = TongaClient::new(&database_url)
        .await
        .expect("Failed to connect to test database");
    SchemaInstaller::install(client.pool())
        .await
        .expect("Failed to install tonga schema");

    Some(client)
}

/// Skip the current test when no database is configured
#[macro_export]
macro_rules! require_postgres {
    () => {
        match common::postgres_client().await {
            Some(client) => client,
            None => {
                println!("Skipping postgres test - no DATABASE_URL provided");
                return;
            }
        }
    };
}
