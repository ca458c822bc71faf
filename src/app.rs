use axum::extract::FromRef;

use crate::{
    api::{
        auth::{RoleSecrets, UserCollection},
        order::OrderCollection,
        rider::RiderCollection,
        token::JwtState,
    },
    geo::GeoLocator,
    migrate::MigrationCollection,
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub argon: argon2::Argon2<'static>,
    pub jwt_state: JwtState,
    pub secrets: RoleSecrets,
    pub geo_locator: GeoLocator,

    pub mongo_client: mongodb::Client,
    pub user_collection: UserCollection,
    pub rider_collection: RiderCollection,
    pub order_collection: OrderCollection,
    pub migrate_collection: MigrationCollection,
}

pub struct AppConfig {
    pub jwt_secret: String,
    pub admin_secret: String,
    pub rider_secret: String,
    pub geoip_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            jwt_secret: require_env("JWT_SECRET"),
            admin_secret: require_env("ADMIN_SECRET"),
            rider_secret: require_env("RIDER_SECRET"),
            geoip_url: std::env::var("GEOIP_API_URL")
                .unwrap_or_else(|_| "http://ip-api.com/json".to_string()),
        }
    }
}

fn require_env(key: &str) -> String {
    std::env::var(key)
        .unwrap_or_else(|_| panic!("Cannot retreive {} from environment variable.", key))
}

impl AppState {
    pub async fn new(
        mongo_url: &str,
        database_name: &str,
        config: AppConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let argon = argon2::Argon2::default();
        let jwt_state = JwtState::new(config.jwt_secret.as_bytes());
        let secrets = RoleSecrets {
            admin_secret: config.admin_secret,
            rider_secret: config.rider_secret,
        };
        let geo_locator = GeoLocator::new(config.geoip_url)?;

        let mongo_client_opt = mongodb::options::ClientOptions::parse(mongo_url).await?;
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;

        let db = mongo_client.database(database_name);
        Ok(Self {
            argon,
            jwt_state,
            secrets,
            geo_locator,

            mongo_client,
            user_collection: UserCollection(db.collection("users").into()),
            rider_collection: RiderCollection(db.collection("riders").into()),
            order_collection: OrderCollection(db.collection("orders").into()),
            migrate_collection: MigrationCollection(db.collection("migrations").into()),
        })
    }

    pub async fn new_from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mongodb_url = require_env("MONGODB_URI");

        Self::new(&mongodb_url, "dlvr", AppConfig::from_env()).await
    }
}
