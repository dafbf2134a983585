use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use rusty_gate::auth::permission::Action;
use rusty_gate::auth::{AuthService, LogNotifier};
use rusty_gate::config::ServerConfig;
use rusty_gate::handlers;
use rusty_gate::security_logger::SecurityLogger;
use rusty_gate::storage::traits::{PermissionRecord, RecordStore, Role, RolePermissionGrant};
use rusty_gate::storage::{MemoryCache, MemoryRecordStore};

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    }

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, namespace={}, tls={}",
        config.host, config.port, config.cache_namespace, config.enable_tls
    );

    let cache = Arc::new(MemoryCache::new());
    cache.clone().start_cleanup_task();

    let records = Arc::new(MemoryRecordStore::new());
    if config.development_mode {
        if let Err(e) = seed_roles(records.as_ref()).await {
            error!("Failed to seed development roles: {}", e);
            std::process::exit(1);
        }
        warn!("Development mode: one-time codes are written to the log");
    }

    let security = Arc::new(SecurityLogger::new());
    security.clone().start_cleanup_task();

    let service = Arc::new(AuthService::from_config(
        &config,
        records,
        cache,
        Arc::new(LogNotifier),
        security,
    ));

    let routes = handlers::api(service);

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    match (config.enable_tls, &config.tls_cert_path, &config.tls_key_path) {
        (true, Some(cert), Some(key)) => {
            info!("Starting Rusty Gate server on https://{}", addr);
            warp::serve(routes).tls().cert_path(cert).key_path(key).run(addr).await;
        }
        _ => {
            info!("Starting Rusty Gate server on http://{}", addr);
            warp::serve(routes).run(addr).await;
        }
    }
}

/// Baseline roles for local development: `customer` reads orders and
/// `admin` may manage credentials.
async fn seed_roles(records: &MemoryRecordStore) -> rusty_gate::Result<()> {
    let seeds = [
        ("r-customer", "customer", "p-order-read", "order", Action::Read),
        ("r-admin", "admin", "p-token-manage", "token", Action::Manage),
    ];

    for (role_id, role_name, permission_id, resource, action) in seeds {
        records
            .upsert_permission(PermissionRecord {
                id: permission_id.to_string(),
                resource: resource.to_string(),
                action,
                description: None,
                is_active: true,
            })
            .await?;
        records
            .upsert_role(Role {
                id: role_id.to_string(),
                name: role_name.to_string(),
                description: None,
                is_active: true,
            })
            .await?;
        records
            .upsert_role_permission(RolePermissionGrant {
                role_id: role_id.to_string(),
                permission_id: permission_id.to_string(),
                is_active: true,
            })
            .await?;
    }

    info!("Seeded development roles: customer, admin");
    Ok(())
}
