/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use pos_server::{routes, ServerDb};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();

    let bind = std::env::var("POS_SERVER_BIND").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let db_path =
        std::env::var("POS_SERVER_DB").unwrap_or_else(|_| "pos-server.db".to_string());

    let db = match ServerDb::new(&db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("failed to open server store {}: {}", db_path, e);
            std::process::exit(1);
        }
    };
    let app = routes::router(db);

    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}: {}", bind, e);
            std::process::exit(1);
        }
    };
    log::info!("pos-server listening on {} (store: {})", bind, db_path);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down");
        })
        .await
    {
        log::error!("server exited with error: {}", e);
        std::process::exit(1);
    }
}
