//! HTTP/WebSocket boundary (C7, §6): the only layer allowed to see raw query
//! strings and JSON bodies. Validates input into typed core arguments before
//! calling C5/C4/C1, and maps `CoreError` to an HTTP status class.
//!
//! Grounded on the teacher's `web_server.rs`: one shared `web::Data`, one
//! `#[get]`/`#[post]` handler per route, `actix-cors` permissive CORS, and a
//! `ws::start`-backed ticker session replacing its `WsSession`.

pub mod handlers;
pub mod ws;

use crate::context::AppContext;
use actix_cors::Cors;
use actix_files::Files;
use actix_web::{App, HttpServer, web};
use std::sync::Arc;

pub async fn run(ctx: Arc<AppContext>, static_dir: &str) -> std::io::Result<()> {
    let host = ctx.config.server_host.clone();
    let port = ctx.config.server_port;
    let static_dir = static_dir.to_string();

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(Arc::clone(&ctx)))
            .service(handlers::historical_candles)
            .service(handlers::candles)
            .service(handlers::stats)
            .service(handlers::list_watch_pairs)
            .service(handlers::add_watch_pair)
            .service(handlers::remove_watch_pair)
            .service(handlers::toggle_watch_pair)
            .service(handlers::health)
            .route("/ws/ticker", web::get().to(ws::ticker))
            .service(Files::new("/", static_dir.clone()).index_file("index.html"))
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
