//! Route handlers (C7, §6). Each handler parses its query/body into typed
//! core arguments, calls into C5/C4/C1 through the shared [`AppContext`],
//! and maps the result (or a [`CoreError`]) onto the exact response shape
//! named for that route.

use crate::context::AppContext;
use crate::error::CoreError;
use crate::interval::Interval;
use crate::model::Bar;
use crate::pair::PairId;
use actix_web::{HttpResponse, Responder, delete, get, post, put, web};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

fn error_response(err: &CoreError) -> HttpResponse {
    let body = serde_json::json!({ "success": false, "error": err.to_string() });
    match err.status_class() {
        400 => HttpResponse::BadRequest().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

fn validation(message: impl Into<String>) -> HttpResponse {
    error_response(&CoreError::Validation(message.into()))
}

#[derive(Debug, Serialize)]
struct ApiBar {
    timestamp: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    volume_quote: f64,
}

impl From<&Bar> for ApiBar {
    fn from(bar: &Bar) -> Self {
        ApiBar {
            timestamp: bar.timestamp_ms,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            volume_quote: bar.volume_quote,
        }
    }
}

fn validate_limit(limit: Option<usize>) -> Result<Option<usize>, HttpResponse> {
    match limit {
        Some(l) if !(1..=1000).contains(&l) => Err(validation("limit must be in [1, 1000]")),
        other => Ok(other),
    }
}

// -- GET /candlestick/historical ---------------------------------------

#[derive(Debug, Deserialize)]
pub struct HistoricalQuery {
    interval: String,
    coinpair: String,
    limit: Option<usize>,
    since: Option<i64>,
}

#[get("/candlestick/historical")]
pub async fn historical_candles(
    ctx: web::Data<Arc<AppContext>>,
    query: web::Query<HistoricalQuery>,
) -> impl Responder {
    let interval = match Interval::from_str(&query.interval) {
        Ok(i) => i,
        Err(e) => return error_response(&e),
    };
    let pair = match PairId::from_api_form(&query.coinpair) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    let limit = match validate_limit(query.limit) {
        Ok(l) => l,
        Err(resp) => return resp,
    };
    if let Some(since) = query.since {
        if since < 0 {
            return validation("since must be non-negative");
        }
    }

    match ctx.historical.query(&pair, interval, limit, query.since, None).await {
        Ok(bars) => {
            let data: Vec<ApiBar> = bars.iter().map(ApiBar::from).collect();
            let count = data.len();
            HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "data": data,
                "count": count,
                "request": {
                    "interval": interval.canonical(),
                    "coinpair": pair.api_form(),
                    "limit": limit,
                    "since": query.since,
                },
                "source": "database",
            }))
        }
        Err(e) => error_response(&e),
    }
}

// -- GET /data/candles ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    coin_pair: String,
    interval: String,
    limit: Option<usize>,
    start_time: Option<i64>,
    end_time: Option<i64>,
}

#[get("/data/candles")]
pub async fn candles(ctx: web::Data<Arc<AppContext>>, query: web::Query<CandlesQuery>) -> impl Responder {
    let interval = match Interval::from_str(&query.interval) {
        Ok(i) => i,
        Err(e) => return error_response(&e),
    };
    let pair = match PairId::from_canonical(&query.coin_pair) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    let limit = match validate_limit(query.limit) {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    match ctx
        .historical
        .query(&pair, interval, limit, query.start_time, query.end_time)
        .await
    {
        Ok(bars) => {
            let data: Vec<ApiBar> = bars.iter().map(ApiBar::from).collect();
            HttpResponse::Ok().json(serde_json::json!({
                "code": 0,
                "message": "success",
                "data": {
                    "coin_pair": pair.canonical(),
                    "interval": interval.canonical(),
                    "count": data.len(),
                    "candles": data,
                },
            }))
        }
        Err(e) => error_response(&e),
    }
}

// -- GET /data/stats ------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    coin_pair: String,
}

#[get("/data/stats")]
pub async fn stats(ctx: web::Data<Arc<AppContext>>, query: web::Query<StatsQuery>) -> impl Responder {
    let pair = match PairId::from_canonical(&query.coin_pair) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    match ctx.store.stats(&pair) {
        Ok(stats) => HttpResponse::Ok().json(serde_json::json!({
            "code": 0,
            "data": {
                "coin_pair": pair.canonical(),
                "total_count": stats.count,
                "min_timestamp": stats.min_ts,
                "max_timestamp": stats.max_ts,
            },
        })),
        Err(e) => error_response(&e),
    }
}

// -- Watch list -----------------------------------------------------------

#[derive(Debug, Serialize)]
struct WatchedPairView {
    coin_pair: String,
    enabled: bool,
    data_count: i64,
    first_data: Option<i64>,
    last_data: Option<i64>,
}

#[get("/data/watch-pairs")]
pub async fn list_watch_pairs(ctx: web::Data<Arc<AppContext>>) -> impl Responder {
    let pairs = match ctx.store.list(false) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    let mut views = Vec::with_capacity(pairs.len());
    for watched in pairs {
        let pair = match PairId::from_canonical(&watched.pair) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let stats = ctx.store.stats(&pair).unwrap_or(crate::model::Stats {
            count: 0,
            min_ts: None,
            max_ts: None,
        });
        views.push(WatchedPairView {
            coin_pair: watched.pair,
            enabled: watched.enabled,
            data_count: stats.count,
            first_data: stats.min_ts,
            last_data: stats.max_ts,
        });
    }

    HttpResponse::Ok().json(serde_json::json!({ "code": 0, "pairs": views }))
}

#[derive(Debug, Deserialize)]
pub struct AddWatchPairBody {
    coin_pair: String,
    enabled: Option<bool>,
}

#[post("/data/watch-pairs")]
pub async fn add_watch_pair(ctx: web::Data<Arc<AppContext>>, body: web::Json<AddWatchPairBody>) -> impl Responder {
    let pair = match PairId::from_canonical(&body.coin_pair) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    let enabled = body.enabled.unwrap_or(true);

    match ctx.collector.add(pair.clone()) {
        Ok(()) if enabled => HttpResponse::Ok().json(serde_json::json!({
            "code": 0,
            "data": { "coin_pair": pair.canonical(), "enabled": true },
        })),
        Ok(()) => match ctx.collector.set_enabled(pair.clone(), false) {
            Ok(()) => HttpResponse::Ok().json(serde_json::json!({
                "code": 0,
                "data": { "coin_pair": pair.canonical(), "enabled": false },
            })),
            Err(e) => error_response(&e),
        },
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoveWatchPairBody {
    coin_pair: String,
}

#[delete("/data/watch-pairs")]
pub async fn remove_watch_pair(
    ctx: web::Data<Arc<AppContext>>,
    body: web::Json<RemoveWatchPairBody>,
) -> impl Responder {
    let pair = match PairId::from_canonical(&body.coin_pair) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    match ctx.collector.remove(pair.clone()) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "code": 0,
            "data": { "coin_pair": pair.canonical() },
        })),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ToggleWatchPairBody {
    coin_pair: String,
    enabled: bool,
}

#[put("/data/watch-pairs/toggle")]
pub async fn toggle_watch_pair(
    ctx: web::Data<Arc<AppContext>>,
    body: web::Json<ToggleWatchPairBody>,
) -> impl Responder {
    let pair = match PairId::from_canonical(&body.coin_pair) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    match ctx.collector.set_enabled(pair.clone(), body.enabled) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "code": 0,
            "data": { "coin_pair": pair.canonical(), "enabled": body.enabled },
        })),
        Err(e) => error_response(&e),
    }
}

// -- GET /health ----------------------------------------------------------

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
