//! `/ws/ticker` boundary (§6): pushes confirmed and in-progress bars from
//! the stream collector out to browser clients.
//!
//! Grounded on the teacher's `WsSession`/`BroadcastUpdate` actor pair in
//! `web_server.rs`: a heartbeat timer, a background task forwarding the
//! collector's broadcast channel into the actor mailbox, and a text-framed
//! JSON protocol.

use crate::context::AppContext;
use crate::exchange::stream::TickerUpdate;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{HttpRequest, HttpResponse, web};
use actix_web_actors::ws;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Message, Clone)]
#[rtype(result = "()")]
struct Forward(TickerUpdate);

#[derive(Serialize)]
#[serde(tag = "event")]
enum ServerEvent<'a> {
    #[serde(rename = "connected")]
    Connected { message: &'a str },
    #[serde(rename = "data")]
    Data {
        pair: String,
        timestamp: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        confirm: bool,
    },
}

struct TickerSession {
    hb: Instant,
    ctx: Arc<AppContext>,
}

impl TickerSession {
    fn new(ctx: Arc<AppContext>) -> Self {
        TickerSession {
            hb: Instant::now(),
            ctx,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |session, ctx| {
            if Instant::now().duration_since(session.hb) > CLIENT_TIMEOUT {
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn start_forwarder(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let mut rx = self.ctx.stream.ticker_updates();
        let addr = ctx.address();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => addr.do_send(Forward(update)),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl Actor for TickerSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.start_heartbeat(ctx);
        self.start_forwarder(ctx);
        if let Ok(json) = serde_json::to_string(&ServerEvent::Connected {
            message: "subscribed to live ticker",
        }) {
            ctx.text(json);
        }
    }
}

impl Handler<Forward> for TickerSession {
    type Result = ();

    fn handle(&mut self, msg: Forward, ctx: &mut Self::Context) {
        let update = msg.0;
        let event = ServerEvent::Data {
            pair: update.pair.canonical(),
            timestamp: update.bar.timestamp_ms,
            open: update.bar.open,
            high: update.bar.high,
            low: update.bar.low,
            close: update.bar.close,
            volume: update.bar.volume,
            confirm: update.bar.confirm,
        };
        if let Ok(json) = serde_json::to_string(&event) {
            ctx.text(json);
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TickerSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => self.hb = Instant::now(),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}

pub async fn ticker(
    req: HttpRequest,
    stream: web::Payload,
    ctx: web::Data<Arc<AppContext>>,
) -> Result<HttpResponse, actix_web::Error> {
    let session = TickerSession::new(Arc::clone(ctx.get_ref()));
    ws::start(session, &req, stream)
}
