use crate::bridge::BridgeState;
use crate::config::BridgeConfig;
use crate::io_struct::ChatRequest;
use actix_web::{HttpRequest, HttpResponse, HttpServer, get, post, web};
use std::io::Write;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[get("/health")]
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[post("/v1/chat/completions")]
pub async fn chat_completions(
    _req: HttpRequest,
    req: web::Json<ChatRequest>,
    app_state: web::Data<BridgeState>,
) -> Result<HttpResponse, actix_web::Error> {
    let resp = app_state
        .chat_completions(req.into_inner())
        .await
        .inspect_err(|e| log::warn!("Chat completion failed: {}", e))?;
    Ok(resp.into())
}

/// Registers the bridge routes on an actix `App`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(MAX_BODY_BYTES))
        .service(health)
        .service(chat_completions);
}

pub fn init_logging(level: log::LevelFilter) {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .init();
}

pub async fn startup(config: BridgeConfig, bridge_state: BridgeState) -> std::io::Result<()> {
    let app_state = web::Data::new(bridge_state);

    log::info!("Starting server at {}:{}", config.host, config.port);

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .configure(configure)
    })
    .bind((config.host, config.port))?
    .run()
    .await?;

    std::io::Result::Ok(())
}
