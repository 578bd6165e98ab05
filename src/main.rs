mod audio;
mod config;
mod error;
mod features;
mod handlers;
mod inference;
mod models;

use std::io;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};

use crate::audio::FfmpegDecoder;
use crate::config::Config;
use crate::error::AppError;
use crate::handlers::AppState;
use crate::inference::InferenceEngine;

/// Reads config and loads the model. Any error here keeps the server from starting.
fn bootstrap() -> Result<(Config, AppState), AppError> {
    let config = Config::from_env()?;
    log::info!(
        "Loading model {} from {}",
        config.model_name,
        config.model_dir().display()
    );

    let engine = InferenceEngine::load(&config.model_dir())?;
    log::info!("Model ready with labels {:?}", engine.labels());

    let decoder = FfmpegDecoder::new(config.ffmpeg.clone());
    if !decoder.is_available() {
        log::warn!(
            "{} is not runnable; /predict will fail until it is installed",
            decoder.program().display()
        );
    }

    let state = AppState::new(config.model_name.clone(), decoder, engine);
    Ok((config, state))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config, state) = bootstrap().map_err(|e| {
        log::error!("startup failed ({}): {}", e.kind(), e);
        io::Error::other(e.to_string())
    })?;
    let state = web::Data::new(state);

    let (host, port) = config.bind_addr();
    log::info!("Server running at http://{}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind((host, port))?
    .run()
    .await
}
