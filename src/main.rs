mod auth;
mod config;
mod error;
mod gateways;
mod handlers;
mod models;
mod notifier;
mod sweep;
mod upload;

use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use config::{MongoConfig, Settings};
use error::ApiError;
use gateways::{Fcm, FirebaseAuth, ImageKit, Razorpay};
use notifier::Notifier;
use sweep::PaymentSweeper;
use tracing::{error, info, Level};
use tracing_subscriber::{self, EnvFilter};
use tracing_actix_web::TracingLogger;

fn startup_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    error!("{}: {}", context, e);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("actix_web=info".parse().expect("valid directive"))
                .add_directive("salon_booking_api=debug".parse().expect("valid directive"))
        )
        .init();

    info!("Starting salon booking API server");

    let settings = Settings::from_env().map_err(|e| startup_error("Invalid configuration", e))?;

    let mongo_config = MongoConfig::init(&settings)
        .await
        .map_err(|e| startup_error("Failed to initialize MongoDB", e))?;

    info!("MongoDB connection established");

    let notifier = Notifier::new(&mongo_config, Fcm::new(&settings));
    PaymentSweeper::new(&mongo_config, notifier.clone(), settings.payment_window_mins)
        .spawn(Duration::from_secs(settings.sweep_interval_secs));

    let bind_addr = settings.bind_addr.clone();
    let razorpay = web::Data::new(Razorpay::new(&settings));
    let images = web::Data::new(ImageKit::new(&settings));
    let firebase = web::Data::new(FirebaseAuth::new(&settings));
    let notifier = web::Data::new(notifier);
    let db_data = web::Data::new(mongo_config);
    let settings = web::Data::new(settings);

    info!("Listening on {}", bind_addr);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                ApiError::InvalidArgument(err.to_string()).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                ApiError::InvalidArgument(err.to_string()).into()
            }))
            .app_data(db_data.clone())
            .app_data(settings.clone())
            .app_data(razorpay.clone())
            .app_data(images.clone())
            .app_data(firebase.clone())
            .app_data(notifier.clone())
            .configure(handlers::routes)
    })
    .bind(bind_addr)?
    .run()
    .await
}
