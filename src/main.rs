use std::str::FromStr;
use std::sync::Arc;

use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use salonbook::{
    build_state,
    calendar::{GoogleCalendarClient, OAuthClient},
    config::Config,
    configure_app, db,
    identity::HttpIdentityProvider,
    reminders,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = Config::from_env();
    db::ensure_sqlite_dir(&config.database_url)?;

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    db::run_migrations(&pool).await?;
    db::seed_defaults(&pool, &config).await?;

    if config.google_client_id.is_empty() {
        log::warn!("GOOGLE_CLIENT_ID not set. Calendar tokens will not be refreshed.");
    }

    if !config.push.enabled() {
        log::warn!("VAPID keys not set. Push notifications are disabled.");
    }

    let state = build_state(
        pool,
        &config,
        Arc::new(HttpIdentityProvider::new(
            config.google_userinfo_url.clone(),
            config.facebook_graph_base.clone(),
        )),
        Arc::new(
            GoogleCalendarClient::new(config.google_api_base.clone()).with_oauth_client(OAuthClient {
                token_url: config.google_token_url.clone(),
                client_id: config.google_client_id.clone(),
                client_secret: config.google_client_secret.clone(),
            }),
        ),
    );

    reminders::spawn(state.clone(), config.reminder_hour);
    reminders::spawn_calendar_upkeep(state.clone());

    let address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting Salonbook on http://{address}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", "./static").prefer_utf8(true))
            .configure(configure_app)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
