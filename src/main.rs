#[macro_use]
extern crate lazy_static;

use std::env;

use actix_files::{Files, NamedFile};
use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{
    http::{Method, StatusCode},
    middleware,
    web::{self, Data},
    App, Either, HttpResponse, HttpServer, Responder,
};
use log::info;
use sqlx::SqlitePool;
use tera::Tera;

mod auth;
mod config;
mod db;
mod errors;
mod import;
mod lifecycle;
mod models;
mod pricing;
mod response;
mod routes;

use config::AppConfig;
use errors::AppError;

#[derive(Debug, Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
}

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let glob = env::var("TEMPLATE_GLOB").unwrap_or_else(|_| "templates/**/*".to_string());
        let mut tera = match Tera::new(&glob) {
            Ok(t) => t,
            Err(e) => {
                log::error!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html"]);
        tera
    };
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| {
        log::error!("FATAL: {}", e);
        AppError::from(e)
    })?;

    let db_pool = db::connect(&config.database_url).await.map_err(|e| {
        log::error!("FATAL: cannot open database {}: {}", config.database_url, e);
        AppError::from(e)
    })?;

    let session_key = config.session_key();
    let cookie_secure = config.cookie_secure;
    let state = AppState { db_pool };

    info!(
        "Starting HTTP server on http://{}:{}/",
        config.host, config.port
    );

    HttpServer::new(move || {
        App::new()
            // enable automatic response compression - usually register this first
            .wrap(middleware::Compress::default())
            .wrap(IdentityMiddleware::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
                    .cookie_secure(cookie_secure)
                    .build(),
            )
            // enable logger - always register Actix Web Logger middleware last
            .wrap(middleware::Logger::default())
            .app_data(Data::new(state.clone()))
            .service(Files::new("/static", "static"))
            .configure(routes::configure)
            .default_service(web::to(default_handler))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}

async fn default_handler(req_method: Method) -> Result<impl Responder, std::io::Error> {
    match req_method {
        Method::GET => {
            let file = NamedFile::open("static/404.html")?
                .customize()
                .with_status(StatusCode::NOT_FOUND);
            Ok(Either::Left(file))
        }
        _ => Ok(Either::Right(HttpResponse::MethodNotAllowed().finish())),
    }
}
