mod bus;
mod catalog;
mod config;
mod mirror;
mod model;
mod pages;
mod remote;

use actix_web::{middleware::Logger, web, App, HttpServer};

use bus::Bus;
use config::Config;
use mirror::Mirror;
use remote::Remote;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "movievilla=debug,actix_web=info");
    }
    env_logger::init();

    let config = Config::from_env();
    let db = sled::open(&config.data_path)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    let bus = Bus::new();
    let mirror = Mirror::new(db.clone(), bus.clone());
    let remote = Remote::new(&config.api_url, mirror.clone())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

    // one watcher per process; sibling surfaces learn about writes through it
    actix_web::rt::spawn(bus::forward_storage_events(&db, bus.clone()));

    log::info!("movievilla listening on http://{}", config.addr);
    log::info!("backend: {}", config.api_url);

    let addr = config.addr.clone();
    let fetch_limit = config.fetch_limit;
    HttpServer::new(move || {
        let tera = tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*")).unwrap();
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(tera))
            .app_data(web::Data::new(mirror.clone()))
            .app_data(web::Data::new(remote.clone()))
            .app_data(web::Data::new(bus.clone()))
            .app_data(web::Data::new(pages::Settings { fetch_limit }))
            .route("/", web::get().to(pages::login_page))
            .route("/login", web::post().to(pages::login_post))
            .route("/register", web::get().to(pages::register_page))
            .route("/register", web::post().to(pages::register_post))
            .route("/dashboard", web::get().to(pages::dashboard))
            .route("/dashboard/add", web::get().to(pages::add_page))
            .route("/dashboard/add", web::post().to(pages::add_post))
            .route("/edit/{id}", web::get().to(pages::edit_page))
            .route("/edit/{id}", web::post().to(pages::edit_post))
            .route("/movies/{id}", web::get().to(pages::detail))
            .route("/movies/{id}/delete", web::post().to(pages::delete_post))
            .route("/dashboard/update", web::get().to(pages::update_page))
            .route("/dashboard/update", web::post().to(pages::update_post))
            .route(
                "/dashboard/changepassword",
                web::get().to(pages::password_page),
            )
            .route(
                "/dashboard/changepassword",
                web::post().to(pages::password_post),
            )
            .route("/logout", web::post().to(pages::logout_post))
            .route("/events", web::get().to(pages::events))
    })
    .bind(&addr)?
    .run()
    .await
}
