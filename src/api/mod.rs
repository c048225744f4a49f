//!
//! JSON API used by the display surface and possibly third-party applications
//!

use actix_web::{
    get, post,
    web::{self, Data},
    App, HttpResponse, HttpServer, Responder,
};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::{
    config::Settings,
    subsystems::{ml::ClassificationResult, ReaderMode, ReaderStatus, SubsysManager},
};

#[derive(OpenApi)]
#[openapi(
    info(title = "SharedVision API"),
    paths(info, settings, configure, result, status, set_mode, capture, reload_model)
)]
struct ApiDoc;

/// Register every API route
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(info)
        .service(settings)
        .service(configure)
        .service(result)
        .service(status)
        .service(set_mode)
        .service(capture)
        .service(reload_model)
        .service(openapi_json);
}

pub async fn run_api(manager: SubsysManager, bind_address: String, port: u16) -> std::io::Result<()> {
    info!("API listening on {bind_address}:{port}");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(manager.clone()))
            .configure(routes)
    })
    .bind((bind_address.as_str(), port))?
    .run();
    server.await
}

#[derive(Serialize, ToSchema)]
pub struct Info {
    pub version: &'static str,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ModeRequest {
    pub mode: ReaderMode,
}

/// SharedVision version and info
#[utoipa::path(
    responses(
        (status = 200, body = Info),
    ),
)]
#[get("/api/info")]
pub(super) async fn info() -> impl Responder {
    web::Json(Info {
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current user settings
#[utoipa::path(
    responses(
        (status = 200, body = Settings),
    ),
)]
#[get("/api/settings")]
pub(super) async fn settings(manager: Data<SubsysManager>) -> impl Responder {
    web::Json(manager.settings().settings().await)
}

/// Replace the user settings
#[utoipa::path(
    request_body = Settings,
    responses(
        (status = 200, body = Settings),
        (status = 500, description = "Settings couldn't be saved"),
    ),
)]
#[post("/api/settings")]
pub(super) async fn configure(
    manager: Data<SubsysManager>,
    web::Json(new_settings): web::Json<Settings>,
) -> HttpResponse {
    match manager.settings().set_settings(new_settings).await {
        Ok(saved) => HttpResponse::Ok().json(saved),
        Err(err) => {
            error!("failed to save settings: {err}");
            HttpResponse::InternalServerError().body(err.to_string())
        }
    }
}

/// Latest classification result
#[utoipa::path(
    responses(
        (status = 200, body = ClassificationResult),
        (status = 204, description = "Nothing classified yet"),
    ),
)]
#[get("/api/result")]
pub(super) async fn result(manager: Data<SubsysManager>) -> HttpResponse {
    match manager.latest_result() {
        Some(result) => HttpResponse::Ok().json(result),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Reader and model state
#[utoipa::path(
    responses(
        (status = 200, body = ReaderStatus),
    ),
)]
#[get("/api/status")]
pub(super) async fn status(manager: Data<SubsysManager>) -> impl Responder {
    web::Json(manager.status())
}

/// Switch between automatic and manual reading
#[utoipa::path(
    request_body = ModeRequest,
    responses(
        (status = 200, body = ReaderStatus),
    ),
)]
#[post("/api/mode")]
pub(super) async fn set_mode(
    manager: Data<SubsysManager>,
    web::Json(req): web::Json<ModeRequest>,
) -> impl Responder {
    manager.set_mode(req.mode);
    web::Json(manager.status())
}

/// Classify the next frame (manual mode)
#[utoipa::path(
    responses(
        (status = 202, description = "Capture requested"),
        (status = 409, description = "Not in manual mode"),
    ),
)]
#[post("/api/capture")]
pub(super) async fn capture(manager: Data<SubsysManager>) -> HttpResponse {
    if manager.mode() != ReaderMode::Manual {
        return HttpResponse::Conflict().body("not in manual mode");
    }

    manager.request_capture();
    HttpResponse::Accepted().finish()
}

/// Reload the current model
#[utoipa::path(
    responses(
        (status = 200, body = ReaderStatus),
        (status = 500, description = "Model failed to load"),
    ),
)]
#[post("/api/model/reload")]
pub(super) async fn reload_model(manager: Data<SubsysManager>) -> HttpResponse {
    match manager.reload_model().await {
        Ok(()) => HttpResponse::Ok().json(manager.status()),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

#[get("/api/openapi.json")]
pub(super) async fn openapi_json() -> impl Responder {
    web::Json(ApiDoc::openapi())
}
