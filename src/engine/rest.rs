use crate::engine::rule::Rule;
use crate::engine::service::{PolicyService, ServiceErr};
use actix_web::middleware::Logger;
use actix_web::{error, http::StatusCode, web, App, HttpResponse, HttpServer};
use serde::Deserialize;
use serde_json::json;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::{io, time};

/// Parameters to be used when starting the REST policy server with
/// [start_rest_server].
#[derive(Clone)]
pub struct RestParams {
    pub address: String,
    pub port: u16,
}

/// Errors rendered to REST clients as `{error, status}` JSON bodies.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Internal(String),
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "{}", msg),
            ApiError::NotFound(msg) => write!(f, "{}", msg),
            ApiError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl error::ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}

impl From<ServiceErr> for ApiError {
    fn from(err: ServiceErr) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<error::BlockingError> for ApiError {
    fn from(err: error::BlockingError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct AddRuleBody {
    directive: String,
    domain: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RemoveRuleBody {
    domain: String,
    directive: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    rules: Vec<Rule>,
}

async fn get_rules(service: web::Data<PolicyService>) -> HttpResponse {
    HttpResponse::Ok().json(service.rules())
}

async fn get_rule(
    path: web::Path<String>,
    service: web::Data<PolicyService>,
) -> Result<HttpResponse, ApiError> {
    let domain = path.into_inner();
    match service.rule(&domain) {
        Some(rule) => Ok(HttpResponse::Ok().json(rule)),
        None => Err(ApiError::NotFound(format!("no rule for '{}'", domain))),
    }
}

// Rule mutations run on the blocking pool: a directive flip makes the
// trie call the controller synchronously before the root swap.
async fn add_rule(
    body: web::Json<AddRuleBody>,
    service: web::Data<PolicyService>,
) -> Result<HttpResponse, ApiError> {
    let started = time::Instant::now();
    let body = body.into_inner();
    log::debug!("Request to add rule: {:?}", body);

    let service = service.into_inner();
    web::block(move || service.add_rule(&body.directive, &body.domain, &body.value)).await??;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Rule added",
        "elapsed": elapsed_secs(started),
    })))
}

async fn remove_rule(
    body: web::Json<RemoveRuleBody>,
    service: web::Data<PolicyService>,
) -> Result<HttpResponse, ApiError> {
    let started = time::Instant::now();
    let body = body.into_inner();
    log::debug!("Request to remove rule: {:?}", body);

    let service = service.into_inner();
    let found =
        web::block(move || service.remove_rule(&body.domain, body.directive.as_deref())).await??;
    if !found {
        return Err(ApiError::NotFound("rule not found".to_string()));
    }

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Rule removed",
        "elapsed": elapsed_secs(started),
    })))
}

async fn batch_build(
    body: web::Json<BatchBody>,
    service: web::Data<PolicyService>,
) -> Result<HttpResponse, ApiError> {
    let rules = body.into_inner().rules;
    log::debug!("Received {} rules for batch building.", rules.len());

    let service = service.into_inner();
    web::block(move || service.batch_build(&rules)).await??;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Trie rebuilt",
    })))
}

async fn purge(service: web::Data<PolicyService>) -> Result<HttpResponse, ApiError> {
    let service = service.into_inner();
    web::block(move || service.purge()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Rules purged",
    })))
}

// The elapsed field is a contract with the measurement tooling, which
// parses it as seconds with four decimals.
fn elapsed_secs(started: time::Instant) -> String {
    format!("{:.4}", started.elapsed().as_secs_f64())
}

/// Mount every policy endpoint on the passed service config. Extracted
/// from [start_rest_server] so tests can build the same app in-process.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| ApiError::Validation(err.to_string()).into()),
    )
    .route("/api/rules", web::get().to(get_rules))
    .route("/api/rules", web::post().to(add_rule))
    .route("/api/rules", web::delete().to(remove_rule))
    .route("/api/rules/batch", web::post().to(batch_build))
    .route("/api/rules/purge", web::delete().to(purge))
    .route("/api/rules/{domain}", web::get().to(get_rule));
}

/// Start the REST policy server. The future resolves when the server
/// shuts down; the caller tears the rest of the engine down afterwards.
pub async fn start_rest_server(service: Arc<PolicyService>, params: RestParams) -> io::Result<()> {
    let data = web::Data::from(service);
    log::info!("Starting REST policy server, address: '{}:{}'.", &params.address, params.port);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(Logger::default().log_target("rest"))
            .configure(configure_routes)
    })
    .workers(1)
    .bind((params.address.as_str(), params.port))?
    .run()
    .await
}
