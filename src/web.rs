use actix_web::{
    delete, get, http::StatusCode, post, web, App, HttpResponse, HttpServer, Responder, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::context::{lock, Context};
use crate::error::SubmitError;
use crate::models::UserId;
use crate::progress::JobStatus;
use crate::submit::{submit, SubmitOutcome, SubmitRequest};

struct AppState {
    ctx: Arc<Context>,
}

#[derive(Serialize)]
struct StatusResponse {
    jobs: Vec<JobStatus>,
    queued: usize,
    running: usize,
}

#[derive(Serialize)]
struct SubmitResponse {
    id: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<usize>,
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Deserialize)]
struct OwnerParams {
    submitter_id: UserId,
    password: String,
}

#[derive(Serialize)]
struct OwnerResponse {
    elevated: bool,
}

#[derive(Serialize)]
enum ErrorType {
    InvalidRequest,
    AdmissionDenied,
    Forbidden,
    UnknownJob,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorType,
    description: String,
}

fn build_error_response(status: StatusCode, error_type: ErrorType, description: &str) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error_type,
        description: description.to_owned(),
    })
}

#[get("/")]
async fn list_jobs(data: web::Data<AppState>) -> Result<impl Responder> {
    let ctx = &data.ctx;

    let response = StatusResponse {
        jobs: ctx.progress.snapshot(ctx.config.expire_finished_jobs_after),
        queued: ctx.queue.len(),
        running: ctx.running_count(),
    };

    Ok(web::Json(response))
}

#[get("/jobs/{id}")]
async fn job_status(data: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    match data.ctx.progress.get(path.into_inner()) {
        Some(status) => HttpResponse::build(StatusCode::OK).json(status),
        None => build_error_response(StatusCode::NOT_FOUND, ErrorType::UnknownJob, "No such job."),
    }
}

#[post("/jobs")]
async fn create_job(data: web::Data<AppState>, params: web::Json<SubmitRequest>) -> HttpResponse {
    let request = params.into_inner();
    let submitter = request.submitter_id;

    match submit(&data.ctx, request) {
        Ok(outcome) => {
            let (name, position) = match outcome {
                SubmitOutcome::QueuedElevated { .. } => ("queued_elevated", None),
                SubmitOutcome::Queued { position, .. } => ("queued", Some(position)),
            };
            HttpResponse::build(StatusCode::OK).json(SubmitResponse {
                id: outcome.id().to_string(),
                outcome: name,
                position,
            })
        }
        Err(SubmitError::Invalid(err)) => {
            tracing::info!(submitter, "rejected submission: {err}");
            build_error_response(StatusCode::BAD_REQUEST, ErrorType::InvalidRequest, &err.to_string())
        }
        Err(SubmitError::Denied(err)) => {
            tracing::info!(submitter, "admission denied: {err}");
            build_error_response(
                StatusCode::TOO_MANY_REQUESTS,
                ErrorType::AdmissionDenied,
                &err.to_string(),
            )
        }
    }
}

#[delete("/jobs/{submitter_id}")]
async fn cancel_job(data: web::Data<AppState>, path: web::Path<UserId>) -> impl Responder {
    web::Json(CancelResponse {
        cancelled: data.ctx.cancel(path.into_inner()),
    })
}

#[post("/owner")]
async fn owner(data: web::Data<AppState>, params: web::Json<OwnerParams>) -> HttpResponse {
    let granted = lock(&data.ctx.access).authorize(
        params.submitter_id,
        &params.password,
        data.ctx.config.owner_password.as_deref(),
    );

    if granted {
        HttpResponse::build(StatusCode::OK).json(OwnerResponse { elevated: true })
    } else {
        build_error_response(StatusCode::FORBIDDEN, ErrorType::Forbidden, "Incorrect password.")
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_jobs)
        .service(job_status)
        .service(create_job)
        .service(cancel_job)
        .service(owner);
}

pub async fn start_web_server(ctx: Arc<Context>) -> std::io::Result<()> {
    let port = ctx.config.port;
    let app_state = web::Data::new(AppState { ctx });

    tracing::info!("Starting web server at 0.0.0.0:{port}...");

    HttpServer::new(move || App::new().app_data(app_state.clone()).configure(routes))
        .bind(("0.0.0.0", port))?
        .run()
        .await
}
