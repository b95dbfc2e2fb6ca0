use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;

use log::debug;
use serde_json::Value;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::handlers::{self, AppState};
use super::types::{ApiError, ApiReply};

const MAX_BODY_BYTES: u64 = 2 * 1024 * 1024;

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body() -> impl Filter<Extract = (Value,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// A JSON body, or `null` when the request has none.
fn optional_json_body() -> impl Filter<Extract = (Value,), Error = Infallible> + Clone {
    json_body()
        .or(warp::any().map(|| Value::Null))
        .unify()
}

fn query_map() -> impl Filter<Extract = (HashMap<String, String>,), Error = Rejection> + Clone {
    warp::query::<HashMap<String, String>>()
}

async fn respond<F>(fut: F) -> Result<reply::WithStatus<reply::Json>, Rejection>
where
    F: Future<Output = ApiReply>,
{
    let (status, body) = fut.await;
    Ok(reply::with_status(reply::json(&body), status))
}

/// GET /scenarios
pub fn scenarios_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("scenarios")
        .and(warp::get())
        .and(with_state(state))
        .and_then(|state: AppState| respond(handlers::list_scenarios(state)))
}

/// POST /sessions/start?n=
pub fn start_session_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("sessions" / "start")
        .and(warp::post())
        .and(with_state(state))
        .and(query_map())
        .and(warp::header::optional::<String>("x-session-id"))
        .and(optional_json_body())
        .and_then(
            |state: AppState, query: HashMap<String, String>, resume: Option<String>, body: Value| {
                respond(handlers::start_session(state, query, resume, body))
            },
        )
}

/// GET /sessions/:id?includeDraft=1
pub fn get_session_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("sessions" / String)
        .and(warp::get())
        .and(with_state(state))
        .and(query_map())
        .and_then(|id: String, state: AppState, query: HashMap<String, String>| {
            respond(handlers::get_session(state, id, query))
        })
}

/// PUT /sessions/:id/progress
pub fn progress_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("sessions" / String / "progress")
        .and(warp::put())
        .and(with_state(state))
        .and(json_body())
        .and_then(|id: String, state: AppState, body: Value| {
            respond(handlers::put_progress(state, id, body))
        })
}

/// POST /sessions/:id/complete
pub fn complete_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("sessions" / String / "complete")
        .and(warp::post())
        .and(with_state(state))
        .and(json_body())
        .and_then(|id: String, state: AppState, body: Value| {
            respond(handlers::complete_session(state, id, body))
        })
}

/// Passes the state on only when the admin token checks out.
fn admin_guard(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = Rejection> + Clone {
    with_state(state)
        .and(warp::header::optional::<String>("x-admin-token"))
        .and_then(|state: AppState, token: Option<String>| async move {
            match handlers::check_admin(&state, token.as_deref()) {
                Ok(()) => Ok(state),
                Err(_) => Err(warp::reject::custom(Unauthorized)),
            }
        })
}

#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Every `/admin/...` route behind the token guard.
pub fn admin_routes(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let overview = warp::path!("admin" / "overview")
        .and(warp::get())
        .and(admin_guard(state.clone()))
        .and_then(|state: AppState| respond(handlers::admin_overview(state)));

    let sessions = warp::path!("admin" / "sessions")
        .and(warp::get())
        .and(admin_guard(state.clone()))
        .and(query_map())
        .and_then(|state: AppState, query: HashMap<String, String>| {
            respond(handlers::admin_sessions(state, query))
        });

    let session = warp::path!("admin" / "sessions" / String)
        .and(warp::get())
        .and(admin_guard(state.clone()))
        .and_then(|id: String, state: AppState| respond(handlers::admin_session(state, id)));

    let context_enabled = warp::path!("admin" / "contexts" / String / "enabled")
        .and(warp::post())
        .and(admin_guard(state.clone()))
        .and(json_body())
        .and_then(|id: String, state: AppState, body: Value| {
            respond(handlers::admin_set_context_enabled(state, id, body))
        });

    let images = warp::path!("admin" / "images" / "summary")
        .and(warp::get())
        .and(admin_guard(state.clone()))
        .and_then(|state: AppState| respond(handlers::admin_images_summary(state)));

    let metrics = warp::path!("admin" / "metrics")
        .and(warp::get())
        .and(admin_guard(state))
        .and_then(|state: AppState| respond(handlers::admin_metrics(state)));

    overview
        .or(sessions)
        .or(session)
        .or(context_enabled)
        .or(images)
        .or(metrics)
}

/// Turns warp rejections into the same JSON error shape the handlers use.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, error, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "Not found".to_string())
    } else if err.find::<Unauthorized>().is_some() {
        (StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "invalid_payload", e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", "Payload too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Method not allowed".to_string())
    } else {
        debug!("Unhandled rejection: {:?}", err);
        (StatusCode::BAD_REQUEST, "bad_request", format!("{:?}", err))
    };
    Ok(reply::with_status(
        reply::json(&ApiError::new(error, message)),
        status,
    ))
}
