use axum::extract::State;
use axum::http::{Method, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::form::FormData;
use crate::handler::Outcome;
use crate::session::Session;
use crate::state::AppState;

pub const INDEX_PATH: &str = "/download";
pub const FILES_PATH: &str = "/files";

/// # Routes
///
/// - `GET /` - redirect to the download form
/// - `GET /download` - show the form
/// - `POST /download` - submit the form
/// - `GET /files/*` - completed downloads
pub fn create_router(state: AppState) -> Router {
    let files = ServeDir::new(&state.config.download_dir);

    Router::new()
        .route("/", get(|| async { Redirect::to(INDEX_PATH) }))
        .route(INDEX_PATH, get(show_form).post(submit_form))
        .nest_service(FILES_PATH, files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn show_form(
    State(state): State<AppState>,
    session: Session,
    method: Method,
    uri: Uri,
) -> Result<Response> {
    let outcome = state.handler.handle(&method, None, session.id()).await?;
    respond(&state, &session, &uri, outcome)
}

/// A body that does not decode as a form is treated like a failed load.
async fn submit_form(
    State(state): State<AppState>,
    session: Session,
    method: Method,
    uri: Uri,
    body: Option<Form<Vec<(String, String)>>>,
) -> Result<Response> {
    let data = body.map(|Form(pairs)| FormData::new(pairs));
    let outcome = state
        .handler
        .handle(&method, data.as_ref(), session.id())
        .await?;
    respond(&state, &session, &uri, outcome)
}

fn respond(state: &AppState, session: &Session, uri: &Uri, outcome: Outcome) -> Result<Response> {
    let mut response = match outcome {
        Outcome::Refresh => {
            let location = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or(INDEX_PATH);
            Redirect::to(location).into_response()
        }
        Outcome::Render { view, context } => {
            Html(state.views.render(view, &context)?).into_response()
        }
    };
    session.attach(&state.config.session_cookie, &mut response);
    Ok(response)
}
