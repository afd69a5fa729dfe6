use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "assets"]
#[cfg_attr(not(feature = "dashboard"), exclude = "**/*")]
struct PanelAssets;

pub fn static_router() -> Router {
    Router::new().fallback(get(serve_static))
}

pub async fn serve_index() -> Response {
    serve_path("index.html")
}

async fn serve_static(uri: axum::http::Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    if path.is_empty() {
        return serve_path("index.html");
    }
    serve_path(path)
}

fn serve_path(path: &str) -> Response {
    match PanelAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime.to_string()),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
