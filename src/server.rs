use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Router,
};
use confession_shorts::{
    generate_video, AlignmentReport, CaptionConfig, CaptionError, Collaborators, Gender,
    VideoRequest, VoiceChoice,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

struct AppState {
    template: VideoRequest,
    config: CaptionConfig,
    collaborators: Collaborators,
}

#[derive(Deserialize)]
struct GenerateRequest {
    text: String,
    voice: Option<String>,
    /// With `language`, narrate with a random voice instead of `voice`
    gender: Option<Gender>,
    language: Option<String>,
    series: Option<String>,
    part: Option<String>,
}

#[derive(Serialize)]
struct GenerateResponse {
    message: String,
    id: String,
    video: String,
    report: AlignmentReport,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateRequest>,
) -> impl IntoResponse {
    let mut request = state.template.clone();
    request.text = payload.text;
    match (payload.voice, payload.gender, payload.language) {
        (Some(voice), _, _) => request.voice = VoiceChoice::Named(voice),
        (None, Some(gender), Some(language)) => {
            request.voice = VoiceChoice::Random { gender, language }
        }
        _ => {}
    }
    if let Some(series) = payload.series {
        request.series = series;
    }
    if let Some(part) = payload.part {
        request.part = part;
    }

    match generate_video(&request, &state.config, &state.collaborators).await {
        Ok(generated) => (
            StatusCode::OK,
            Json(GenerateResponse {
                message: "Video generated".to_string(),
                video: format!("/output/{}/{}.mp4", generated.id, generated.id),
                id: generated.id,
                report: generated.report,
            }),
        )
            .into_response(),
        Err(e) => {
            // Bad text or configuration is the caller's fault
            let status = if e.downcast_ref::<CaptionError>().is_some() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(ErrorResponse {
                    error: format!("{:#}", e),
                }),
            )
                .into_response()
        }
    }
}

pub async fn start_server(
    port: u16,
    template: VideoRequest,
    config: CaptionConfig,
    collaborators: Collaborators,
) -> anyhow::Result<()> {
    let output_dir = template.output_dir.clone();
    tokio::fs::create_dir_all(&output_dir).await?;

    let state = Arc::new(AppState {
        template,
        config,
        collaborators,
    });

    let app = Router::new()
        .route("/api/generate", post(generate_handler))
        .nest_service("/output", ServeDir::new(output_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
