//! Cédula Extractor - ID card photo to reviewed spreadsheet record server.

mod config;
mod error;
mod export;
mod extractor;
mod geography;
mod image_prep;
mod normalize;
mod schema;
mod session;
mod store;
mod vision;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use config::{AppConfig, ExportMode};
use error::AppError;
use export::{Artifact, ExportFile};
use extractor::Extractor;
use schema::{ContactInfo, ExtractedIdentity, Validity};
use session::{SessionStore, SessionView, Side};
use std::sync::Arc;
use std::time::Duration;
use store::DiskStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vision::mistral::MistralClient;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    sessions: SessionStore,
    extractor: Extractor,
    disk_store: Option<Arc<DiskStore>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cedula_extractor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "Export mode: {:?}, {} known cities",
        config.export_mode,
        geography::len()
    );

    let mistral = MistralClient::new(&config.mistral)?;
    info!("Mistral client initialized (model {})", config.mistral.model);

    let disk_store = match config.export_mode {
        ExportMode::Disk => {
            let store = DiskStore::new(config.workbook_path.clone(), config.output_dir.clone());
            info!(
                "Saving to workbook {:?}, photos under {:?}",
                store.workbook_path(),
                config.output_dir
            );
            Some(Arc::new(store))
        }
        ExportMode::Download => None,
    };

    let sessions = SessionStore::new();
    tokio::spawn(evict_idle_sessions(sessions.clone(), config.session_idle));

    let state = AppState {
        sessions,
        extractor: Extractor::new(Arc::new(mistral)),
        disk_store,
    };

    let app = router(state, config.export_mode)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn router(state: AppState, mode: ExportMode) -> Router {
    let app = Router::new()
        .route("/health", get(health))
        .route("/validity-options", get(validity_options))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/images/:side", put(upload_image).get(get_image))
        .route("/sessions/:id/contact", put(set_contact))
        .route("/sessions/:id/extract", post(extract))
        .route("/sessions/:id/review", put(review))
        .route("/sessions/:id/retake", post(retake))
        .route("/sessions/:id/reset", post(reset));

    let app = match mode {
        ExportMode::Download => app.route("/sessions/:id/export/:artifact", get(export_artifact)),
        ExportMode::Disk => app.route("/sessions/:id/save", post(save)),
    };

    app.with_state(state)
}

/// Periodically drop sessions the operator abandoned.
async fn evict_idle_sessions(sessions: SessionStore, max_idle: Duration) {
    let period = (max_idle / 4).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        sessions.evict_idle(max_idle);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

async fn validity_options() -> Json<Vec<&'static str>> {
    Json(Validity::ALL.iter().map(|v| v.label()).collect())
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    (StatusCode::CREATED, Json(state.sessions.create()))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.sessions.with(&id, |s| s.view())?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.sessions.remove(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Upload one side of the card (multipart field `file`).
async fn upload_image(
    State(state): State<AppState>,
    Path((id, side)): Path<(String, Side)>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>, AppError> {
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            file_data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err(AppError::BadRequest("No file uploaded".to_string()));
    }

    info!(
        "Session {}: received {} photo ({} bytes)",
        id,
        side.label(),
        file_data.len()
    );
    store_photo(&state, &id, side, file_data).await.map(Json)
}

/// Preprocess a photo on the blocking pool and attach it to the session.
async fn store_photo(
    state: &AppState,
    id: &str,
    side: Side,
    bytes: Vec<u8>,
) -> Result<SessionView, AppError> {
    // Unknown ids fail before decoding
    state.sessions.with(id, |_| ())?;
    let image = tokio::task::spawn_blocking(move || image_prep::preprocess(&bytes)).await??;
    let view = state.sessions.with_mut(id, |s| {
        s.set_image(side, image)?;
        Ok::<_, AppError>(s.view())
    })??;
    Ok(view)
}

async fn get_image(
    State(state): State<AppState>,
    Path((id, side)): Path<(String, Side)>,
) -> Result<impl IntoResponse, AppError> {
    let jpeg = state
        .sessions
        .with(&id, |s| s.image(side).map(|img| img.jpeg.clone()))?
        .ok_or_else(|| AppError::BadRequest(format!("No {} photo uploaded", side.label())))?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg))
}

async fn set_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(contact): Json<ContactInfo>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.sessions.with_mut(&id, |s| {
        s.set_contact(contact)?;
        Ok::<_, AppError>(s.view())
    })??;
    Ok(Json(view))
}

/// Run the vision model on both photos. The session lock is not held while
/// waiting for the model.
async fn extract(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let (front, back) = state.sessions.with(&id, |s| s.extraction_inputs())??;
    let fields = state.extractor.extract(&front, &back).await?;
    let view = state.sessions.with_mut(&id, |s| {
        s.complete_extraction(fields)?;
        Ok::<_, AppError>(s.view())
    })??;
    info!("Session {}: extraction stored", id);
    Ok(Json(view))
}

async fn review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edit): Json<ExtractedIdentity>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.sessions.with_mut(&id, |s| {
        s.review(edit)?;
        Ok::<_, AppError>(s.view())
    })??;
    Ok(Json(view))
}

async fn retake(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.sessions.with_mut(&id, |s| {
        s.retake()?;
        Ok::<_, AppError>(s.view())
    })??;
    Ok(Json(view))
}

async fn reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.sessions.with_mut(&id, |s| {
        s.reset();
        s.view()
    })?;
    info!("Session {}: reset", id);
    Ok(Json(view))
}

/// Download one artifact of a reviewed record.
async fn export_artifact(
    State(state): State<AppState>,
    Path((id, artifact)): Path<(String, Artifact)>,
) -> Result<impl IntoResponse, AppError> {
    let file = build_export(&state, &id, artifact)?;
    let disposition = format!("attachment; filename=\"{}\"", file.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    ))
}

fn build_export(state: &AppState, id: &str, artifact: Artifact) -> Result<ExportFile, AppError> {
    state.sessions.with_mut(id, |s| -> Result<ExportFile, AppError> {
        let file = export::build_artifact(&s.export_input()?, artifact)?;
        s.mark_saved(None)?;
        Ok(file)
    })?
}

/// Append the record to the cumulative workbook and write the photos.
///
/// The file work runs on the blocking pool against a copy of the record; the
/// session only moves to saved once it succeeds.
async fn save(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let store = state
        .disk_store
        .clone()
        .ok_or_else(|| AppError::BadRequest("Disk export is not enabled".to_string()))?;

    let snapshot = state
        .sessions
        .with(&id, |s| s.export_input().map(|input| input.to_snapshot()))??;
    let folder =
        tokio::task::spawn_blocking(move || store.save(&snapshot.input())).await??;

    let view = state.sessions.with_mut(&id, |s| {
        s.mark_saved(Some(folder.display().to_string()))?;
        Ok::<_, AppError>(s.view())
    })??;
    info!("Session {}: saved to {:?}", id, view.saved_to);
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionError, SessionError};
    use crate::session::SessionState;
    use crate::vision::VisionBackend;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    struct StubBackend;

    #[async_trait::async_trait]
    impl VisionBackend for StubBackend {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, _: &str, _: &[&[u8]]) -> Result<String, ExtractionError> {
            Ok(r#"{"cedula": "1712345678", "codigo_dactilar": "V1234I5678",
                "apellidos": "MORA", "nombres": "luis", "provincia": "PICHINCHA",
                "ciudad": "QUITO", "es_extranjero": "NO"}"#
                .to_string())
        }
    }

    fn state(disk_store: Option<DiskStore>) -> AppState {
        AppState {
            sessions: SessionStore::new(),
            extractor: Extractor::new(Arc::new(StubBackend)),
            disk_store: disk_store.map(Arc::new),
        }
    }

    fn png() -> Vec<u8> {
        let img = RgbImage::from_pixel(40, 20, image::Rgb([120, 130, 140]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    async fn reviewed_session(state: &AppState) -> String {
        let (_, Json(view)) = create_session(State(state.clone())).await;
        let id = view.id;
        store_photo(state, &id, Side::Front, png()).await.unwrap();
        store_photo(state, &id, Side::Back, png()).await.unwrap();
        set_contact(
            State(state.clone()),
            Path(id.clone()),
            Json(ContactInfo {
                email: "luis@example.ec".to_string(),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        let Json(view) = extract(State(state.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(view.state, SessionState::Extracted);
        let record = view.record.unwrap();
        assert_eq!(record.fields.given_names, "LUIS");

        let Json(view) = review(State(state.clone()), Path(id.clone()), Json(record))
            .await
            .unwrap();
        assert_eq!(view.state, SessionState::Reviewed);
        id
    }

    #[tokio::test]
    async fn test_validity_options() {
        let Json(options) = validity_options().await;
        assert_eq!(options.len(), 7);
        assert!(options.contains(&"1 año"));
    }

    #[tokio::test]
    async fn test_extract_requires_inputs() {
        let state = state(None);
        let (_, Json(view)) = create_session(State(state.clone())).await;
        let err = extract(State(state.clone()), Path(view.id)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = get_session(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Session(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bad_photo_leaves_session_unchanged() {
        let state = state(None);
        let (_, Json(view)) = create_session(State(state.clone())).await;
        let err = store_photo(&state, &view.id, Side::Front, b"not an image".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let Json(view) = get_session(State(state), Path(view.id)).await.unwrap();
        assert!(view.front.is_none());
    }

    #[tokio::test]
    async fn test_download_export_marks_saved() {
        let state = state(None);
        let id = reviewed_session(&state).await;

        let file = build_export(&state, &id, Artifact::Workbook).unwrap();
        assert_eq!(file.file_name, "Datos_MORA_LUIS.xlsx");
        let file = build_export(&state, &id, Artifact::Back).unwrap();
        assert_eq!(file.file_name, "Reverso_MORA_LUIS.jpg");

        let Json(view) = get_session(State(state), Path(id)).await.unwrap();
        assert_eq!(view.state, SessionState::Saved);
    }

    #[tokio::test]
    async fn test_disk_save() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(Some(DiskStore::new(
            dir.path().join("firmas.xlsx"),
            dir.path(),
        )));
        let id = reviewed_session(&state).await;

        let Json(view) = save(State(state.clone()), Path(id)).await.unwrap();
        assert_eq!(view.state, SessionState::Saved);
        assert!(dir.path().join("firmas.xlsx").exists());
        assert!(dir.path().join("MORA_LUIS").join("anverso_MORA_LUIS.jpg").exists());
    }

    #[tokio::test]
    async fn test_locked_workbook_save_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let workbook = dir.path().join("firmas.xlsx");
        std::fs::write(&workbook, b"half-written by another program").unwrap();
        let state = state(Some(DiskStore::new(&workbook, dir.path())));
        let id = reviewed_session(&state).await;

        let err = save(State(state.clone()), Path(id.clone())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::LOCKED);
        let Json(view) = get_session(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(view.state, SessionState::Reviewed);
        assert_eq!(view.record.unwrap().fields.surname, "MORA");

        // Operator closes the spreadsheet program
        std::fs::remove_file(&workbook).unwrap();
        let Json(view) = save(State(state.clone()), Path(id)).await.unwrap();
        assert_eq!(view.state, SessionState::Saved);
        let sheet = store::read_sheet(&workbook).unwrap();
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0][0], "1712345678");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let state = state(None);
        let (_, Json(view)) = create_session(State(state.clone())).await;
        let status = delete_session(State(state.clone()), Path(view.id.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let err = get_session(State(state.clone()), Path(view.id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(delete_session(State(state), Path(view.id)).await.is_err());
    }

    #[tokio::test]
    async fn test_retake_then_reset() {
        let state = state(None);
        let id = reviewed_session(&state).await;

        let Json(view) = retake(State(state.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(view.state, SessionState::AwaitingInput);
        assert!(view.front.is_some());
        assert!(view.record.is_none());

        let Json(view) = reset(State(state), Path(id)).await.unwrap();
        assert!(view.front.is_none());
        assert!(view.contact.email.is_empty());
    }
}
