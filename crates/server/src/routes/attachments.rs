use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::models::Attachment,
    error::{AppError, Result},
    middleware::auth::RequestContext,
    routes::projects::project_owner,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/projects/:id/attachments",
        get(list_attachments).post(upload_attachments),
    )
}

#[derive(Debug, Serialize)]
pub struct AttachmentListResponse {
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: Vec<Attachment>,
    pub errors: Vec<String>,
}

async fn list_attachments(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<AttachmentListResponse>> {
    project_owner(&state.db.pool, &project_id).await?;

    let attachments = sqlx::query_as::<_, Attachment>(
        "SELECT * FROM attachments WHERE project_id = ? ORDER BY uploaded_at ASC",
    )
    .bind(&project_id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(AttachmentListResponse { attachments }))
}

async fn upload_attachments(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let actor = ctx.require_user()?;

    let owner_id = project_owner(&state.db.pool, &project_id).await?;
    if owner_id != actor.id {
        return Err(AppError::Forbidden(
            "Only the project owner can upload attachments".to_string(),
        ));
    }

    let mut uploaded = Vec::new();
    let mut errors = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        let Some(original_filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let file_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let data = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                errors.push(format!("Failed to read file {original_filename}: {e}"));
                continue;
            }
        };

        let stored = match state
            .storage
            .save_attachment(&project_id, &original_filename, &data)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                errors.push(format!("{original_filename}: {e}"));
                continue;
            }
        };

        let attachment = Attachment {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.clone(),
            user_id: actor.id.clone(),
            filename: stored.filename,
            original_filename,
            file_size: stored.size,
            file_type,
            file_path: stored.relative_path,
            uploaded_at: Utc::now().to_rfc3339(),
        };

        sqlx::query(
            "INSERT INTO attachments (id, project_id, user_id, filename, original_filename, file_size, file_type, file_path, uploaded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&attachment.id)
        .bind(&attachment.project_id)
        .bind(&attachment.user_id)
        .bind(&attachment.filename)
        .bind(&attachment.original_filename)
        .bind(attachment.file_size)
        .bind(&attachment.file_type)
        .bind(&attachment.file_path)
        .bind(&attachment.uploaded_at)
        .execute(&state.db.pool)
        .await?;

        tracing::debug!(project_id = %project_id, file = %attachment.filename, "attachment stored");
        uploaded.push(attachment);
    }

    if uploaded.is_empty() && errors.is_empty() {
        return Err(AppError::Validation("No files provided".to_string()));
    }

    Ok((StatusCode::CREATED, Json(UploadResponse { uploaded, errors })))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use tower::util::ServiceExt;

    use crate::{
        db::test_utils::{seed_project, seed_user},
        routes::test_support::{body_json, request, test_app, token_for},
    };

    const BOUNDARY: &str = "crowdhub-boundary";

    fn multipart_upload(uri: &str, token: &str, filename: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn owner_uploads_and_files_are_listed() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let owner = seed_user(&state.db.pool, "owner").await?;
        let other = seed_user(&state.db.pool, "other").await?;
        let project = seed_project(&state.db.pool, &owner.id, "Docs").await?;
        let uri = format!("/api/projects/{project}/attachments");

        let denied = app
            .clone()
            .oneshot(multipart_upload(
                &uri,
                &token_for(&state, &other)?,
                "plan.txt",
                "nope",
            ))
            .await?;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let res = app
            .clone()
            .oneshot(multipart_upload(
                &uri,
                &token_for(&state, &owner)?,
                "my plan.txt",
                "step one",
            ))
            .await?;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = body_json(res).await?;
        let stored = &body["uploaded"][0];
        assert_eq!(stored["original_filename"], "my plan.txt");
        assert_eq!(stored["file_size"], 8);
        assert_eq!(stored["file_type"], "text/plain");
        let path = stored["file_path"].as_str().unwrap_or_default().to_string();
        assert!(path.starts_with(&format!("projects/{project}/")));
        assert!(path.ends_with("_my_plan.txt"));

        let on_disk = std::path::Path::new(&state.config.upload_path).join(&path);
        assert_eq!(std::fs::read_to_string(on_disk)?, "step one");

        let res = app
            .oneshot(request(Method::GET, &uri, None, None)?)
            .await?;
        let body = body_json(res).await?;
        assert_eq!(body["attachments"].as_array().map(Vec::len), Some(1));

        let _ = std::fs::remove_dir_all(&state.config.upload_path);
        Ok(())
    }
}
