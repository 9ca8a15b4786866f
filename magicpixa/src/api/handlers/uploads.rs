//! HTTP handler for photo uploads.

use crate::{
    AppState,
    api::models::uploads::UploadResponse,
    auth::permissions::{RequiresPermission, operation, resource},
    errors::{Error, Result},
    object_store::{ObjectOwner, PutObject, is_raster_image, object_key},
    prompts::Feature,
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::Json,
};
use bytes::BytesMut;

/// Upload a photo for later use
#[utoipa::path(
    post,
    path = "/uploads",
    tag = "uploads",
    summary = "Upload a photo",
    description = "Store a photo under the caller's account. The form needs a `feature` field naming the feature the photo \
        is for and a `file` field with a PNG, JPEG, WebP, GIF or HEIC image.",
    request_body(content_type = "multipart/form-data", description = "`feature` and `file` fields"),
    responses(
        (status = 201, description = "Photo stored", body = UploadResponse),
        (status = 400, description = "Missing fields, unknown feature or not an image"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "File too large"),
    ),
    security(("X-Magicpixa-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn upload_photo(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Artifacts, operation::CreateOwn>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let max_size = state.config.limits.max_upload_bytes;
    let mut feature: Option<Feature> = None;
    let mut file: Option<(String, BytesMut)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {e}"),
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "feature" => {
                let value = field.text().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read feature field: {e}"),
                })?;
                feature = Some(value.trim().parse::<Feature>()?);
            }
            "file" => {
                let content_type = field
                    .content_type()
                    .map(str::to_ascii_lowercase)
                    .filter(|ct| is_raster_image(ct))
                    .ok_or_else(|| Error::BadRequest {
                        message: "file must be a PNG, JPEG, WebP, GIF or HEIC image".to_string(),
                    })?;

                let mut data = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read file chunk: {e}"),
                })? {
                    if data.len() + chunk.len() > max_size {
                        tracing::warn!(max_size, "Upload exceeds size limit, aborting");
                        return Err(Error::PayloadTooLarge {
                            message: format!("File size exceeds maximum allowed size of {max_size} bytes"),
                        });
                    }
                    data.extend_from_slice(&chunk);
                }
                file = Some((content_type, data));
            }
            _ => {}
        }
    }

    let feature = feature.ok_or_else(|| Error::BadRequest {
        message: "feature field is required".to_string(),
    })?;
    let (content_type, data) = file.ok_or_else(|| Error::BadRequest {
        message: "file field is required".to_string(),
    })?;
    if data.is_empty() {
        return Err(Error::BadRequest {
            message: "file is empty".to_string(),
        });
    }

    let stored = state
        .object_store
        .put(PutObject {
            key: object_key(ObjectOwner::User(current_user.user.id), feature.as_str(), &content_type),
            content_type: content_type.clone(),
            data: data.freeze(),
        })
        .await?;

    tracing::info!(user_id = %current_user.user.id, key = %stored.key, size = stored.size, "Stored upload");
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            key: stored.key,
            url: stored.url,
            content_type,
            size: stored.size,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use crate::api::models::uploads::UploadResponse;
    use crate::test_utils::{create_test_app, create_test_config};
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};

    const USER: &str = "x-magicpixa-user";

    fn photo(bytes: Vec<u8>, mime: &str) -> Part {
        Part::bytes(bytes).file_name("photo.png").mime_type(mime)
    }

    #[tokio::test]
    async fn stores_photo_under_user_prefix() {
        let server = create_test_app(create_test_config()).await;

        let response = server
            .post("/api/v1/uploads")
            .add_header(USER, "uma@example.com")
            .multipart(
                MultipartForm::new()
                    .add_text("feature", "colorize")
                    .add_part("file", photo(vec![1, 2, 3, 4], "image/png")),
            )
            .await;

        response.assert_status(StatusCode::CREATED);
        let upload: UploadResponse = response.json();
        assert!(upload.key.starts_with("user/"));
        assert!(upload.key.contains("/colorize/"));
        assert!(upload.key.ends_with(".png"));
        assert_eq!(upload.size, 4);
        assert!(upload.url.ends_with(&upload.key));
    }

    #[tokio::test]
    async fn rejects_non_images_and_oversized_files() {
        let mut config = create_test_config();
        config.limits.max_upload_bytes = 8;
        let server = create_test_app(config).await;

        server
            .post("/api/v1/uploads")
            .add_header(USER, "uma@example.com")
            .multipart(
                MultipartForm::new()
                    .add_text("feature", "enhance")
                    .add_part("file", photo(b"hello".to_vec(), "text/plain")),
            )
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post("/api/v1/uploads")
            .add_header(USER, "uma@example.com")
            .multipart(
                MultipartForm::new()
                    .add_text("feature", "enhance")
                    .add_part("file", photo(vec![0; 64], "image/jpeg")),
            )
            .await
            .assert_status(StatusCode::PAYLOAD_TOO_LARGE);

        server
            .post("/api/v1/uploads")
            .add_header(USER, "uma@example.com")
            .multipart(MultipartForm::new().add_part("file", photo(vec![1], "image/png")))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn svg_uploads_are_rejected() {
        let server = create_test_app(create_test_config()).await;
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg"><script>alert(1)</script></svg>"#.to_vec();

        server
            .post("/api/v1/uploads")
            .add_header(USER, "uma@example.com")
            .multipart(
                MultipartForm::new()
                    .add_text("feature", "enhance")
                    .add_part("file", Part::bytes(svg).file_name("photo.svg").mime_type("image/svg+xml")),
            )
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn anonymous_uploads_are_rejected() {
        let server = create_test_app(create_test_config()).await;
        server
            .post("/api/v1/uploads")
            .multipart(MultipartForm::new().add_text("feature", "enhance"))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
