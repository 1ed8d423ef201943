//! REST endpoints: registration, discovery and file transfer.

use crate::error::{HubError, HubResult};
use crate::hub::Hub;
use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::Path;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use link_types::{DeviceId, DeviceInfo, FileId};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::sync::Arc;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes left unescaped in an RFC 5987 `ext-value` (`attr-char`).
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `POST /api/register`
pub async fn register(
    Extension(hub): Extension<Arc<Hub>>,
    Json(info): Json<DeviceInfo>,
) -> HubResult<Json<&'static str>> {
    tracing::debug!(
        "Registration attempt for device: {:?}, name: {}",
        info.id,
        info.name
    );
    // The connection future is only needed by the upgrade side
    let _pending = hub.register(info)?;
    Ok(Json("Ready to connect WebSocket."))
}

/// `GET /api/connected-devices`
pub async fn connected_devices(Extension(hub): Extension<Arc<Hub>>) -> Response {
    let devices = hub.connected_devices();
    tracing::debug!("Returning {} connected devices", devices.len());

    if devices.is_empty() {
        return (StatusCode::NOT_FOUND, Json("No connected devices found.")).into_response();
    }
    Json(devices).into_response()
}

/// Body of a successful upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Id to download the file with.
    pub file_id: FileId,
}

#[derive(Default)]
struct UploadForm {
    target_id: Option<String>,
    sender_id: Option<String>,
    file: Option<UploadedFile>,
}

struct UploadedFile {
    name: String,
    content_type: String,
    bytes: Bytes,
}

/// `POST /api/file`
pub async fn upload_file(
    Extension(hub): Extension<Arc<Hub>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> HubResult<Json<UploadResponse>> {
    let multipart =
        multipart.map_err(|_| HubError::Validation("multipart/form-data expected".into()))?;
    let form = read_form(multipart, hub.blobs().max_size()).await?;

    let target: DeviceId = parse_id(form.target_id, "targetId missing")?;
    let sender: DeviceId = parse_id(form.sender_id, "senderId missing")?;
    let file = form
        .file
        .filter(|file| !file.bytes.is_empty())
        .ok_or_else(|| HubError::Validation("file field missing".into()))?;

    let file_id = hub.offer_file(
        target,
        sender,
        file.name,
        file.content_type,
        file.bytes.to_vec(),
    )?;
    tracing::info!("File {:?} uploaded by {:?} for {:?}", file_id, sender, target);
    Ok(Json(UploadResponse { file_id }))
}

async fn read_form(mut multipart: Multipart, max_size: usize) -> HubResult<UploadForm> {
    let too_large = || HubError::Validation(format!("File exceeds {} MB", max_size / (1024 * 1024)));
    let mut form = UploadForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => return Err(too_large()),
            Err(e) => return Err(HubError::Validation(e.body_text())),
        };

        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("targetId") => form.target_id = field.text().await.ok(),
            Some("senderId") => form.sender_id = field.text().await.ok(),
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                        return Err(too_large())
                    }
                    Err(e) => return Err(HubError::Validation(e.body_text())),
                };
                form.file = Some(UploadedFile {
                    name,
                    content_type,
                    bytes,
                });
            }
            _ => {}
        }
    }

    Ok(form)
}

fn parse_id<T: std::str::FromStr>(value: Option<String>, missing: &str) -> HubResult<T> {
    value
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| HubError::Validation(missing.to_string()))
}

/// `GET /api/file/{id}`
pub async fn download_file(
    Extension(hub): Extension<Arc<Hub>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(file_id) = id.parse::<FileId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match hub.take_file(&file_id) {
        Ok(blob) => {
            tracing::debug!("File {:?} downloaded ({} bytes)", file_id, blob.bytes.len());
            let content_type = HeaderValue::from_str(&blob.content_type)
                .unwrap_or(HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
            let disposition = HeaderValue::from_str(&content_disposition(&blob.name))
                .unwrap_or(HeaderValue::from_static("attachment"));

            (
                [(CONTENT_TYPE, content_type), (CONTENT_DISPOSITION, disposition)],
                blob.bytes,
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `Content-Disposition` value for a download.
///
/// Non-ASCII names get an ASCII `filename` fallback plus the UTF-8
/// `filename*` form, so the header itself stays ASCII.
fn content_disposition(name: &str) -> String {
    let name = sanitize_filename(name);
    if name.is_ascii() {
        return format!("attachment; filename=\"{}\"", name);
    }

    let fallback: String = name
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(&name, ATTR_CHAR)
    )
}

/// Strip characters that would break a quoted header parameter.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_sanitizing() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("a\"b\\c\r\n.txt"), "abc.txt");
        assert_eq!(sanitize_filename("фото.jpg"), "фото.jpg");
    }

    #[test]
    fn ascii_names_use_plain_filename() {
        assert_eq!(
            content_disposition("notes.txt"),
            "attachment; filename=\"notes.txt\""
        );
    }

    #[test]
    fn non_ascii_names_use_extended_filename() {
        let value = content_disposition("фото 1.jpg");
        assert_eq!(
            value,
            "attachment; filename=\"____ 1.jpg\"; filename*=UTF-8''%D1%84%D0%BE%D1%82%D0%BE%201.jpg"
        );
        assert!(HeaderValue::from_str(&value).unwrap().to_str().is_ok());
    }

    #[test]
    fn parse_id_rejects_missing_and_invalid() {
        let ok: HubResult<DeviceId> =
            parse_id(Some("6f1c2a9e-3b4d-4e5f-8a7b-9c0d1e2f3a4b".into()), "x");
        assert!(ok.is_ok());

        let missing: HubResult<DeviceId> = parse_id(None, "targetId missing");
        assert_eq!(missing.unwrap_err().to_string(), "targetId missing");

        let invalid: HubResult<DeviceId> = parse_id(Some("nope".into()), "senderId missing");
        assert_eq!(invalid.unwrap_err().to_string(), "senderId missing");
    }
}
