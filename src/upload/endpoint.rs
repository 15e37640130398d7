use super::session::RequestKind;
use crate::config::UploadConfig;
use crate::error::{PipelineError, Result};
use crate::media::MediaKind;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Multipart field carrying the clip (or the fallback stand-in)
pub const VIDEO_FIELD: &str = "video";
/// Multipart field carrying the reference image
pub const REFERENCE_FIELD: &str = "stump_img";

/// One file part of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    pub field: &'static str,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

/// A complete multipart submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub kind: RequestKind,
    pub video: UploadPart,
    pub reference: UploadPart,
}

impl UploadRequest {
    /// Clip in the video field, reference image alongside it
    pub fn primary(
        video_name: impl Into<String>,
        video: Bytes,
        reference_name: impl Into<String>,
        reference: Bytes,
    ) -> Self {
        Self {
            kind: RequestKind::Primary,
            video: UploadPart {
                field: VIDEO_FIELD,
                file_name: video_name.into(),
                mime_type: MediaKind::Video.mime_type().to_string(),
                bytes: video,
            },
            reference: Self::reference_part(reference_name.into(), reference),
        }
    }

    /// Reference image bytes in both fields.
    ///
    /// The video field keeps the video media type so the server takes its
    /// single-frame path instead of rejecting the part.
    pub fn fallback(session_id: Uuid, reference_name: impl Into<String>, reference: Bytes) -> Self {
        Self {
            kind: RequestKind::Fallback,
            video: UploadPart {
                field: VIDEO_FIELD,
                file_name: format!("video_fallback_{}.mp4", session_id.simple()),
                mime_type: MediaKind::Video.mime_type().to_string(),
                bytes: reference.clone(),
            },
            reference: Self::reference_part(reference_name.into(), reference),
        }
    }

    fn reference_part(file_name: String, bytes: Bytes) -> UploadPart {
        UploadPart {
            field: REFERENCE_FIELD,
            file_name,
            mime_type: MediaKind::Image.mime_type().to_string(),
            bytes,
        }
    }

    pub fn parts(&self) -> [&UploadPart; 2] {
        [&self.video, &self.reference]
    }
}

/// Raw response from the processing endpoint
#[derive(Debug, Clone)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: Bytes,
}

impl EndpointResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Remote processing service.
///
/// Returns `Ok` for any HTTP response, whatever its status; `Err` only when
/// no response was received.
#[async_trait]
pub trait ProcessingEndpoint: Send + Sync {
    async fn submit(&self, request: UploadRequest) -> Result<EndpointResponse>;
}

/// Processing endpoint reached over HTTP
pub struct HttpProcessingEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpProcessingEndpoint {
    pub fn new(config: &UploadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| PipelineError::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.endpoint.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_form(request: &UploadRequest) -> Result<Form> {
        let mut form = Form::new();
        for part in request.parts() {
            let file = Part::bytes(part.bytes.to_vec())
                .file_name(part.file_name.clone())
                .mime_str(&part.mime_type)
                .map_err(|e| PipelineError::transport(format!("invalid part media type: {}", e)))?;
            form = form.part(part.field, file);
        }
        Ok(form)
    }
}

#[async_trait]
impl ProcessingEndpoint for HttpProcessingEndpoint {
    #[instrument(skip(self, request), fields(kind = %request.kind, url = %self.url))]
    async fn submit(&self, request: UploadRequest) -> Result<EndpointResponse> {
        let form = Self::build_form(&request)?;

        let response = self
            .client
            .post(&self.url)
            .header(ACCEPT, "image/jpeg")
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::transport(format!("request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::transport(format!("failed to read response body: {}", e)))?;

        debug!("Endpoint answered HTTP {} ({} bytes)", status, body.len());
        Ok(EndpointResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_reuses_reference_bytes() {
        let session_id = Uuid::new_v4();
        let reference = Bytes::from_static(b"\xff\xd8 jpeg");
        let request = UploadRequest::fallback(session_id, "stump.jpg", reference.clone());

        assert_eq!(request.kind, RequestKind::Fallback);
        assert_eq!(request.video.field, VIDEO_FIELD);
        assert_eq!(request.video.bytes, reference);
        assert_eq!(request.video.mime_type, "video/mp4");
        assert_eq!(
            request.video.file_name,
            format!("video_fallback_{}.mp4", session_id.simple())
        );
        assert_eq!(request.reference.field, REFERENCE_FIELD);
        assert_eq!(request.reference.mime_type, "image/jpeg");
        assert_eq!(request.reference.bytes, reference);
    }

    #[test]
    fn test_primary_layout() {
        let request = UploadRequest::primary(
            "video_1.mp4",
            Bytes::from_static(b"mp4"),
            "stump_1.jpg",
            Bytes::from_static(b"jpg"),
        );
        let fields: Vec<&str> = request.parts().iter().map(|p| p.field).collect();
        assert_eq!(fields, vec!["video", "stump_img"]);
        assert_eq!(request.video.file_name, "video_1.mp4");
    }

    #[test]
    fn test_form_builds_for_both_layouts() {
        let request = UploadRequest::fallback(Uuid::new_v4(), "s.jpg", Bytes::from_static(b"x"));
        assert!(HttpProcessingEndpoint::build_form(&request).is_ok());
    }

    #[test]
    fn test_success_range() {
        let response = |status| EndpointResponse {
            status,
            body: Bytes::new(),
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(304).is_success());
        assert!(!response(500).is_success());
    }
}
