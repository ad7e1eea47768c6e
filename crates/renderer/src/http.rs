//! REST client for an out-of-process render service.
//!
//! A render context is created by uploading the volume with its device
//! geometry (`POST /contexts`), driven one pose at a time
//! (`POST /contexts/{id}/render`) and torn down with
//! `DELETE /contexts/{id}`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use xraygen_core::parameters::DeviceGeometry;
use xraygen_core::sampler::Pose;

use crate::error::RenderError;
use crate::renderer::{ProjectionRenderer, RawProjection, RendererFactory};
use crate::volume::Volume;

/// Response of `POST /contexts`.
#[derive(Debug, Deserialize)]
struct CreateContextResponse {
    context_id: String,
}

/// Factory creating render contexts on a remote service.
#[derive(Clone)]
pub struct HttpRendererFactory {
    client: reqwest::Client,
    api_url: String,
}

impl HttpRendererFactory {
    /// * `api_url` - Base HTTP URL, e.g. `http://renderer:8900`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RendererFactory for HttpRendererFactory {
    async fn create(
        &self,
        volume: Arc<Volume>,
        geometry: DeviceGeometry,
    ) -> Result<Box<dyn ProjectionRenderer>, RenderError> {
        let response = self
            .client
            .post(format!("{}/contexts", self.api_url))
            .query(&[
                ("format", volume.format.as_str().to_string()),
                (
                    "source_to_detector_distance",
                    geometry.source_to_detector_distance.to_string(),
                ),
                ("detector_diameter", geometry.detector_diameter.to_string()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(volume.bytes.as_ref().clone())
            .send()
            .await?;
        let created: CreateContextResponse = parse_response(response).await?;
        tracing::debug!(context_id = %created.context_id, "Render context created");

        Ok(Box::new(HttpRenderer {
            client: self.client.clone(),
            context_url: format!("{}/contexts/{}", self.api_url, created.context_id),
            released: false,
        }))
    }
}

/// One remote render context.
pub struct HttpRenderer {
    client: reqwest::Client,
    context_url: String,
    released: bool,
}

#[async_trait]
impl ProjectionRenderer for HttpRenderer {
    async fn render(&mut self, pose: &Pose) -> Result<RawProjection, RenderError> {
        if self.released {
            return Err(RenderError::Released);
        }
        let response = self
            .client
            .post(format!("{}/render", self.context_url))
            .json(pose)
            .send()
            .await?;
        let projection: RawProjection = parse_response(response).await?;
        projection.validate()?;
        Ok(projection)
    }

    async fn release(&mut self) -> Result<(), RenderError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let response = self.client.delete(&self.context_url).send().await?;
        ensure_success(response).await?;
        Ok(())
    }
}

// ---- private helpers ----

/// Return the response unchanged on success, or [`RenderError::Api`] with
/// the status and body text on failure.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RenderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(RenderError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RenderError> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use mockito::Matcher;
    use xraygen_core::volume::VolumeFormat;

    use super::*;

    // `assert_matches!` formats the whole `Result` on failure.
    impl std::fmt::Debug for dyn ProjectionRenderer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("dyn ProjectionRenderer")
        }
    }

    fn volume() -> Arc<Volume> {
        Arc::new(Volume {
            format: VolumeFormat::Nrrd,
            bytes: Arc::new(b"NRRD0004\n".to_vec()),
        })
    }

    fn geometry() -> DeviceGeometry {
        DeviceGeometry {
            source_to_detector_distance: 1000.0,
            detector_diameter: 228.6,
        }
    }

    fn pose() -> Pose {
        Pose {
            push_pull: 0.0,
            head_foot: 1.0,
            raise_lower: 0.0,
            alpha: 10.0,
            beta: 355.0,
        }
    }

    #[tokio::test]
    async fn full_context_lifecycle() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/contexts")
            .match_query(Matcher::UrlEncoded("format".into(), "nrrd".into()))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"context_id":"ctx-1"}"#)
            .create_async()
            .await;
        let render = server
            .mock("POST", "/contexts/ctx-1/render")
            .match_body(Matcher::PartialJsonString(r#"{"alpha":10.0}"#.into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"width":2,"height":1,"pixels":[0.25,0.75]}"#)
            .create_async()
            .await;
        let release = server
            .mock("DELETE", "/contexts/ctx-1")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let factory = HttpRendererFactory::new(server.url());
        let mut renderer = factory.create(volume(), geometry()).await.unwrap();
        let projection = renderer.render(&pose()).await.unwrap();
        assert_eq!(projection.pixels, vec![0.25, 0.75]);

        renderer.release().await.unwrap();
        // Second release is a no-op.
        renderer.release().await.unwrap();
        assert_matches!(renderer.render(&pose()).await, Err(RenderError::Released));

        create.assert_async().await;
        render.assert_async().await;
        release.assert_async().await;
    }

    #[tokio::test]
    async fn service_errors_carry_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/contexts")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("gpu busy")
            .create_async()
            .await;

        let factory = HttpRendererFactory::new(server.url());
        let result = factory.create(volume(), geometry()).await;
        assert_matches!(
            result,
            Err(RenderError::Api { status: 503, body }) if body == "gpu busy"
        );
    }

    #[tokio::test]
    async fn malformed_projection_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/contexts")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(r#"{"context_id":"c"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/contexts/c/render")
            .with_header("content-type", "application/json")
            .with_body(r#"{"width":4,"height":4,"pixels":[1.0]}"#)
            .create_async()
            .await;

        let factory = HttpRendererFactory::new(server.url());
        let mut renderer = factory.create(volume(), geometry()).await.unwrap();
        assert_matches!(
            renderer.render(&pose()).await,
            Err(RenderError::InvalidProjection(_))
        );
    }
}
