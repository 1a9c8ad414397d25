use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sigrelay_core::{
    catalog::{IMAGE_ENDPOINT_FLUX_LORA, IMAGE_ENDPOINT_FLUX_PRO, IMAGE_ENDPOINT_FLUX_SCHNELL},
    errors::Error,
    messaging::types::GeneratedImage,
    model::{client::ImageModel, types::ImageRequest},
    Result,
};
use tracing::debug;

use crate::{check_status, http_client};

const RUN_BASE: &str = "https://fal.run";

/// fal.ai synchronous runner: one POST per image, then a download of the result URL.
#[derive(Clone, Debug)]
pub struct FalClient {
    key: String,
    base_url: String,
    http: reqwest::Client,
}

impl FalClient {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            base_url: RUN_BASE.to_string(),
            http: http_client(Duration::from_secs(300))?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ImageModel for FalClient {
    async fn generate(&self, req: ImageRequest) -> Result<GeneratedImage> {
        let args = arguments(&req)?;
        let url = format!("{}/{}", self.base_url, req.endpoint);
        debug!(endpoint = %req.endpoint, "fal.ai request");

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Key {}", self.key))
            .json(&args)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("fal.ai request error: {e}")))?;
        let resp = check_status("fal.ai", resp).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::Provider(format!("fal.ai json error: {e}")))?;

        let (image_url, mime_type) = first_image(&v)?;
        let resp = self
            .http
            .get(&image_url)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("image download error: {e}")))?;
        let resp = check_status("image download", resp).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Provider(format!("image download error: {e}")))?;

        Ok(GeneratedImage {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}

/// Endpoint-specific arguments for a request.
fn arguments(req: &ImageRequest) -> Result<Value> {
    let mut args = json!({
        "prompt": req.prompt,
        "image_size": { "width": req.size.width, "height": req.size.height },
        "num_images": 1,
        "enable_safety_checker": false,
        "output_format": "png",
    });

    match req.endpoint.as_str() {
        IMAGE_ENDPOINT_FLUX_SCHNELL => {
            args["num_inference_steps"] = json!(4);
        }
        IMAGE_ENDPOINT_FLUX_LORA => {
            args["num_inference_steps"] = json!(28);
            args["guidance_scale"] = json!(3.5);
            args["loras"] = req
                .loras
                .iter()
                .map(|l| json!({ "path": l.path, "scale": l.scale }))
                .collect();
        }
        IMAGE_ENDPOINT_FLUX_PRO => {
            args["num_inference_steps"] = json!(28);
            args["guidance_scale"] = json!(3.5);
        }
        other => {
            return Err(Error::Provider(format!("unknown fal.ai endpoint: {other}")));
        }
    }
    Ok(args)
}

fn first_image(v: &Value) -> Result<(String, String)> {
    let image = v
        .pointer("/images/0")
        .ok_or_else(|| Error::Provider("Failed to generate the image.".to_string()))?;
    let url = image
        .get("url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::Provider("fal.ai image has no url".to_string()))?;
    let mime = image
        .get("content_type")
        .and_then(Value::as_str)
        .unwrap_or("image/png");
    Ok((url.to_string(), mime.to_string()))
}
