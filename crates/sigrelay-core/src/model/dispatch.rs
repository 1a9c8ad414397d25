use std::{collections::HashMap, sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    catalog::{Catalog, ModelFamily, TextProvider},
    errors::Error,
    Result,
};

use super::{
    client::{ImageModel, TextModel},
    types::{DispatchRequest, Reply},
};

/// Routes a request to the provider that serves its model.
///
/// Routing is a static catalog lookup; every call is bounded by `timeout`.
pub struct Dispatcher {
    catalog: Catalog,
    text: HashMap<TextProvider, Arc<dyn TextModel>>,
    image: Option<Arc<dyn ImageModel>>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(catalog: Catalog, timeout: Duration) -> Self {
        Self {
            catalog,
            text: HashMap::new(),
            image: None,
            timeout,
        }
    }

    pub fn with_text_model(mut self, client: Arc<dyn TextModel>) -> Self {
        self.text.insert(client.provider(), client);
        self
    }

    pub fn with_image_model(mut self, client: Arc<dyn ImageModel>) -> Self {
        self.image = Some(client);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn supports_images(&self) -> bool {
        self.image.is_some()
    }

    pub async fn dispatch(&self, req: DispatchRequest) -> Result<Reply> {
        match req {
            DispatchRequest::Chat(req) => {
                let provider = match self.catalog.family(&req.model) {
                    Some(ModelFamily::Text(p)) => p,
                    Some(ModelFamily::Image) => {
                        return Err(Error::Provider(format!(
                            "{} is an image model and cannot chat",
                            req.model
                        )))
                    }
                    None => return Err(Error::Provider(format!("unknown model {}", req.model))),
                };
                let client = self.text.get(&provider).ok_or_else(|| {
                    Error::Provider(format!("{} provider is not configured", provider.as_str()))
                })?;

                debug!(model = %req.model, messages = req.messages.len(), "dispatching completion");
                let model = req.model.clone();
                let text = self.bounded(&model, client.complete(req)).await?;
                Ok(Reply::Text(text))
            }
            DispatchRequest::Image(req) => {
                if self.catalog.family(&req.endpoint) != Some(ModelFamily::Image) {
                    return Err(Error::Provider(format!(
                        "unknown image endpoint {}",
                        req.endpoint
                    )));
                }
                let client = self.image.as_ref().ok_or_else(|| {
                    Error::Provider("image provider is not configured".to_string())
                })?;

                debug!(endpoint = %req.endpoint, "dispatching image generation");
                let endpoint = req.endpoint.clone();
                let image = self.bounded(&endpoint, client.generate(req)).await?;
                Ok(Reply::Image(image))
            }
        }
    }

    async fn bounded<T>(
        &self,
        model: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(model, timeout_secs = self.timeout.as_secs(), "provider call timed out");
                Err(Error::Provider(format!(
                    "{model} timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        catalog::IMAGE_ENDPOINT_FLUX_PRO,
        messaging::types::GeneratedImage,
        model::types::{ChatTurn, CompletionRequest, ImageRequest, DEFAULT_MAX_TOKENS},
    };

    struct Echo(TextProvider);

    #[async_trait]
    impl TextModel for Echo {
        fn provider(&self) -> TextProvider {
            self.0
        }

        async fn complete(&self, req: CompletionRequest) -> Result<String> {
            Ok(format!("{}:{}", self.0.as_str(), req.messages.len()))
        }
    }

    struct Slow;

    #[async_trait]
    impl TextModel for Slow {
        fn provider(&self) -> TextProvider {
            TextProvider::Anthropic
        }

        async fn complete(&self, _req: CompletionRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    struct Pixel;

    #[async_trait]
    impl ImageModel for Pixel {
        async fn generate(&self, _req: ImageRequest) -> Result<GeneratedImage> {
            Ok(GeneratedImage {
                bytes: vec![1, 2, 3],
                mime_type: "image/png".to_string(),
            })
        }
    }

    fn chat(model: &str) -> DispatchRequest {
        DispatchRequest::Chat(CompletionRequest {
            model: model.to_string(),
            system: None,
            messages: vec![ChatTurn::user("hi")],
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    fn image(endpoint: &str) -> DispatchRequest {
        DispatchRequest::Image(ImageRequest {
            endpoint: endpoint.to_string(),
            prompt: "a fox".to_string(),
            size: Catalog::builtin().default_size(),
            loras: vec![],
        })
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Catalog::builtin(), Duration::from_secs(1))
            .with_text_model(Arc::new(Echo(TextProvider::Anthropic)))
            .with_text_model(Arc::new(Echo(TextProvider::Gemini)))
            .with_image_model(Arc::new(Pixel))
    }

    #[tokio::test]
    async fn routes_by_model_family() {
        let d = dispatcher();
        assert_eq!(
            d.dispatch(chat("claude-sonnet-4-20250514")).await.unwrap(),
            Reply::Text("anthropic:1".to_string())
        );
        assert_eq!(
            d.dispatch(chat("gemini-1.5-pro-002")).await.unwrap(),
            Reply::Text("gemini:1".to_string())
        );
        assert!(matches!(
            d.dispatch(image(IMAGE_ENDPOINT_FLUX_PRO)).await.unwrap(),
            Reply::Image(_)
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_and_cross_family_models() {
        let d = dispatcher();
        assert!(matches!(
            d.dispatch(chat("gpt-4o")).await,
            Err(Error::Provider(_))
        ));
        assert!(matches!(
            d.dispatch(chat(IMAGE_ENDPOINT_FLUX_PRO)).await,
            Err(Error::Provider(_))
        ));
        assert!(matches!(
            d.dispatch(image("claude-sonnet-4-20250514")).await,
            Err(Error::Provider(_))
        ));
    }

    #[tokio::test]
    async fn missing_provider_is_a_provider_error() {
        let d = Dispatcher::new(Catalog::builtin(), Duration::from_secs(1))
            .with_text_model(Arc::new(Echo(TextProvider::Anthropic)));
        let err = d.dispatch(chat("gemini-1.5-pro-002")).await.unwrap_err();
        assert!(err.to_string().contains("gemini"));
        assert!(d.dispatch(image(IMAGE_ENDPOINT_FLUX_PRO)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let d = Dispatcher::new(Catalog::builtin(), Duration::from_secs(1))
            .with_text_model(Arc::new(Slow));
        let err = d
            .dispatch(chat("claude-sonnet-4-20250514"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
