use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_LENGTH;
use std::path::Path;
use tokio_util::io::ReaderStream;

use crate::error::DeliveryError;

/// Hands a finished artifact to whoever transmits it to the submitter.
/// The caller deletes its local copy once this returns.
pub trait DeliverySink: Send + Sync {
    fn deliver<'a>(
        &'a self,
        target: &'a str,
        path: &'a Path,
        caption: &'a str,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Streams the artifact as the body of a `PUT` to the target URL.
#[derive(Debug, Clone, Default)]
pub struct HttpDelivery {
    client: reqwest::Client,
}

impl HttpDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    async fn upload(&self, target: &str, path: &Path, caption: &str) -> Result<(), DeliveryError> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        tracing::info!(url = target, bytes = length, "starting upload");

        self.client
            .put(target)
            .query(&[("caption", caption)])
            .header(CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

impl DeliverySink for HttpDelivery {
    fn deliver<'a>(
        &'a self,
        target: &'a str,
        path: &'a Path,
        caption: &'a str,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        self.upload(target, path, caption).boxed()
    }
}
