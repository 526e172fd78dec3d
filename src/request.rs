use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::body::MultipartForm;
use crate::client::TransportClient;
use crate::descriptor::{RequestDescriptor, RequestDescriptorBuilder};
use crate::error::{ApiError, ConfigError};
use crate::retry::RetryPolicy;
use crate::transport::UploadProgress;

/// Builder returned by the client's verb helpers; `send` runs the call.
#[must_use = "requests do nothing until `send` is awaited"]
pub struct RequestBuilder<'a> {
    client: &'a TransportClient,
    descriptor: RequestDescriptorBuilder,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a TransportClient, descriptor: RequestDescriptorBuilder) -> Self {
        Self { client, descriptor }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.descriptor = self.descriptor.param(name, value);
        self
    }

    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.descriptor = self.descriptor.params(params);
        self
    }

    pub fn params_from<T>(mut self, params: &T) -> Result<Self, ConfigError>
    where
        T: Serialize + ?Sized,
    {
        self.descriptor = self.descriptor.params_from(params)?;
        Ok(self)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.descriptor = self.descriptor.json(body);
        self
    }

    pub fn json_from<T>(mut self, body: &T) -> Result<Self, ConfigError>
    where
        T: Serialize + ?Sized,
    {
        self.descriptor = self.descriptor.json_from(body)?;
        Ok(self)
    }

    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.descriptor = self.descriptor.multipart(form);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.descriptor = self.descriptor.header(name, value);
        self
    }

    pub fn try_header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        self.descriptor = self.descriptor.try_header(name, value)?;
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.descriptor = self.descriptor.timeout(timeout);
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.descriptor = self.descriptor.retry_policy(retry_policy);
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        self.descriptor = self.descriptor.on_progress(callback);
        self
    }

    /// Freezes the builder without sending, e.g. to look up its fingerprint.
    pub fn descriptor(self) -> RequestDescriptor {
        self.descriptor.build()
    }

    pub async fn send<T>(self) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let descriptor = self.descriptor.build();
        self.client.execute(descriptor).await
    }
}
