//! HTTP page source.
//!
//! [`HttpPageFetcher`] issues `GET` requests built from a [`RequestTemplate`]
//! and decodes each JSON response through a [`ResponseShape`].

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::harvest::formats::ResponseShape;
use crate::model::{PageRequest, PageResult};
use crate::traits::{FetchError, PageFetcher};

/// How to address one page of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTemplate {
    pub url: String,
    /// Query parameter carrying the page number (default: `page`)
    pub page_param: String,
    /// Query parameter carrying the page size (default: `limit`)
    pub limit_param: String,
    /// Extra query pairs sent with every request
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl RequestTemplate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            page_param: "page".to_string(),
            limit_param: "limit".to_string(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_page_param(mut self, name: impl Into<String>) -> Self {
        self.page_param = name.into();
        self
    }

    pub fn with_limit_param(mut self, name: impl Into<String>) -> Self {
        self.limit_param = name.into();
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// [`PageFetcher`] over a JSON HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    template: RequestTemplate,
    shape: ResponseShape,
}

impl HttpPageFetcher {
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the HTTP client cannot be built.
    pub fn new(template: RequestTemplate) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self::with_client(client, template))
    }

    pub fn with_client(client: reqwest::Client, template: RequestTemplate) -> Self {
        Self {
            client,
            template,
            shape: ResponseShape::default(),
        }
    }

    pub fn with_shape(mut self, shape: ResponseShape) -> Self {
        self.shape = shape;
        self
    }
}

#[async_trait]
impl PageFetcher<Value> for HttpPageFetcher {
    async fn fetch(&self, request: PageRequest) -> Result<PageResult<Value>, FetchError> {
        let template = &self.template;
        let mut builder = self
            .client
            .get(&template.url)
            .query(&template.query)
            .query(&[
                (template.page_param.as_str(), request.page.to_string()),
                (template.limit_param.as_str(), request.limit.to_string()),
            ]);
        for (name, value) in &template.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        let page = self.shape.extract(payload)?;
        debug!(
            page = request.page,
            items = page.items.len(),
            total_pages = ?page.total_pages,
            "Decoded page response"
        );
        Ok(page)
    }
}
