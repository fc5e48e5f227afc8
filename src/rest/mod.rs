//! HTTP implementation of [`Backend`] for the storage-orchestration API.
//!
//! Every resource path is served under `/api/1.1`. Mutations carry a fresh
//! `X-Request-ID` so the API can deduplicate retried submissions.

mod request;

use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{Backend, BackendError, BackendFuture, Operation, ResourcePayload};
use crate::config::ProviderConfig;
use crate::descriptor::DeleteOptions;
use crate::state::FieldMap;

use request::RawResponse;

const API_PREFIX: &str = "/api/1.1";
const REQUEST_ID_HEADER: &str = "X-Request-ID";

#[derive(Deserialize)]
struct ListBody {
    #[serde(default)]
    items: Vec<ResourcePayload>,
}

/// Backend speaking JSON over HTTP.
#[derive(Clone, Debug)]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl RestBackend {
    /// Builds a backend from provider configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: &ProviderConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| BackendError::Transport {
                message: err.to_string(),
            })?;
        Ok(Self::with_client(
            client,
            config.base_url(),
            config.access_token.clone(),
        ))
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            access_token,
        }
    }

    /// Joins `path` onto the API root, percent-encoding each segment so a
    /// name can never change the request target.
    fn url(&self, path: &str) -> Result<Url, BackendError> {
        let invalid_host = |reason: String| BackendError::Transport {
            message: format!("invalid API host '{}': {reason}", self.base_url),
        };
        let mut url = Url::parse(&self.base_url).map_err(|err| invalid_host(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid_host(String::from("cannot carry a path")))?
            .pop_if_empty()
            .extend(
                API_PREFIX
                    .split('/')
                    .chain(path.split('/'))
                    .filter(|segment| !segment.is_empty()),
            );
        Ok(url)
    }

    fn authorised(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn mutation(&self, builder: RequestBuilder) -> RequestBuilder {
        self.authorised(builder)
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
    }

    async fn get(&self, path: &str) -> Result<RawResponse, BackendError> {
        debug!(path, "GET");
        request::send(self.authorised(self.client.get(self.url(path)?))).await
    }

    async fn fetch(&self, path: &str) -> Result<Option<ResourcePayload>, BackendError> {
        let response = self.get(path).await?;
        if response.is_not_found() {
            return Ok(None);
        }
        response.json(path).map(Some)
    }

    async fn fetch_list(&self, collection: &str) -> Result<Vec<ResourcePayload>, BackendError> {
        let body: ListBody = self.get(collection).await?.json(collection)?;
        Ok(body.items)
    }

    async fn fetch_operation(&self, path: &str) -> Result<Operation, BackendError> {
        self.get(path).await?.json(path)
    }

    async fn submit_create(
        &self,
        collection: &str,
        body: &FieldMap,
    ) -> Result<Operation, BackendError> {
        debug!(path = collection, "POST");
        let builder = self.mutation(self.client.post(self.url(collection)?)).json(body);
        request::send(builder).await?.json(collection)
    }

    async fn submit_update(
        &self,
        path: &str,
        patch: &FieldMap,
    ) -> Result<Operation, BackendError> {
        debug!(path, "PATCH");
        let builder = self.mutation(self.client.patch(self.url(path)?)).json(patch);
        request::send(builder).await?.json(path)
    }

    async fn submit_delete(
        &self,
        path: &str,
        options: &DeleteOptions,
    ) -> Result<Operation, BackendError> {
        let flags = options
            .iter()
            .map(|flag| (flag.query_key(), "true"))
            .collect::<Vec<_>>();
        debug!(path, flags = ?flags, "DELETE");
        let builder = self
            .mutation(self.client.delete(self.url(path)?))
            .query(&flags);
        request::send(builder).await?.json(path)
    }
}

impl Backend for RestBackend {
    fn read<'a>(
        &'a self,
        path: &'a str,
    ) -> BackendFuture<'a, Option<ResourcePayload>, BackendError> {
        Box::pin(self.fetch(path))
    }

    fn read_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> BackendFuture<'a, Option<ResourcePayload>, BackendError> {
        Box::pin(async move { self.fetch(&format!("/resources/{id}")).await })
    }

    fn list<'a>(
        &'a self,
        collection: &'a str,
    ) -> BackendFuture<'a, Vec<ResourcePayload>, BackendError> {
        Box::pin(self.fetch_list(collection))
    }

    fn create<'a>(
        &'a self,
        collection: &'a str,
        body: &'a FieldMap,
    ) -> BackendFuture<'a, Operation, BackendError> {
        Box::pin(self.submit_create(collection, body))
    }

    fn update<'a>(
        &'a self,
        path: &'a str,
        patch: &'a FieldMap,
    ) -> BackendFuture<'a, Operation, BackendError> {
        Box::pin(self.submit_update(path, patch))
    }

    fn delete<'a>(
        &'a self,
        path: &'a str,
        options: &'a DeleteOptions,
    ) -> BackendFuture<'a, Operation, BackendError> {
        Box::pin(self.submit_delete(path, options))
    }

    fn operation<'a>(&'a self, id: &'a str) -> BackendFuture<'a, Operation, BackendError> {
        Box::pin(async move { self.fetch_operation(&format!("/operations/{id}")).await })
    }
}
