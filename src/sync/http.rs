use reqwest::{Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Record, Source, SyncError};
use crate::constants::MAX_LIMIT;
use crate::models::{LoginPayload, PublicUser, RegisterPayload};

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SyncError::Decode(e.to_string())
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

/// Cookie-carrying client for the finance server.
#[derive(Clone)]
pub struct ApiClient {
    base_url: Arc<str>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            base_url: Arc::from(base_url.trim_end_matches('/')),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<PublicUser, SyncError> {
        let payload = RegisterPayload {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.send(Method::POST, "/auth/register", Some(&payload)).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<PublicUser, SyncError> {
        let payload = LoginPayload {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.send(Method::POST, "/auth/login", Some(&payload)).await
    }

    pub async fn logout(&self) -> Result<(), SyncError> {
        self.send_empty(Method::POST, "/auth/logout").await
    }

    pub async fn me(&self) -> Result<PublicUser, SyncError> {
        self.send::<(), _>(Method::GET, "/auth/me", None).await
    }

    pub fn source<T: Record>(&self) -> HttpSource<T> {
        HttpSource {
            client: self.clone(),
            page_size: MAX_LIMIT,
            _record: PhantomData,
        }
    }

    async fn request<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, SyncError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        tracing::debug!(%url, status = status.as_u16(), %message, "request rejected");
        Err(match status {
            StatusCode::UNAUTHORIZED => SyncError::Unauthenticated,
            StatusCode::NOT_FOUND => SyncError::NotFound(message),
            _ => SyncError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn send<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R, SyncError> {
        Ok(self.request(method, path, body).await?.json().await?)
    }

    async fn send_empty(&self, method: Method, path: &str) -> Result<(), SyncError> {
        self.request::<()>(method, path, None).await?;
        Ok(())
    }
}

/// [`Source`] backed by the server's REST routes for `T`.
pub struct HttpSource<T> {
    client: ApiClient,
    page_size: u32,
    _record: PhantomData<fn() -> T>,
}

impl<T> HttpSource<T> {
    /// Rows requested per page on paged routes, clamped to `1..=MAX_LIMIT`.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_LIMIT);
        self
    }
}

impl<T: Record> Source<T> for HttpSource<T> {
    async fn fetch_all(&self) -> Result<Vec<T>, SyncError> {
        let mut items: Vec<T> = Vec::new();
        loop {
            let offset = u32::try_from(items.len()).unwrap_or(u32::MAX);
            let body: serde_json::Value = self
                .client
                .send::<(), _>(Method::GET, &T::list_path(offset, self.page_size), None)
                .await?;
            let (page, total) =
                T::decode_page(body).map_err(|e| SyncError::Decode(e.to_string()))?;
            let page_len = page.len();
            items.extend(page);

            match total {
                Some(total) if page_len > 0 && (items.len() as u64) < u64::from(total) => continue,
                _ => return Ok(items),
            }
        }
    }

    async fn create(&self, draft: &T::Draft) -> Result<T, SyncError> {
        self.client.send(Method::POST, T::PATH, Some(draft)).await
    }

    async fn update(&self, id: &str, patch: &T::Patch) -> Result<T, SyncError> {
        let path = format!("{}/{}", T::PATH, id);
        self.client.send(Method::PATCH, &path, Some(patch)).await
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        let path = format!("{}/{}", T::PATH, id);
        self.client.send_empty(Method::DELETE, &path).await
    }
}
