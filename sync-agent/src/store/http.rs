//! Plain HTTP object endpoint.
//!
//! Objects live at `{endpoint}/{bucket}/{key}`; `PUT`, `GET`, `DELETE` and
//! `HEAD` map directly onto the store operations. Every key segment is
//! percent-encoded, so `#`, `?` and `%` in file names stay part of the path.
//! The `ETag` response header is the freshness token.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode, Url};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{validate_key, ObjectStore, StoreError, StoredObject};

pub struct HttpStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpStore {
    pub fn new(endpoint: &str, bucket: &str, token: Option<String>) -> Result<Self, StoreError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(StoreError::Unavailable("remote.endpoint is empty".to_string()));
        }
        let mut base_url = Url::parse(endpoint).map_err(|e| {
            StoreError::Unavailable(format!("invalid remote.endpoint {}: {}", endpoint, e))
        })?;
        base_url.set_query(None);
        base_url.set_fragment(None);
        push_segments(&mut base_url, bucket.trim())?;

        Ok(Self {
            client: Client::builder().build()?,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, key: &str) -> Result<Url, StoreError> {
        validate_key(key)?;
        let mut url = self.base_url.clone();
        push_segments(&mut url, key)?;
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Append the non-empty `/`-separated parts of `path` as encoded segments.
fn push_segments(url: &mut Url, path: &str) -> Result<(), StoreError> {
    let display = url.to_string();
    let mut segments = url
        .path_segments_mut()
        .map_err(|_| StoreError::Unavailable(format!("{} cannot carry object keys", display)))?;
    segments
        .pop_if_empty()
        .extend(path.split('/').filter(|seg| !seg.is_empty()));
    Ok(())
}

fn unexpected(status: StatusCode, key: &str) -> StoreError {
    StoreError::Status {
        status: status.as_u16(),
        key: key.to_string(),
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        let url = self.url(key)?;
        let resp = self
            .request(reqwest::Method::PUT, url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!("PUT {} -> {}", key, resp.status());
            Ok(())
        } else {
            Err(unexpected(resp.status(), key))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let url = self.url(key)?;
        let resp = self
            .request(reqwest::Method::GET, url)
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let freshness = resp
                    .headers()
                    .get(header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = resp.bytes().await?;
                Ok(Some(StoredObject { body, freshness }))
            }
            status => Err(unexpected(status, key)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let url = self.url(key)?;
        let resp = self.request(reqwest::Method::DELETE, url).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(unexpected(status, key)),
        }
    }

    async fn stat(&self, key: &str) -> Result<bool, StoreError> {
        let url = self.url(key)?;
        let resp = self.request(reqwest::Method::HEAD, url).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(unexpected(status, key)),
        }
    }

    /// Stream the file as the request body instead of buffering it.
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let url = self.url(key)?;
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let resp = self
            .request(reqwest::Method::PUT, url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!("PUT {} ({} bytes, streamed) -> {}", key, size, resp.status());
            Ok(())
        } else {
            Err(unexpected(resp.status(), key))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{Method, Uri},
        Router,
    };
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    type Requests = Arc<Mutex<Vec<(Method, String, Bytes)>>>;

    /// Local endpoint that records every request and answers 200.
    async fn recording_server() -> (String, Requests) {
        async fn record(
            State(requests): State<Requests>,
            method: Method,
            uri: Uri,
            body: Bytes,
        ) -> StatusCode {
            requests.lock().unwrap().push((method, uri.to_string(), body));
            StatusCode::OK
        }

        let requests = Requests::default();
        let app = Router::new().fallback(record).with_state(requests.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), requests)
    }

    #[test]
    fn test_url_building() {
        let store = HttpStore::new("https://objects.example.com/", "/media/", None).unwrap();
        assert_eq!(
            store.url("__sync/lock.json").unwrap().as_str(),
            "https://objects.example.com/media/__sync/lock.json"
        );
        assert!(store.url("../x").is_err());

        let store = HttpStore::new("https://objects.example.com/api/", "", None).unwrap();
        assert_eq!(store.url("a.jpg").unwrap().as_str(), "https://objects.example.com/api/a.jpg");
    }

    #[test]
    fn test_url_keeps_special_characters_in_path() {
        let store = HttpStore::new("https://objects.example.com", "media", None).unwrap();

        let url = store.url("images/a#b.jpg").unwrap();
        assert_eq!(url.path(), "/media/images/a%23b.jpg");
        assert_eq!(url.fragment(), None);

        let url = store.url("images/x?y.jpg").unwrap();
        assert_eq!(url.path(), "/media/images/x%3Fy.jpg");
        assert_eq!(url.query(), None);

        let url = store.url("images/100% off.jpg").unwrap();
        assert_eq!(url.path(), "/media/images/100%25%20off.jpg");

        // Distinct keys never collapse onto the same object
        assert_ne!(store.url("images/a#b.jpg").unwrap(), store.url("images/a").unwrap());
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        assert!(matches!(
            HttpStore::new("  ", "media", None),
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            HttpStore::new("not a url", "media", None),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_targets_the_exact_key() -> Result<(), StoreError> {
        let (endpoint, requests) = recording_server().await;
        let store = HttpStore::new(&endpoint, "media", None)?;

        store.delete("images/a#b.jpg").await?;
        store.delete("images/x?y.jpg").await?;

        let paths: Vec<_> = requests
            .lock()
            .unwrap()
            .iter()
            .map(|(method, path, _)| (method.clone(), path.clone()))
            .collect();
        assert_eq!(
            paths,
            vec![
                (Method::DELETE, "/media/images/a%23b.jpg".to_string()),
                (Method::DELETE, "/media/images/x%3Fy.jpg".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_put_file_streams_body() -> Result<(), StoreError> {
        let (endpoint, requests) = recording_server().await;
        let store = HttpStore::new(&endpoint, "media", Some("secret".to_string()))?;

        let dir = TempDir::new()?;
        let file = dir.path().join("big.bin");
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&file, &body)?;

        store.put_file("images/big file.bin", &file).await?;

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (method, path, received) = &requests[0];
        assert_eq!(*method, Method::PUT);
        assert_eq!(path, "/media/images/big%20file.bin");
        assert_eq!(&received[..], &body[..]);
        Ok(())
    }

    #[tokio::test]
    async fn test_put_file_missing_source_sends_nothing() {
        let (endpoint, requests) = recording_server().await;
        let store = HttpStore::new(&endpoint, "media", None).unwrap();

        let result = store.put_file("images/a.jpg", Path::new("/definitely/not/here.jpg")).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(requests.lock().unwrap().is_empty());
    }
}
