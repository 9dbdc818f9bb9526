use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use stream_session::{Collection, ModelInfo};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend is unavailable")]
    Unavailable,

    #[error("backend returned {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackendError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}

/// Client for the catalog endpoints next to the streaming endpoint.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: reqwest::Client,
    api_url: String,
}

impl BackendClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::from_reqwest)?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// `GET <api>/collections`: products and their versions, in display order.
    pub async fn collections(&self) -> Result<Vec<Collection>, BackendError> {
        self.get_json("collections").await
    }

    /// `GET <api>/llms`: models that can answer.
    pub async fn models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        self.get_json("llms").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let url = format!("{}/{path}", self.api_url);
        debug!(%url, "fetching");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Status { status, url });
        }
        resp.json::<T>().await.map_err(BackendError::from_reqwest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spawn a catalog server on an ephemeral port.
    /// Returns its `/api` base URL and a shutdown handle.
    async fn spawn_catalog_server() -> (String, tokio::sync::oneshot::Sender<()>) {
        use axum::{Json, Router, http::StatusCode, routing::get};

        let app = Router::new()
            .route(
                "/api/collections",
                get(|| async {
                    Json(serde_json::json!([
                        {
                            "collection_base_name": "ocp",
                            "collection_full_name": "OpenShift Container Platform",
                            "versions": [{"version_number": "4.16"}, {"version_number": "4.15"}],
                            "language": "en"
                        },
                        {
                            "collection_base_name": "rhel",
                            "collection_full_name": "Red Hat Enterprise Linux",
                            "versions": [{"version_number": "9"}],
                            "language": "en"
                        }
                    ]))
                }),
            )
            .route(
                "/api/llms",
                get(|| async {
                    Json(serde_json::json!([
                        {"name": "granite", "url": "http://granite/v1", "max_tokens": 512},
                        {"name": "mistral"}
                    ]))
                }),
            )
            .route(
                "/broken/collections",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });
        (format!("http://127.0.0.1:{port}/api"), tx)
    }

    // -- BackendError display --

    #[test]
    fn unavailable_display() {
        assert_eq!(
            BackendError::Unavailable.to_string(),
            "backend is unavailable"
        );
    }

    #[test]
    fn other_display_is_transparent() {
        let err: BackendError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, BackendError::Other(_)));
        assert_eq!(err.to_string(), "boom");
    }

    // -- BackendClient --

    #[tokio::test]
    async fn fetches_collections_in_order() {
        let (api, _shutdown) = spawn_catalog_server().await;
        let client = BackendClient::new(&api, Duration::from_secs(5)).unwrap();

        let collections = client.collections().await.unwrap();

        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].collection_base_name, "ocp");
        assert_eq!(collections[0].first_version(), Some("4.16"));
        assert_eq!(collections[1].collection_full_name, "Red Hat Enterprise Linux");
    }

    #[tokio::test]
    async fn fetches_models_ignoring_extra_fields() {
        let (api, _shutdown) = spawn_catalog_server().await;
        let client = BackendClient::new(&format!("{api}/"), Duration::from_secs(5)).unwrap();

        let models = client.models().await.unwrap();

        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["granite", "mistral"]);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (api, _shutdown) = spawn_catalog_server().await;
        let broken = api.replace("/api", "/broken");
        let client = BackendClient::new(&broken, Duration::from_secs(5)).unwrap();

        let err = client.collections().await.unwrap_err();

        assert!(matches!(
            err,
            BackendError::Status { status, .. } if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn missing_route_is_a_status_error() {
        let (api, _shutdown) = spawn_catalog_server().await;
        let broken = api.replace("/api", "/broken");
        let client = BackendClient::new(&broken, Duration::from_secs(5)).unwrap();
        let err = client.models().await.unwrap_err();
        assert!(matches!(err, BackendError::Status { .. }));
    }

    #[tokio::test]
    async fn connect_error_yields_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client =
            BackendClient::new(&format!("http://127.0.0.1:{port}/api"), Duration::from_secs(5))
                .unwrap();
        assert!(matches!(
            client.collections().await,
            Err(BackendError::Unavailable)
        ));
    }
}
