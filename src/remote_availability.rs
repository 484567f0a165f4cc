//! `AvailabilityService` over the JSON API of a remote availability service.

use crate::{
    backend::AvailabilityService,
    error::{CoreError, Result, ValidationError},
    types::{
        Appointment, AvailabilitySlot, LocationId, ProviderId, ScheduleTemplate, TimeOffRequest,
    },
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RemoteAvailability {
    client: Client,
    base_url: String,
}

/// Record a request is about, reported when the service answers 404.
type Subject = (&'static str, Uuid);

#[derive(Debug, Deserialize)]
struct LocationRecord {
    #[serde(default)]
    chairs: Option<u32>,
}

impl RemoteAvailability {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CoreError::Network(format!("Failed to create HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, subject: Subject) -> Result<String> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(%status, kind = subject.0, id = %subject.1, "Availability service answered");

        match status {
            status if status.is_success() => Ok(body),
            StatusCode::NOT_FOUND => Err(CoreError::not_found(subject.0, subject.1)),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(ValidationError::Rejected(body.trim().to_string()).into())
            }
            status => {
                error!(%status, body = body.trim(), "Availability service failed");
                Err(CoreError::Network(format!("{status}: {}", body.trim())))
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, subject: Subject) -> Result<T> {
        let body = self.send(self.client.get(self.url(path)), subject).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl AvailabilityService for RemoteAvailability {
    async fn weekly_slots(&self, provider_id: ProviderId) -> Result<Vec<AvailabilitySlot>> {
        self.get(&format!("providers/{provider_id}/slots"), ("provider", provider_id))
            .await
    }

    async fn location_slots(&self, location_id: LocationId) -> Result<Vec<AvailabilitySlot>> {
        self.get(&format!("locations/{location_id}/slots"), ("location", location_id))
            .await
    }

    async fn location_capacity(&self, location_id: LocationId) -> Result<Option<u32>> {
        match self
            .get::<LocationRecord>(&format!("locations/{location_id}"), ("location", location_id))
            .await
        {
            Ok(location) => Ok(location.chairs),
            Err(CoreError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write_slot(&self, slot: AvailabilitySlot) -> Result<()> {
        let request = self.client.post(self.url("slots")).json(&slot);
        self.send(request, ("slot", slot.id)).await.map(drop)
    }

    async fn replace_weekly_slots(
        &self,
        provider_id: ProviderId,
        slots: Vec<AvailabilitySlot>,
    ) -> Result<()> {
        let request = self
            .client
            .put(self.url(&format!("providers/{provider_id}/slots")))
            .json(&slots);
        self.send(request, ("provider", provider_id)).await.map(drop)
    }

    async fn remove_slot(&self, slot_id: Uuid) -> Result<()> {
        let request = self.client.delete(self.url(&format!("slots/{slot_id}")));
        self.send(request, ("slot", slot_id)).await.map(drop)
    }

    async fn time_off_requests(&self, provider_id: Option<ProviderId>) -> Result<Vec<TimeOffRequest>> {
        let mut request = self.client.get(self.url("time-off"));
        if let Some(provider_id) = provider_id {
            request = request.query(&[("provider_id", provider_id)]);
        }
        let body = self
            .send(request, ("provider", provider_id.unwrap_or_default()))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn time_off_request(&self, id: Uuid) -> Result<TimeOffRequest> {
        self.get(&format!("time-off/{id}"), ("time-off request", id)).await
    }

    async fn write_time_off(&self, request: TimeOffRequest) -> Result<()> {
        let builder = self
            .client
            .put(self.url(&format!("time-off/{}", request.id)))
            .json(&request);
        self.send(builder, ("time-off request", request.id))
            .await
            .map(drop)
    }

    async fn templates(&self) -> Result<Vec<ScheduleTemplate>> {
        self.get("templates", ("template", Uuid::nil())).await
    }

    async fn template(&self, id: Uuid) -> Result<ScheduleTemplate> {
        self.get(&format!("templates/{id}"), ("template", id)).await
    }

    async fn appointments(&self, provider_id: ProviderId) -> Result<Vec<Appointment>> {
        self.get(
            &format!("providers/{provider_id}/appointments"),
            ("provider", provider_id),
        )
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::{date, time};
    use axum::{
        extract::Path,
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
    };
    use tokio::task::JoinHandle;

    type Written = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn stub_service() -> (JoinHandle<()>, SocketAddr, Written) {
        let written = Written::default();
        let provider_slots = |Path(provider): Path<Uuid>| async move {
            Json(vec![AvailabilitySlot::new(provider, Uuid::nil(), 1, time(9, 0), time(17, 0))])
        };
        let record = {
            let written = written.clone();
            move |Json(body): Json<serde_json::Value>| async move {
                written.lock().unwrap().push(body);
                StatusCode::CREATED
            }
        };
        let app = Router::new()
            .route("/providers/{id}/slots", get(provider_slots))
            .route("/slots", post(record))
            .route(
                "/locations/{id}",
                get(|Path(location): Path<Uuid>| async move {
                    if location.is_nil() {
                        Err(StatusCode::NOT_FOUND)
                    } else {
                        Ok(Json(serde_json::json!({ "id": location, "chairs": 3 })))
                    }
                }),
            )
            .route(
                "/time-off/{id}",
                get(|| async { StatusCode::NOT_FOUND })
                    .put(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "end before start") }),
            )
            .route("/templates", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }))
            .route(
                "/providers/{id}/appointments",
                get(|| async { "not json" }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (server, address, written)
    }

    fn remote(address: SocketAddr) -> RemoteAvailability {
        RemoteAvailability::new(&format!("http://{address}/"), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_reads_and_writes_wire_shape() {
        let (server, address, written) = stub_service().await;
        let remote = remote(address);
        let provider = Uuid::new_v4();

        let slots = remote.weekly_slots(provider).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].provider_id, provider);
        assert_eq!(slots[0].end_time, time(17, 0));

        remote
            .write_slot(AvailabilitySlot::new(provider, Uuid::nil(), 2, time(8, 30), time(12, 0)))
            .await
            .unwrap();
        let body = written.lock().unwrap()[0].clone();
        assert_eq!(body["start_time"], "08:30");
        assert_eq!(body["day_of_week"], 2);

        assert_eq!(remote.location_capacity(Uuid::new_v4()).await.unwrap(), Some(3));
        assert_eq!(remote.location_capacity(Uuid::nil()).await.unwrap(), None);

        server.abort();
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (server, address, _) = stub_service().await;
        let remote = remote(address);

        let missing = Uuid::new_v4();
        assert!(matches!(
            remote.time_off_request(missing).await,
            Err(CoreError::NotFound { id, .. }) if id == missing
        ));

        let request = TimeOffRequest::new(Uuid::new_v4(), "Jo", date(2026, 11, 2), date(2026, 11, 3), "Trip");
        let rejected = remote.write_time_off(request).await.unwrap_err();
        assert!(matches!(rejected, CoreError::Validation(ValidationError::Rejected(ref body)) if body == "end before start"));
        assert!(!rejected.is_retryable());

        let unavailable = remote.templates().await.unwrap_err();
        assert!(matches!(unavailable, CoreError::Network(_)));
        assert!(unavailable.is_retryable());

        assert!(matches!(
            remote.appointments(Uuid::new_v4()).await,
            Err(CoreError::Serialization(_))
        ));

        server.abort();
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let err = remote(address).weekly_slots(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_truncated_body_is_a_network_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 512\r\n\r\n[{\"id\"")
                .await
                .unwrap();
        });

        let err = remote(address).weekly_slots(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::Network(_)));
        assert!(err.is_retryable());

        server.abort();
    }
}
