//! Resolution of broker coordinates from the reporting service.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::reporting::{ReportingService, Setting};

const HOST_KEY: &str = "RABBITMQ_HOST";
const PORT_KEY: &str = "RABBITMQ_PORT";
const USER_KEY: &str = "RABBITMQ_USER";
const ENABLED_KEY: &str = "RABBITMQ_ENABLED";

/// Broker connection settings served by the reporting service.
///
/// Fields missing from the settings bundle stay unset. A missing enabled
/// flag means the broker is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerCoordinates {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub enabled: bool,
}

impl BrokerCoordinates {
    /// Extracts coordinates from a `{name, value}` settings list.
    ///
    /// Names are matched by containment, so prefixed keys such as
    /// `QA_RABBITMQ_HOST` are accepted. Unparsable ports are ignored.
    pub fn from_settings(settings: &[Setting]) -> Self {
        let mut coordinates = Self::default();
        for setting in settings {
            let Some(value) = setting.value.as_deref() else {
                continue;
            };
            if setting.name.contains(HOST_KEY) {
                coordinates.host = Some(value.to_string());
            } else if setting.name.contains(PORT_KEY) {
                coordinates.port = value.trim().parse().ok();
            } else if setting.name.contains(USER_KEY) {
                coordinates.user = Some(value.to_string());
            } else if setting.name.contains(ENABLED_KEY) {
                coordinates.enabled = parse_flag(value);
            }
        }
        coordinates
    }

    /// Returns a description of what is missing, or `None` if a connection
    /// can be attempted.
    pub fn missing(&self) -> Option<&'static str> {
        if self.host.is_none() {
            Some("host")
        } else if self.port.is_none() {
            Some("port")
        } else if self.user.is_none() {
            Some("user")
        } else {
            None
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Fetches [`BrokerCoordinates`] from the reporting service.
#[derive(Clone)]
pub struct CoordinateResolver {
    service: Arc<dyn ReportingService>,
    tool: String,
}

impl CoordinateResolver {
    pub fn new(service: Arc<dyn ReportingService>, tool: impl Into<String>) -> Self {
        Self {
            service,
            tool: tool.into(),
        }
    }

    /// Queries the settings bundle and parses it.
    ///
    /// Returns `None` when the service cannot be reached or answers with an
    /// error. Failures are logged, never propagated.
    pub async fn resolve(&self) -> Option<BrokerCoordinates> {
        match self.service.settings(&self.tool, true).await {
            Ok(settings) => {
                let coordinates = BrokerCoordinates::from_settings(&settings);
                debug!(
                    "[mq] resolved broker coordinates: host={:?} port={:?} enabled={}",
                    coordinates.host, coordinates.port, coordinates.enabled
                );
                if !coordinates.enabled {
                    info!("[mq] broker integration is disabled by the reporting service");
                }
                Some(coordinates)
            }
            Err(e) => {
                error!("[mq] unable to fetch broker settings: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::{ReportingError, ReportingResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticService {
        settings: Option<Vec<Setting>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReportingService for StaticService {
        async fn settings(&self, tool: &str, decrypt: bool) -> ReportingResult<Vec<Setting>> {
            assert_eq!(tool, "RABBITMQ");
            assert!(decrypt);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.settings.clone().ok_or(ReportingError::Status {
                status: 500,
                context: "test".to_string(),
            })
        }
    }

    fn full_settings() -> Vec<Setting> {
        vec![
            Setting::new("RABBITMQ_HOST", "mq.local"),
            Setting::new("RABBITMQ_PORT", "5672"),
            Setting::new("RABBITMQ_USER", "qa"),
            Setting::new("RABBITMQ_ENABLED", "true"),
        ]
    }

    #[test]
    fn test_from_settings_full() {
        let coordinates = BrokerCoordinates::from_settings(&full_settings());
        assert_eq!(
            coordinates,
            BrokerCoordinates {
                host: Some("mq.local".to_string()),
                port: Some(5672),
                user: Some("qa".to_string()),
                enabled: true,
            }
        );
        assert_eq!(coordinates.missing(), None);
    }

    #[test]
    fn test_missing_enabled_flag_means_disabled() {
        let settings: Vec<Setting> = full_settings().into_iter().take(3).collect();
        let coordinates = BrokerCoordinates::from_settings(&settings);
        assert!(!coordinates.enabled);
        assert_eq!(coordinates.host.as_deref(), Some("mq.local"));
    }

    #[test]
    fn test_missing_fields_stay_unset() {
        let coordinates =
            BrokerCoordinates::from_settings(&[Setting::new("RABBITMQ_PORT", "not-a-port")]);
        assert_eq!(coordinates.port, None);
        assert_eq!(coordinates.missing(), Some("host"));
    }

    #[test]
    fn test_flag_parsing() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let service = Arc::new(StaticService {
            settings: Some(full_settings()),
            calls: AtomicUsize::new(0),
        });
        let resolver = CoordinateResolver::new(service.clone(), "RABBITMQ");

        let coordinates = resolver.resolve().await.unwrap();
        assert!(coordinates.enabled);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_returns_none() {
        let service = Arc::new(StaticService {
            settings: None,
            calls: AtomicUsize::new(0),
        });
        let resolver = CoordinateResolver::new(service, "RABBITMQ");

        assert!(resolver.resolve().await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_over_http() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/settings/tool/RABBITMQ")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[{"name":"RABBITMQ_HOST","value":"mq"},{"name":"RABBITMQ_PORT","value":"5673"},{"name":"RABBITMQ_USER","value":"u"},{"name":"RABBITMQ_ENABLED","value":"true"}]"#,
            )
            .create_async()
            .await;

        let client = crate::reporting::HttpReportingClient::new(
            server.url(),
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        let resolver = CoordinateResolver::new(Arc::new(client), "RABBITMQ");

        let coordinates = resolver.resolve().await.unwrap();
        assert_eq!(coordinates.port, Some(5673));
        assert!(coordinates.enabled);
    }

    #[tokio::test]
    async fn test_resolve_over_http_unreachable() {
        // Nothing listens on port 9 on localhost in CI sandboxes
        let client = crate::reporting::HttpReportingClient::new(
            "http://127.0.0.1:9",
            std::time::Duration::from_secs(1),
        )
        .unwrap();
        let resolver = CoordinateResolver::new(Arc::new(client), "RABBITMQ");

        assert!(resolver.resolve().await.is_none());
    }
}
