use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Door;

/// Result of the best-effort open command sent to door hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// The controller acknowledged the command.
    Confirmed,
    /// The controller answered with a non-success status.
    Rejected,
    /// The controller could not be reached before the timeout.
    Unreachable,
    /// The door has no network endpoint configured.
    NoEndpoint,
    /// No controller is attached to the engine.
    NotAttempted,
}

/// Side-channel report of a door-open command, independent of the access decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorNotification {
    pub status: NotificationStatus,
    pub message: String,
}

impl DoorNotification {
    /// Creates a notification.
    pub fn new(status: NotificationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Returns true when the hardware confirmed the command.
    pub fn is_confirmed(&self) -> bool {
        self.status == NotificationStatus::Confirmed
    }
}

/// Sends open commands to door controllers.
///
/// Implementations make a single attempt and never fail: every outcome is
/// reported through [`DoorNotification`]. The engine only calls this for doors
/// that have an endpoint, after the access log entry has been persisted.
#[async_trait]
pub trait DoorController: Send + Sync {
    /// Asks the door's controller to unlock.
    async fn open(&self, door: &Door) -> DoorNotification;
}

#[async_trait]
impl<T> DoorController for Arc<T>
where
    T: DoorController + ?Sized,
{
    async fn open(&self, door: &Door) -> DoorNotification {
        (**self).open(door).await
    }
}

/// Controller that never contacts hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoController;

#[async_trait]
impl DoorController for NoController {
    async fn open(&self, door: &Door) -> DoorNotification {
        DoorNotification::new(
            NotificationStatus::NotAttempted,
            format!("Door {} open command logged", door.name),
        )
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpDoorController;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use tracing::{info, warn};

    use super::{DoorController, DoorNotification, NotificationStatus};
    use crate::config::DEFAULT_DOOR_TIMEOUT;
    use crate::error::{Error, Result};
    use crate::model::Door;

    /// Controller that POSTs to `http://<ip>:<port><unlock_path>`.
    #[derive(Debug, Clone)]
    pub struct HttpDoorController {
        client: reqwest::Client,
        unlock_path: String,
    }

    impl HttpDoorController {
        /// Creates a controller with the given timeout and unlock path.
        ///
        /// # Errors
        ///
        /// Returns `Error::InvalidConfig` if the HTTP client cannot be built.
        pub fn new(timeout: Duration, unlock_path: impl Into<String>) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| Error::InvalidConfig(format!("door http client: {err}")))?;
            let mut unlock_path = unlock_path.into();
            if !unlock_path.starts_with('/') {
                unlock_path.insert(0, '/');
            }
            Ok(Self {
                client,
                unlock_path,
            })
        }

        /// Creates a controller with a five second timeout and `/unlock` path.
        ///
        /// # Errors
        ///
        /// Returns `Error::InvalidConfig` if the HTTP client cannot be built.
        pub fn with_defaults() -> Result<Self> {
            Self::new(DEFAULT_DOOR_TIMEOUT, "/unlock")
        }
    }

    #[async_trait]
    impl DoorController for HttpDoorController {
        async fn open(&self, door: &Door) -> DoorNotification {
            let Some((host, port)) = door.endpoint() else {
                return DoorNotification::new(
                    NotificationStatus::NoEndpoint,
                    format!("Door {} open command logged", door.name),
                );
            };
            let url = format!("http://{host}:{port}{}", self.unlock_path);
            match self.client.post(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(door = %door.id, "door opened");
                    DoorNotification::new(
                        NotificationStatus::Confirmed,
                        format!("Door {} opened", door.name),
                    )
                }
                Ok(response) => {
                    warn!(
                        door = %door.id,
                        status = %response.status(),
                        "door controller rejected open"
                    );
                    DoorNotification::new(
                        NotificationStatus::Rejected,
                        format!(
                            "Command sent to {} (controller returned {})",
                            door.name,
                            response.status()
                        ),
                    )
                }
                Err(err) => {
                    warn!(door = %door.id, error = %err, "could not reach door controller");
                    DoorNotification::new(
                        NotificationStatus::Unreachable,
                        format!(
                            "Door {} open command logged (controller unreachable)",
                            door.name
                        ),
                    )
                }
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn no_controller_should_report_not_attempted() {
        let door: Door = serde_json::from_str(
            r#"{"id":"door_1","name":"Lobby","group_id":"grp_1","ip_address":"10.0.0.2"}"#,
        )
        .unwrap();
        let notification = block_on(NoController.open(&door));
        assert_eq!(notification.status, NotificationStatus::NotAttempted);
        assert!(!notification.is_confirmed());
        assert!(notification.message.contains("Lobby"));
    }
}
