//! Current-user session
//!
//! Holds the signed-in user's email. Operations that need a user ask
//! [`Session::require_user`], which raises `AuthenticationRequired` on the
//! event bus before failing so the UI can prompt for sign-in.

use chrono::Utc;
use sfr_common::events::{EngineEvent, EventBus};
use sfr_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Shared handle on the signed-in user
#[derive(Clone)]
pub struct Session {
    user: Arc<RwLock<Option<String>>>,
    event_bus: EventBus,
}

impl Session {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            user: Arc::new(RwLock::new(None)),
            event_bus,
        }
    }

    /// Sign in as `email`
    pub async fn sign_in(&self, email: &str) -> Result<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::InvalidInput("email must not be empty".to_string()));
        }
        info!(user = email, "Signed in");
        *self.user.write().await = Some(email.to_string());
        Ok(())
    }

    pub async fn sign_out(&self) {
        if let Some(user) = self.user.write().await.take() {
            info!(user = %user, "Signed out");
        }
    }

    pub async fn current_user(&self) -> Option<String> {
        self.user.read().await.clone()
    }

    /// Current user, or `Unauthenticated` for `action`
    pub async fn require_user(&self, action: &str) -> Result<String> {
        match self.current_user().await {
            Some(user) => Ok(user),
            None => {
                debug!(action, "Action requires a signed-in user");
                self.event_bus.emit_lossy(EngineEvent::AuthenticationRequired {
                    action: action.to_string(),
                    timestamp: Utc::now(),
                });
                Err(Error::Unauthenticated(action.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_require_user_without_sign_in() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let session = Session::new(bus);

        let err = session.require_user("toggle bookmark").await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));

        match rx.try_recv().unwrap() {
            EngineEvent::AuthenticationRequired { action, .. } => {
                assert_eq!(action, "toggle bookmark")
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let session = Session::new(EventBus::new(8));
        assert!(session.sign_in("   ").await.is_err());

        session.sign_in(" gator@ufl.edu ").await.unwrap();
        assert_eq!(session.require_user("x").await.unwrap(), "gator@ufl.edu");

        session.sign_out().await;
        assert_eq!(session.current_user().await, None);
    }
}
