use crate::config::AppConfig;
use crate::error::AppError;
use push_agent::target::LocalDirTarget;
use std::time::Instant;
use tokio::sync::Mutex;

/// The push currently allowed to write into staging.
#[derive(Debug)]
pub struct Session {
    pub push_id: String,
    last_seen: Instant,
}

pub struct AppState {
    pub config: AppConfig,
    pub staging: LocalDirTarget,
    session: Mutex<Option<Session>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let staging = LocalDirTarget::new(config.staging_dir.clone());
        Self {
            config,
            staging,
            session: Mutex::new(None),
        }
    }

    /// Claim staging for `push_id`.
    ///
    /// Re-opening with the held id succeeds so an agent can retry a lost
    /// response. A session idle for longer than the configured TTL is taken
    /// over, since its agent is gone.
    pub async fn open_session(&self, push_id: &str) -> Result<(), AppError> {
        let mut session = self.session.lock().await;

        if let Some(active) = session.as_mut() {
            if active.push_id == push_id {
                active.last_seen = Instant::now();
                return Ok(());
            }

            let idle = active.last_seen.elapsed();
            if idle < self.config.session_ttl {
                return Err(AppError::SessionConflict(format!(
                    "push {} holds the session (idle {}s)",
                    active.push_id,
                    idle.as_secs()
                )));
            }
            tracing::warn!(
                push_id = %push_id,
                abandoned = %active.push_id,
                idle_secs = idle.as_secs(),
                "Taking over idle push session"
            );
        }

        *session = Some(Session {
            push_id: push_id.to_string(),
            last_seen: Instant::now(),
        });
        tracing::info!(push_id = %push_id, "Push session opened");
        Ok(())
    }

    pub async fn close_session(&self, push_id: &str) -> Result<(), AppError> {
        let mut session = self.session.lock().await;

        match session.as_ref() {
            Some(active) if active.push_id == push_id => {
                *session = None;
                tracing::info!(push_id = %push_id, "Push session closed");
                Ok(())
            }
            Some(active) => Err(AppError::SessionConflict(format!(
                "push {} cannot close the session held by {}",
                push_id, active.push_id
            ))),
            None => Err(AppError::NoSession(push_id.to_string())),
        }
    }

    /// Fail unless `push_id` holds the session; counts as activity.
    pub async fn require_session(&self, push_id: &str) -> Result<(), AppError> {
        match self.session.lock().await.as_mut() {
            Some(active) if active.push_id == push_id => {
                active.last_seen = Instant::now();
                Ok(())
            }
            Some(active) => Err(AppError::SessionConflict(format!(
                "push {} does not hold the session (held by {})",
                push_id, active.push_id
            ))),
            None => Err(AppError::SessionConflict(format!(
                "push {} has no open session",
                push_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn state(session_ttl: Duration) -> AppState {
        AppState::new(AppConfig {
            port: 0,
            staging_dir: PathBuf::from("./staging"),
            log_level: "debug".to_string(),
            max_upload_bytes: 1024,
            session_ttl,
        })
    }

    #[tokio::test]
    async fn test_busy_session_conflicts() {
        let state = state(Duration::from_secs(60));
        state.open_session("push-a").await.unwrap();
        state.open_session("push-a").await.unwrap();

        assert!(matches!(
            state.open_session("push-b").await,
            Err(AppError::SessionConflict(_))
        ));
        assert!(state.require_session("push-a").await.is_ok());

        state.close_session("push-a").await.unwrap();
        assert!(matches!(
            state.close_session("push-a").await,
            Err(AppError::NoSession(_))
        ));
        state.open_session("push-b").await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_session_taken_over() {
        let state = state(Duration::from_millis(20));
        state.open_session("push-a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        state.open_session("push-b").await.unwrap();
        assert!(matches!(
            state.require_session("push-a").await,
            Err(AppError::SessionConflict(_))
        ));
        assert!(state.require_session("push-b").await.is_ok());
    }
}
