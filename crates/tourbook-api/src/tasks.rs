//! Background maintenance jobs, run under
//! [`FatalFaults::spawn_supervised`](crate::boundary::FatalFaults::spawn_supervised).

use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::error::AppError;
use crate::state::AppState;

/// How often expired password-reset tokens are cleared.
pub const RESET_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Clear expired reset tokens forever, one pass per `period`.
///
/// Returns only when a pass fails to persist, which the supervisor treats
/// as fatal.
pub async fn sweep_reset_tokens(state: AppState, period: Duration) -> Result<(), AppError> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep_once(&state).await?;
    }
}

/// One sweep pass. Returns how many users were touched.
pub async fn sweep_once(state: &AppState) -> Result<usize, AppError> {
    let cleared = state.clear_expired_resets(Utc::now());
    for user in &cleared {
        state.persist(user).await?;
    }
    if !cleared.is_empty() {
        tracing::debug!(count = cleared.len(), "cleared expired password reset tokens");
    }
    Ok(cleared.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, Environment};
    use tourbook_core::UserRecord;

    #[tokio::test]
    async fn sweep_clears_only_expired_tokens() {
        let state = AppState::new(AppConfig::new(
            Environment::Development,
            "tasks-tests-secret-with-at-least-32-bytes",
        ));
        let mut stale = UserRecord::new("Old", "old@example.com", None, "pass1234").unwrap();
        stale.create_password_reset_token(Utc::now() - chrono::Duration::minutes(30));
        let mut fresh = UserRecord::new("New", "new@example.com", None, "pass1234").unwrap();
        fresh.create_password_reset_token(Utc::now());
        let stale = state.insert_user(stale).unwrap();
        let fresh = state.insert_user(fresh).unwrap();

        assert_eq!(sweep_once(&state).await.unwrap(), 1);
        assert!(state.users.get(&stale.id).unwrap().password_reset_digest.is_none());
        assert!(state.users.get(&fresh.id).unwrap().password_reset_digest.is_some());
        assert_eq!(sweep_once(&state).await.unwrap(), 0);
    }
}
