use async_trait::async_trait;
use tracing::info;

use crate::model::Ms;

#[derive(Debug)]
pub enum PresenterError {
    Api(String),
}

impl std::fmt::Display for PresenterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenterError::Api(e) => write!(f, "presence API error: {e}"),
        }
    }
}

impl std::error::Error for PresenterError {}

/// Presence indicator mutations. The busy state carries its own expiry; the
/// indicator clears itself when it passes, so the engine never schedules a
/// matching "clear" timer.
#[async_trait]
pub trait StatusPresenter: Send + Sync {
    async fn set_busy(&self, expires_at: Ms) -> Result<(), PresenterError>;
    async fn clear_busy(&self) -> Result<(), PresenterError>;
}

/// Presenter that logs the mutation it would send. Stands in for the real
/// presence API client during local runs.
pub struct LogPresenter {
    message: String,
    emoji: String,
}

impl Default for LogPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl LogPresenter {
    pub fn new() -> Self {
        Self {
            message: "In a meeting".into(),
            emoji: "calendar".into(),
        }
    }

    pub fn with_status(message: impl Into<String>, emoji: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            emoji: emoji.into(),
        }
    }
}

#[async_trait]
impl StatusPresenter for LogPresenter {
    async fn set_busy(&self, expires_at: Ms) -> Result<(), PresenterError> {
        info!(
            "status → \"{}\" :{}: (limited availability, expires {expires_at})",
            self.message, self.emoji
        );
        Ok(())
    }

    async fn clear_busy(&self) -> Result<(), PresenterError> {
        info!("status cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_presenter_accepts_mutations() {
        let presenter = LogPresenter::with_status("OOO", "palm_tree");
        presenter.set_busy(123_456).await.unwrap();
        presenter.clear_busy().await.unwrap();
    }
}
