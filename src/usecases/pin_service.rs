use crate::domain::models::PinStatus;
use crate::domain::repository::PinRepo;
use crate::error::{ServiceError, ServiceResult};
use std::sync::Arc;

fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 4 && pin.chars().all(|c| c.is_ascii_digit())
}

/// Four-digit gate in front of the portfolio views. With no PIN stored,
/// every attempt verifies.
pub struct PinService {
    pub repo: Arc<dyn PinRepo>,
}

impl PinService {
    pub fn new(repo: Arc<dyn PinRepo>) -> Self {
        Self { repo }
    }

    pub async fn verify(&self, pin: &str) -> ServiceResult<PinStatus> {
        Ok(match self.repo.fetch_pin().await? {
            None => PinStatus {
                verified: true,
                pin_set: false,
            },
            Some(stored) => PinStatus {
                verified: stored == pin,
                pin_set: true,
            },
        })
    }

    pub async fn set(&self, pin: &str, current_pin: &str) -> ServiceResult<()> {
        if let Some(stored) = self.repo.fetch_pin().await? {
            if stored != current_pin {
                return Err(ServiceError::Forbidden("Current PIN is incorrect".to_string()));
            }
        }
        if !is_valid_pin(pin) {
            return Err(ServiceError::Invalid("PIN must be exactly 4 digits".to_string()));
        }
        self.repo.store_pin(pin).await?;
        tracing::info!("Portfolio PIN updated");
        Ok(())
    }

    /// Returns false when there was no PIN to remove.
    pub async fn remove(&self, pin: &str) -> ServiceResult<bool> {
        match self.repo.fetch_pin().await? {
            None => Ok(false),
            Some(stored) if stored != pin => Err(ServiceError::Forbidden("Incorrect PIN".to_string())),
            Some(_) => {
                self.repo.clear_pin().await?;
                tracing::info!("Portfolio PIN removed");
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::sqlite::repo::SqliteRepo;

    async fn service() -> PinService {
        PinService::new(Arc::new(SqliteRepo::in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn unset_pin_always_verifies() {
        let svc = service().await;
        let status = svc.verify("0000").await.unwrap();
        assert_eq!(status, PinStatus { verified: true, pin_set: false });
        assert!(!svc.remove("0000").await.unwrap());
    }

    #[tokio::test]
    async fn set_requires_current_pin_and_four_digits() {
        let svc = service().await;
        assert!(matches!(svc.set("12a4", "").await, Err(ServiceError::Invalid(_))));
        assert!(matches!(svc.set("12345", "").await, Err(ServiceError::Invalid(_))));
        svc.set("1234", "").await.unwrap();

        assert!(svc.verify("1234").await.unwrap().verified);
        assert!(!svc.verify("4321").await.unwrap().verified);

        assert!(matches!(svc.set("9999", "0000").await, Err(ServiceError::Forbidden(_))));
        svc.set("9999", "1234").await.unwrap();
        assert!(svc.verify("9999").await.unwrap().verified);
    }

    #[tokio::test]
    async fn remove_checks_pin() {
        let svc = service().await;
        svc.set("1234", "").await.unwrap();
        assert!(matches!(svc.remove("0000").await, Err(ServiceError::Forbidden(_))));
        assert!(svc.remove("1234").await.unwrap());
        assert!(!svc.verify("0000").await.unwrap().pin_set);
    }
}
