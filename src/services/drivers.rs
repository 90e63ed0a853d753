use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::gateway::DriverGateway;
use crate::models::Driver;
use crate::normalize::driver_to_app;
use crate::notifications::Notifier;

/// Read access to the driver directory.
#[derive(Clone)]
pub struct DriverService {
    gateway: Arc<dyn DriverGateway>,
    notifier: Notifier,
}

impl DriverService {
    pub fn new(gateway: Arc<dyn DriverGateway>, notifier: Notifier) -> Self {
        Self { gateway, notifier }
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Driver>, ServiceError> {
        let records = self.gateway.list_drivers().await.map_err(|e| {
            self.notifier.error("Loading drivers", &e);
            e
        })?;
        Ok(records.into_iter().map(driver_to_app).collect())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Driver, ServiceError> {
        self.gateway
            .get_driver(id)
            .await?
            .map(driver_to_app)
            .ok_or_else(|| ServiceError::NotFound(format!("Driver {} not found", id)))
    }

    /// The driver record linked to a login account.
    #[instrument(skip(self))]
    pub async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Driver>, ServiceError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|driver| driver.user_id == Some(user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::DriverRecord;
    use crate::gateway::InMemoryGateway;

    #[tokio::test]
    async fn resolves_driver_for_user_account() {
        let gateway = Arc::new(InMemoryGateway::new());
        let user_id = Uuid::new_v4();
        let driver_id = Uuid::new_v4();
        gateway.seed_driver(DriverRecord {
            id: driver_id,
            nama: "Budi".to_string(),
            plat_nomor: "B 1234 XY".to_string(),
            user_id: Some(user_id),
            no_hp: None,
        });
        let service = DriverService::new(gateway, Notifier::default());

        let found = service.find_by_user(user_id).await.expect("lookup");
        assert_eq!(found.map(|d| d.id), Some(driver_id));
        assert!(service.get(Uuid::new_v4()).await.is_err());
        assert_eq!(service.get(driver_id).await.expect("driver").license_plate, "B 1234 XY");
    }
}
