use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Action, Actor};
use crate::dto::NoteRecordPatch;
use crate::errors::ServiceError;
use crate::gateway::{NoteGateway, ShipmentGateway};
use crate::models::{NewNote, Note};
use crate::normalize::{note_to_app, note_to_wire, to_app};
use crate::notifications::Notifier;

/// Forum messages, optionally threaded under a shipment.
#[derive(Clone)]
pub struct NoteService {
    notes: Arc<dyn NoteGateway>,
    shipments: Arc<dyn ShipmentGateway>,
    notifier: Notifier,
}

impl NoteService {
    pub fn new(
        notes: Arc<dyn NoteGateway>,
        shipments: Arc<dyn ShipmentGateway>,
        notifier: Notifier,
    ) -> Self {
        Self {
            notes,
            shipments,
            notifier,
        }
    }

    fn notified(&self, context: &str, error: ServiceError) -> ServiceError {
        self.notifier.error(context, &error);
        error
    }

    async fn existing(&self, id: Uuid) -> Result<Note, ServiceError> {
        self.notes
            .get_note(id)
            .await
            .map_err(|e| self.notified("Loading message", e))?
            .map(note_to_app)
            .ok_or_else(|| ServiceError::NotFound(format!("Message {} not found", id)))
    }

    /// Messages oldest first, all or one shipment's thread.
    #[instrument(skip(self))]
    pub async fn list(&self, shipment_id: Option<Uuid>) -> Result<Vec<Note>, ServiceError> {
        let records = self
            .notes
            .list_notes(shipment_id)
            .await
            .map_err(|e| self.notified("Loading messages", e))?;
        Ok(records.into_iter().map(note_to_app).collect())
    }

    #[instrument(skip(self, actor, note), fields(user_id = %actor.user_id))]
    pub async fn post(&self, actor: &Actor, note: NewNote) -> Result<Note, ServiceError> {
        note.validate()?;
        if note.body.trim().is_empty() {
            return Err(ServiceError::InvalidInput("Message cannot be blank".to_string()));
        }

        let shipment = match note.shipment_id {
            Some(id) => Some(
                self.shipments
                    .get_shipment(id)
                    .await
                    .map_err(|e| self.notified("Loading shipment", e))?
                    .map(to_app)
                    .ok_or_else(|| ServiceError::NotFound(format!("Shipment {} not found", id)))?,
            ),
            None => None,
        };
        actor.authorize(Action::PostNote, shipment.as_ref())?;

        let record = self
            .notes
            .insert_note(&note_to_wire(&actor.display_name, Some(actor.user_id), &note))
            .await
            .map_err(|e| self.notified("Posting message", e))?;
        let posted = note_to_app(record);
        info!(note_id = %posted.id, "message posted");
        Ok(posted)
    }

    #[instrument(skip(self, actor, body), fields(user_id = %actor.user_id))]
    pub async fn edit(
        &self,
        actor: &Actor,
        id: Uuid,
        body: String,
        image_url: Option<String>,
    ) -> Result<Note, ServiceError> {
        let existing = self.existing(id).await?;
        actor.authorize_note_change(&existing)?;

        let edited = NewNote {
            body,
            image_url,
            shipment_id: existing.shipment_id,
        };
        edited.validate()?;
        if edited.body.trim().is_empty() {
            return Err(ServiceError::InvalidInput("Message cannot be blank".to_string()));
        }

        let patch = NoteRecordPatch {
            pesan: Some(edited.body),
            gambar_url: Some(edited.image_url),
        };
        let record = self
            .notes
            .update_note(id, &patch)
            .await
            .map_err(|e| self.notified("Editing message", e))?;
        Ok(note_to_app(record))
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.existing(id).await?;
        actor.authorize_note_change(&existing)?;
        self.notes
            .delete_note(id)
            .await
            .map_err(|e| self.notified("Deleting message", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use assert_matches::assert_matches;

    fn service() -> NoteService {
        let gateway = Arc::new(InMemoryGateway::new());
        NoteService::new(gateway.clone(), gateway, Notifier::default())
    }

    fn note(body: &str) -> NewNote {
        NewNote {
            body: body.to_string(),
            image_url: None,
            shipment_id: None,
        }
    }

    #[tokio::test]
    async fn author_edits_and_deletes_own_message() {
        let service = service();
        let author = Actor::driver("Budi", Uuid::new_v4());

        let posted = service.post(&author, note("Macet di tol")).await.expect("posted");
        assert_eq!(posted.author_name, "Budi");

        let edited = service
            .edit(&author, posted.id, "Macet parah di tol".into(), None)
            .await
            .expect("edited");
        assert_eq!(edited.body, "Macet parah di tol");

        let stranger = Actor::driver("Andi", Uuid::new_v4());
        assert_matches!(
            service.delete(&stranger, posted.id).await,
            Err(ServiceError::Forbidden(_))
        );
        service.delete(&author, posted.id).await.expect("deleted");
        assert!(service.list(None).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_and_invalid_messages() {
        let service = service();
        let admin = Actor::admin("Ops");
        assert_matches!(
            service.post(&admin, note("")).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            service.post(&admin, note("   ")).await,
            Err(ServiceError::InvalidInput(_))
        );
        let mut with_image = note("foto");
        with_image.image_url = Some("nope".into());
        assert_matches!(
            service.post(&admin, with_image).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn driver_cannot_post_on_unassigned_shipment_thread() {
        let service = service();
        let driver = Actor::driver("Budi", Uuid::new_v4());
        let mut threaded = note("Ada kendala");
        threaded.shipment_id = Some(Uuid::new_v4());
        assert_matches!(
            service.post(&driver, threaded).await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn edit_rejects_blank_message() {
        let service = service();
        let author = Actor::driver("Budi", Uuid::new_v4());
        let posted = service.post(&author, note("Sudah bongkar")).await.expect("posted");

        assert_matches!(
            service.edit(&author, posted.id, "  \t ".into(), None).await,
            Err(ServiceError::InvalidInput(ref message)) if message == "Message cannot be blank"
        );
        let thread = service.list(None).await.expect("list");
        assert_eq!(thread[0].body, "Sudah bongkar");
    }

    #[tokio::test]
    async fn offline_lookups_are_notified() {
        let gateway = Arc::new(InMemoryGateway::new());
        let notifier = Notifier::new(8);
        let mut notifications = notifier.subscribe();
        let service = NoteService::new(gateway.clone(), gateway.clone(), notifier);
        let admin = Actor::admin("Ops");
        gateway.set_offline(true);

        let result = service.delete(&admin, Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::ExternalServiceError(_)));
        let received = notifications.recv().await.expect("notification");
        assert!(received.message.starts_with("Loading message"));

        let mut threaded = note("Ada kendala");
        threaded.shipment_id = Some(Uuid::new_v4());
        assert_matches!(
            service.post(&admin, threaded).await,
            Err(ServiceError::ExternalServiceError(_))
        );
        let received = notifications.recv().await.expect("notification");
        assert!(received.message.starts_with("Loading shipment"));
    }
}
