use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use slides_types::api::{NewMember, NewPresentation, NewSlide, SlideContentUpdate, UpdateRole};
use slides_types::events::ChangeEvent;
use slides_types::models::{Presentation, PresentationUser, Slide};

use crate::error::ClientError;

/// The hosted backend as seen by the client: row CRUD on the three tables,
/// the role procedure, and a per-presentation change feed.
///
/// Authorization and conflict resolution live behind this trait. Concurrent
/// writers are resolved last-write-wins by the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn insert_presentation(&self, new: &NewPresentation) -> Result<Presentation, ClientError>;

    /// All presentations, newest first.
    async fn list_presentations(&self) -> Result<Vec<Presentation>, ClientError>;

    async fn get_presentation(&self, id: Uuid) -> Result<Presentation, ClientError>;

    /// Every membership held by `nickname`.
    async fn memberships_for(&self, nickname: &str) -> Result<Vec<PresentationUser>, ClientError>;

    async fn insert_member(&self, member: &NewMember) -> Result<(), ClientError>;

    /// Insert unless `(presentation_id, nickname)` already exists, in which
    /// case the existing row (and its role) is left alone.
    async fn upsert_member_ignore_duplicates(&self, member: &NewMember) -> Result<(), ClientError>;

    /// Members of a presentation, earliest joiner first.
    async fn list_members(&self, presentation_id: Uuid) -> Result<Vec<PresentationUser>, ClientError>;

    async fn list_slides(&self, presentation_id: Uuid) -> Result<Vec<Slide>, ClientError>;

    async fn insert_slide(&self, slide: &NewSlide) -> Result<Slide, ClientError>;

    async fn delete_slide(&self, presentation_id: Uuid, slide_id: Uuid) -> Result<(), ClientError>;

    /// Replace a slide's content document wholesale.
    async fn update_slide_content(
        &self,
        slide_id: Uuid,
        update: &SlideContentUpdate,
    ) -> Result<(), ClientError>;

    async fn update_user_role(&self, args: &UpdateRole) -> Result<(), ClientError>;

    /// Open the change feed for one presentation's slides and members.
    async fn subscribe(&self, presentation_id: Uuid) -> Result<Subscription, ClientError>;
}

/// A live change feed. Dropping it leaves the channel.
pub struct Subscription {
    presentation_id: Uuid,
    events: mpsc::Receiver<ChangeEvent>,
    leave: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(presentation_id: Uuid, events: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            presentation_id,
            events,
            leave: None,
            task: None,
        }
    }

    /// Attach the background task that feeds this subscription and the
    /// signal that tells it to leave.
    pub fn with_task(mut self, leave: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        self.leave = Some(leave);
        self.task = Some(task);
        self
    }

    pub fn presentation_id(&self) -> Uuid {
        self.presentation_id
    }

    /// Next change, in the order the feed delivered them. `None` once the
    /// feed has closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Leave the channel and wait for the feed task to finish. Events not
    /// yet read are discarded.
    pub async fn close(mut self) {
        if let Some(leave) = self.leave.take() {
            let _ = leave.send(());
        }
        self.events.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(leave) = self.leave.take() {
            let _ = leave.send(());
        }
    }
}
