use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use slides_types::api::{NewMember, NewPresentation, NewSlide, SlideContentUpdate, UpdateRole};
use slides_types::events::{ChangeEvent, Table};
use slides_types::models::{
    Presentation, PresentationListing, PresentationUser, Role, Slide, SlideContent,
    next_slide_number, sort_by_slide_number,
};

use crate::backend::{Backend, Subscription};
use crate::error::ClientError;

/// Local mirror of the presentations, slides and members the user is
/// looking at, plus the calls that change them.
///
/// Every failing call records its message in [`error`](Self::error) and
/// hands the error back; nothing is retried.
pub struct PresentationStore {
    backend: Arc<dyn Backend>,
    presentations: Vec<PresentationListing>,
    current: Option<Presentation>,
    slides: Vec<Slide>,
    users: Vec<PresentationUser>,
    is_loading: bool,
    error: Option<String>,
    subscription: Option<Subscription>,
}

impl PresentationStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            presentations: Vec::new(),
            current: None,
            slides: Vec::new(),
            users: Vec::new(),
            is_loading: false,
            error: None,
            subscription: None,
        }
    }

    // -- Accessors --

    pub fn presentations(&self) -> &[PresentationListing] {
        &self.presentations
    }

    pub fn current_presentation(&self) -> Option<&Presentation> {
        self.current.as_ref()
    }

    /// Slides in ascending slide-number order.
    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn users(&self) -> &[PresentationUser] {
        &self.users
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Record a failure for display and pass it on.
    fn fail<T>(&mut self, context: &str, err: ClientError) -> Result<T, ClientError> {
        warn!("[{}]: {}", context, err);
        self.error = Some(err.to_string());
        self.is_loading = false;
        Err(err)
    }

    fn begin(&mut self) {
        self.is_loading = true;
        self.error = None;
    }

    // -- Presentations --

    /// Create a presentation and make `creator` its creator member.
    pub async fn create_presentation(
        &mut self,
        title: &str,
        description: Option<&str>,
        creator: &str,
    ) -> Result<Presentation, ClientError> {
        self.begin();

        let new = NewPresentation {
            name: title.trim().to_string(),
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            creator_nickname: creator.to_string(),
        };

        let presentation = match self.backend.insert_presentation(&new).await {
            Ok(p) => p,
            Err(e) => return self.fail("createPresentation", e),
        };

        let member = NewMember {
            presentation_id: presentation.id,
            nickname: creator.to_string(),
            role: Role::Creator,
        };
        if let Err(e) = self.backend.insert_member(&member).await {
            return self.fail("createPresentation", e);
        }

        info!("{} created presentation {} ({})", creator, presentation.name, presentation.id);
        self.presentations.insert(
            0,
            PresentationListing {
                presentation: presentation.clone(),
                user_role: Some(Role::Creator),
                joined_at: Some(Utc::now()),
            },
        );
        self.is_loading = false;
        Ok(presentation)
    }

    /// Every presentation, newest first, annotated with `nickname`'s role
    /// where it is a member.
    pub async fn fetch_all_presentations(
        &mut self,
        nickname: &str,
    ) -> Result<&[PresentationListing], ClientError> {
        self.begin();

        let all = match self.backend.list_presentations().await {
            Ok(rows) => rows,
            Err(e) => return self.fail("fetchAllPresentations", e),
        };
        let memberships = match self.backend.memberships_for(nickname).await {
            Ok(rows) => rows,
            Err(e) => return self.fail("fetchAllPresentations", e),
        };

        self.presentations = all
            .into_iter()
            .map(|presentation| {
                let membership = memberships
                    .iter()
                    .find(|m| m.presentation_id == presentation.id);
                PresentationListing {
                    user_role: membership.map(|m| m.role),
                    joined_at: membership.map(|m| m.joined_at),
                    presentation,
                }
            })
            .collect();
        self.is_loading = false;
        Ok(&self.presentations)
    }

    pub async fn fetch_presentation_details(
        &mut self,
        presentation_id: Uuid,
    ) -> Result<&Presentation, ClientError> {
        match self.backend.get_presentation(presentation_id).await {
            Ok(p) => Ok(self.current.insert(p)),
            Err(e) => self.fail("fetchPresentationDetails", e),
        }
    }

    /// Become a viewer of the presentation unless already a member, then
    /// refresh the member list.
    pub async fn join_presentation(&mut self, presentation_id: Uuid, nickname: &str) -> Result<(), ClientError> {
        self.begin();

        let member = NewMember {
            presentation_id,
            nickname: nickname.to_string(),
            role: Role::Viewer,
        };
        if let Err(e) = self.backend.upsert_member_ignore_duplicates(&member).await {
            return self.fail("joinPresentation", e);
        }

        self.fetch_presentation_users(presentation_id).await?;
        self.is_loading = false;
        Ok(())
    }

    // -- Slides and members --

    pub async fn fetch_slides(&mut self, presentation_id: Uuid) -> Result<&[Slide], ClientError> {
        self.begin();

        match self.backend.list_slides(presentation_id).await {
            Ok(mut slides) => {
                sort_by_slide_number(&mut slides);
                self.slides = slides;
                self.is_loading = false;
                Ok(&self.slides)
            }
            Err(e) => self.fail("fetchSlides", e),
        }
    }

    pub async fn fetch_presentation_users(
        &mut self,
        presentation_id: Uuid,
    ) -> Result<&[PresentationUser], ClientError> {
        match self.backend.list_members(presentation_id).await {
            Ok(users) => {
                self.users = users;
                Ok(&self.users)
            }
            Err(e) => self.fail("fetchPresentationUsers", e),
        }
    }

    /// Ask the backend to change a member's role, then refresh members. The
    /// backend decides whether `requester` may do so.
    pub async fn update_user_role(
        &mut self,
        presentation_id: Uuid,
        target: &str,
        new_role: Role,
        requester: &str,
    ) -> Result<(), ClientError> {
        self.begin();

        let args = UpdateRole {
            target_presentation_id: presentation_id,
            target_nickname: target.to_string(),
            new_role,
            requester_nickname: requester.to_string(),
        };
        if let Err(e) = self.backend.update_user_role(&args).await {
            return self.fail("updateUserRole", e);
        }

        self.fetch_presentation_users(presentation_id).await?;
        self.is_loading = false;
        Ok(())
    }

    // -- Role gate --

    /// Role of `nickname` according to the locally loaded member list.
    pub fn current_user_role(&self, presentation_id: Uuid, nickname: &str) -> Option<Role> {
        self.users
            .iter()
            .find(|u| u.presentation_id == presentation_id && u.nickname == nickname)
            .map(|u| u.role)
    }

    pub fn is_current_user_creator(&self, presentation_id: Uuid, nickname: &str) -> bool {
        self.current_user_role(presentation_id, nickname)
            .is_some_and(|r| r.is_creator())
    }

    pub fn can_edit_slides(&self, presentation_id: Uuid, nickname: &str) -> bool {
        self.current_user_role(presentation_id, nickname)
            .is_some_and(|r| r.can_edit_slides())
    }

    // -- Slide mutations --

    /// Append a slide after the highest-numbered one. Creators only.
    pub async fn add_slide(&mut self, presentation_id: Uuid, requester: &str) -> Result<Slide, ClientError> {
        if !self.is_current_user_creator(presentation_id, requester) {
            return self.fail("addSlide", ClientError::Forbidden("Only creators can add slides"));
        }

        self.begin();

        let new = NewSlide {
            presentation_id,
            slide_number: next_slide_number(&self.slides),
            content_json: SlideContent::default(),
        };
        let slide = match self.backend.insert_slide(&new).await {
            Ok(s) => s,
            Err(e) => return self.fail("addSlide", e),
        };

        self.fetch_slides(presentation_id).await?;
        self.is_loading = false;
        Ok(slide)
    }

    /// Delete a slide. Creators only, and never the last one.
    pub async fn remove_slide(
        &mut self,
        presentation_id: Uuid,
        slide_id: Uuid,
        requester: &str,
    ) -> Result<(), ClientError> {
        if !self.is_current_user_creator(presentation_id, requester) {
            return self.fail("removeSlide", ClientError::Forbidden("Only creators can remove slides"));
        }

        self.begin();

        if self.slides.len() <= 1 {
            return self.fail("removeSlide", ClientError::LastSlide);
        }

        if let Err(e) = self.backend.delete_slide(presentation_id, slide_id).await {
            return self.fail("removeSlide", e);
        }

        self.fetch_slides(presentation_id).await?;
        self.is_loading = false;
        Ok(())
    }

    /// Replace a slide's content. Creators and editors only; the check
    /// happens before anything is sent.
    pub async fn update_slide_content(
        &mut self,
        slide_id: Uuid,
        content: SlideContent,
        requester: &str,
        presentation_id: Uuid,
    ) -> Result<(), ClientError> {
        if !self.can_edit_slides(presentation_id, requester) {
            return self.fail(
                "updateSlideContent",
                ClientError::Forbidden("Only creators and editors can modify slides"),
            );
        }

        let updated_at = Utc::now();
        let update = SlideContentUpdate {
            content_json: content,
            updated_at,
        };
        if let Err(e) = self.backend.update_slide_content(slide_id, &update).await {
            return self.fail("updateSlideContent", e);
        }

        if let Some(slide) = self.slides.iter_mut().find(|s| s.id == slide_id) {
            slide.content_json = update.content_json;
            slide.updated_at = Some(updated_at);
        }
        Ok(())
    }

    // -- Realtime --

    /// Follow slide and member changes of one presentation, replacing any
    /// previous subscription.
    pub async fn subscribe_to_slide_updates(&mut self, presentation_id: Uuid) -> Result<(), ClientError> {
        self.unsubscribe().await;

        match self.backend.subscribe(presentation_id).await {
            Ok(sub) => {
                self.subscription = Some(sub);
                Ok(())
            }
            Err(e) => self.fail("subscribeToSlideUpdates", e),
        }
    }

    pub async fn unsubscribe(&mut self) {
        if let Some(sub) = self.subscription.take() {
            debug!("Unsubscribing from presentation {}", sub.presentation_id());
            sub.close().await;
        }
    }

    /// Wait for the next change and re-fetch whatever it touched. Returns
    /// `None` when there is no subscription or the feed has ended.
    pub async fn next_change(&mut self) -> Result<Option<ChangeEvent>, ClientError> {
        let Some(sub) = self.subscription.as_mut() else {
            return Ok(None);
        };
        let Some(event) = sub.next().await else {
            self.subscription = None;
            return Ok(None);
        };

        debug!("Change on {}: refreshing", event.table);
        match event.table {
            Table::PresentationUsers => {
                self.fetch_presentation_users(event.presentation_id).await?;
            }
            Table::Slides => {
                self.fetch_slides(event.presentation_id).await?;
            }
            Table::Presentations => {
                self.fetch_presentation_details(event.presentation_id).await?;
            }
        }
        Ok(Some(event))
    }

    // -- Reset --

    pub fn clear_presentations(&mut self) {
        self.presentations.clear();
        self.error = None;
    }

    pub fn clear_slides(&mut self) {
        self.slides.clear();
    }

    pub fn clear_users(&mut self) {
        self.users.clear();
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}
