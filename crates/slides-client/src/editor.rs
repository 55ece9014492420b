use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use slides_types::events::ChangeEvent;
use slides_types::models::{
    Position, Role, Size, Slide, SlideContent, TextBlock, slide_index_for_number,
};

use crate::error::ClientError;
use crate::store::PresentationStore;

/// Size of a freshly placed text block.
pub const DEFAULT_BLOCK_SIZE: Size = Size {
    width: 200.0,
    height: 100.0,
};

/// A new block is centred-ish on the click: its corner sits this far up
/// and left of the pointer.
const PLACEMENT_OFFSET: Position = Position { x: 100.0, y: 25.0 };

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `textblock_{unix_millis}_{9 base-36 chars}`
pub fn generate_text_block_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("textblock_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// One user's editing session on one presentation.
///
/// Content edits are optimistic: the session's copy of the current slide is
/// replaced before the write is sent, and put back exactly as it was if the
/// write fails. Users who may not edit get silent no-ops and never reach
/// the backend.
pub struct SlideEditor {
    store: PresentationStore,
    presentation_id: Uuid,
    nickname: String,
    current_index: usize,
    content: Option<SlideContent>,
    selected: Option<String>,
    editing: Option<String>,
    last_error: Option<String>,
}

impl SlideEditor {
    /// Join the presentation, load its slides and details and start
    /// following changes.
    pub async fn open(
        mut store: PresentationStore,
        presentation_id: Uuid,
        nickname: &str,
    ) -> Result<Self, ClientError> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(ClientError::EmptyNickname);
        }

        store.join_presentation(presentation_id, nickname).await?;
        store.fetch_slides(presentation_id).await?;
        store.fetch_presentation_details(presentation_id).await?;
        store.subscribe_to_slide_updates(presentation_id).await?;

        info!("{} opened presentation {}", nickname, presentation_id);

        let mut editor = Self {
            store,
            presentation_id,
            nickname: nickname.to_string(),
            current_index: 0,
            content: None,
            selected: None,
            editing: None,
            last_error: None,
        };
        editor.sync_content();
        Ok(editor)
    }

    /// Stop following changes and hand the store back.
    pub async fn close(mut self) -> PresentationStore {
        self.store.unsubscribe().await;
        self.store
    }

    // -- Accessors --

    pub fn store(&self) -> &PresentationStore {
        &self.store
    }

    pub fn presentation_id(&self) -> Uuid {
        self.presentation_id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_slide(&self) -> Option<&Slide> {
        self.store.slides().get(self.current_index)
    }

    /// The content as this session currently shows it, optimistic edits
    /// included.
    pub fn content(&self) -> Option<&SlideContent> {
        self.content.as_ref()
    }

    pub fn text_blocks(&self) -> &[TextBlock] {
        self.content
            .as_ref()
            .map(|c| c.text_blocks.as_slice())
            .unwrap_or_default()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn editing(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    /// Message of the last failed action, for display.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn role(&self) -> Option<Role> {
        self.store
            .current_user_role(self.presentation_id, &self.nickname)
    }

    pub fn can_edit(&self) -> bool {
        self.store.can_edit_slides(self.presentation_id, &self.nickname)
    }

    pub fn is_creator(&self) -> bool {
        self.store
            .is_current_user_creator(self.presentation_id, &self.nickname)
    }

    /// Reload the session's copy from the store's slide list.
    fn sync_content(&mut self) {
        self.content = self.current_slide().map(|s| s.content_json.clone());
    }

    // -- Navigation and selection --

    pub fn select_slide(&mut self, index: usize) {
        self.current_index = index;
        self.selected = None;
        self.editing = None;
        self.sync_content();
    }

    /// Jump to the slide carrying `number`, as a `?slide=N` link does.
    /// Unknown numbers leave the view where it is.
    pub fn select_slide_number(&mut self, number: i32) -> bool {
        match slide_index_for_number(self.store.slides(), number) {
            Some(index) => {
                self.select_slide(index);
                true
            }
            None => false,
        }
    }

    pub fn select_text_block(&mut self, id: &str) {
        if !self.can_edit() {
            return;
        }
        self.selected = Some(id.to_string());
        self.editing = None;
    }

    pub fn edit_text_block(&mut self, id: &str) {
        if !self.can_edit() {
            return;
        }
        self.editing = Some(id.to_string());
        self.selected = Some(id.to_string());
    }

    pub fn stop_editing(&mut self) {
        self.editing = None;
    }

    /// A click on empty canvas drops the selection unless a block is being
    /// edited.
    pub fn outside_click(&mut self) {
        if self.editing.is_none() && self.can_edit() {
            self.selected = None;
        }
    }

    // -- Content edits --

    /// Send `updated` as the current slide's content, showing it
    /// immediately and restoring the previous content if the write fails.
    async fn commit(&mut self, updated: SlideContent) -> Result<(), ClientError> {
        let Some(slide_id) = self.current_slide().map(|s| s.id) else {
            return Ok(());
        };

        let previous = self.content.replace(updated.clone());
        let result = self
            .store
            .update_slide_content(slide_id, updated, &self.nickname, self.presentation_id)
            .await;

        match result {
            Ok(()) => {
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                warn!("Reverting edit on slide {}: {}", slide_id, e);
                self.content = previous;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Place an empty block at a click position and start editing it.
    /// Returns the new block's id, or `None` if nothing was done.
    pub async fn add_text_block_at(&mut self, x: f64, y: f64) -> Result<Option<String>, ClientError> {
        if !self.can_edit() || self.editing.is_some() {
            return Ok(None);
        }
        let Some(current) = self.content.as_ref() else {
            return Ok(None);
        };

        let block = TextBlock {
            id: generate_text_block_id(),
            content: String::new(),
            position: Position {
                x: (x - PLACEMENT_OFFSET.x).max(0.0),
                y: (y - PLACEMENT_OFFSET.y).max(0.0),
            },
            size: DEFAULT_BLOCK_SIZE,
        };
        let id = block.id.clone();
        let updated = current.with_block_added(block);

        self.selected = Some(id.clone());
        self.editing = Some(id.clone());

        if let Err(e) = self.commit(updated).await {
            self.selected = None;
            self.editing = None;
            return Err(e);
        }
        Ok(Some(id))
    }

    pub async fn move_text_block(&mut self, id: &str, position: Position) -> Result<bool, ClientError> {
        if !self.can_edit() {
            return Ok(false);
        }
        let Some(current) = self.content.as_ref() else {
            return Ok(false);
        };
        let updated = current.with_block_moved(id, position);
        self.commit(updated).await?;
        Ok(true)
    }

    /// Finish a drag: move the block by the pointer delta, clamped to the
    /// canvas origin.
    pub async fn drag_text_block(&mut self, id: &str, dx: f64, dy: f64) -> Result<bool, ClientError> {
        if !self.can_edit() {
            return Ok(false);
        }
        let Some(block) = self.content.as_ref().and_then(|c| c.block(id)) else {
            return Ok(false);
        };
        let position = block.position.offset_clamped(dx, dy);
        self.move_text_block(id, position).await
    }

    pub async fn change_text_block_content(&mut self, id: &str, text: &str) -> Result<bool, ClientError> {
        if !self.can_edit() {
            return Ok(false);
        }
        let Some(current) = self.content.as_ref() else {
            return Ok(false);
        };
        let updated = current.with_block_content(id, text);
        self.commit(updated).await?;
        Ok(true)
    }

    pub async fn delete_text_block(&mut self, id: &str) -> Result<bool, ClientError> {
        if !self.can_edit() {
            return Ok(false);
        }
        let Some(current) = self.content.as_ref() else {
            return Ok(false);
        };
        let updated = current.without_block(id);

        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        if self.editing.as_deref() == Some(id) {
            self.editing = None;
        }

        self.commit(updated).await?;
        Ok(true)
    }

    // -- Slides and roles --

    pub async fn add_slide(&mut self) -> Result<Option<Slide>, ClientError> {
        if !self.is_creator() {
            return Ok(None);
        }
        let result = self
            .store
            .add_slide(self.presentation_id, &self.nickname)
            .await;
        self.settle(result).map(Some)
    }

    /// Remove a slide, keeping the current index inside the shrunken deck.
    pub async fn remove_slide(&mut self, slide_id: Uuid) -> Result<bool, ClientError> {
        if !self.is_creator() {
            return Ok(false);
        }
        let before = self.store.slides().len();
        let result = self
            .store
            .remove_slide(self.presentation_id, slide_id, &self.nickname)
            .await;
        self.settle(result)?;

        if self.current_index + 1 >= before {
            self.current_index = before.saturating_sub(2);
        }
        self.sync_content();
        Ok(true)
    }

    /// Hand `target` the editor or viewer role. Only the creator may, and
    /// never for themselves or another creator.
    pub async fn change_role(&mut self, target: &str, role: Role) -> Result<bool, ClientError> {
        if !self.is_creator() || role == Role::Creator || target == self.nickname {
            return Ok(false);
        }
        let target_role = self.store.current_user_role(self.presentation_id, target);
        if target_role.is_none_or(|r| r.is_creator()) {
            return Ok(false);
        }

        let result = self
            .store
            .update_user_role(self.presentation_id, target, role, &self.nickname)
            .await;
        self.settle(result)?;
        Ok(true)
    }

    fn settle<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        match result {
            Ok(v) => {
                self.last_error = None;
                self.sync_content();
                Ok(v)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    // -- Realtime --

    /// Wait for a change from another client, re-fetch, and show the
    /// refreshed slide.
    pub async fn apply_next_change(&mut self) -> Result<Option<ChangeEvent>, ClientError> {
        let event = self.store.next_change().await?;
        if event.is_some() {
            let last = self.store.slides().len().saturating_sub(1);
            self.current_index = self.current_index.min(last);
            self.sync_content();
        }
        Ok(event)
    }
}
