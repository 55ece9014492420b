//! In-process stand-in for the hosted backend, with call counters and
//! failure injection.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use slides_types::api::{NewMember, NewPresentation, NewSlide, SlideContentUpdate, UpdateRole};
use slides_types::events::{ChangeEvent, ChangeKind, Table};
use slides_types::models::{Presentation, PresentationUser, Role, Slide};

use crate::backend::{Backend, Subscription};
use crate::error::ClientError;

#[derive(Default)]
struct Tables {
    presentations: Vec<Presentation>,
    members: Vec<PresentationUser>,
    /// Kept in insertion order; callers must sort.
    slides: Vec<Slide>,
    subscribers: Vec<(Uuid, mpsc::Sender<ChangeEvent>)>,
}

#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    pub content_updates: AtomicUsize,
    pub fail_content_updates: AtomicBool,
    pub fail_everything: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_update_count(&self) -> usize {
        self.content_updates.load(Ordering::SeqCst)
    }

    pub fn set_fail_content_updates(&self, fail: bool) {
        self.fail_content_updates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_everything(&self, fail: bool) {
        self.fail_everything.store(fail, Ordering::SeqCst);
    }

    /// Seed a slide row directly, bypassing any client checks.
    pub fn seed_slide(&self, presentation_id: Uuid, slide_number: i32) -> Slide {
        let slide = Slide {
            id: Uuid::new_v4(),
            presentation_id,
            slide_number,
            content_json: Default::default(),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        };
        self.tables.lock().unwrap().slides.push(slide.clone());
        slide
    }

    pub fn seed_member(&self, presentation_id: Uuid, nickname: &str, role: Role) {
        let mut tables = self.tables.lock().unwrap();
        let joined_at = Utc::now() + Duration::milliseconds(tables.members.len() as i64);
        tables.members.push(PresentationUser {
            presentation_id,
            nickname: nickname.to_string(),
            role,
            joined_at,
        });
    }

    pub fn slide(&self, slide_id: Uuid) -> Option<Slide> {
        self.tables
            .lock()
            .unwrap()
            .slides
            .iter()
            .find(|s| s.id == slide_id)
            .cloned()
    }

    /// Simulate another client's write arriving through the feed.
    pub fn notify(&self, presentation_id: Uuid, table: Table, kind: ChangeKind) {
        let tables = self.tables.lock().unwrap();
        emit(&tables, presentation_id, table, kind);
    }

    /// Rewrite a slide as another client would, and announce it.
    pub fn external_content_update(&self, slide_id: Uuid, update: SlideContentUpdate) {
        let mut tables = self.tables.lock().unwrap();
        let Some(slide) = tables.slides.iter_mut().find(|s| s.id == slide_id) else {
            return;
        };
        slide.content_json = update.content_json;
        slide.updated_at = Some(update.updated_at);
        let pid = slide.presentation_id;
        emit(&tables, pid, Table::Slides, ChangeKind::Update);
    }

    fn guard(&self) -> Result<(), ClientError> {
        if self.fail_everything.load(Ordering::SeqCst) {
            return Err(ClientError::Backend {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(())
    }
}

fn emit(tables: &Tables, presentation_id: Uuid, table: Table, kind: ChangeKind) {
    for (pid, tx) in &tables.subscribers {
        if *pid == presentation_id {
            let _ = tx.try_send(ChangeEvent {
                table,
                kind,
                presentation_id,
            });
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn insert_presentation(&self, new: &NewPresentation) -> Result<Presentation, ClientError> {
        self.guard()?;
        let mut tables = self.tables.lock().unwrap();
        let created_at = Utc::now() + Duration::milliseconds(tables.presentations.len() as i64);
        let presentation = Presentation {
            id: Uuid::new_v4(),
            name: new.name.clone(),
            description: new.description.clone(),
            creator_nickname: new.creator_nickname.clone(),
            created_at,
        };
        tables.presentations.push(presentation.clone());
        Ok(presentation)
    }

    async fn list_presentations(&self) -> Result<Vec<Presentation>, ClientError> {
        self.guard()?;
        let mut rows = self.tables.lock().unwrap().presentations.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn get_presentation(&self, id: Uuid) -> Result<Presentation, ClientError> {
        self.guard()?;
        self.tables
            .lock()
            .unwrap()
            .presentations
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("presentation {}", id)))
    }

    async fn memberships_for(&self, nickname: &str) -> Result<Vec<PresentationUser>, ClientError> {
        self.guard()?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .members
            .iter()
            .filter(|m| m.nickname == nickname)
            .cloned()
            .collect())
    }

    async fn insert_member(&self, member: &NewMember) -> Result<(), ClientError> {
        self.guard()?;
        let mut tables = self.tables.lock().unwrap();
        if tables
            .members
            .iter()
            .any(|m| m.presentation_id == member.presentation_id && m.nickname == member.nickname)
        {
            return Err(ClientError::Backend {
                status: 409,
                message: "duplicate key value violates unique constraint".into(),
            });
        }
        drop(tables);
        self.seed_member(member.presentation_id, &member.nickname, member.role);
        let tables = self.tables.lock().unwrap();
        emit(&tables, member.presentation_id, Table::PresentationUsers, ChangeKind::Insert);
        Ok(())
    }

    async fn upsert_member_ignore_duplicates(&self, member: &NewMember) -> Result<(), ClientError> {
        self.guard()?;
        let exists = self
            .tables
            .lock()
            .unwrap()
            .members
            .iter()
            .any(|m| m.presentation_id == member.presentation_id && m.nickname == member.nickname);
        if exists {
            return Ok(());
        }
        self.insert_member(member).await
    }

    async fn list_members(&self, presentation_id: Uuid) -> Result<Vec<PresentationUser>, ClientError> {
        self.guard()?;
        let mut rows: Vec<PresentationUser> = self
            .tables
            .lock()
            .unwrap()
            .members
            .iter()
            .filter(|m| m.presentation_id == presentation_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.joined_at);
        Ok(rows)
    }

    async fn list_slides(&self, presentation_id: Uuid) -> Result<Vec<Slide>, ClientError> {
        self.guard()?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .slides
            .iter()
            .filter(|s| s.presentation_id == presentation_id)
            .cloned()
            .collect())
    }

    async fn insert_slide(&self, slide: &NewSlide) -> Result<Slide, ClientError> {
        self.guard()?;
        let mut tables = self.tables.lock().unwrap();
        let row = Slide {
            id: Uuid::new_v4(),
            presentation_id: slide.presentation_id,
            slide_number: slide.slide_number,
            content_json: slide.content_json.clone(),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        };
        tables.slides.push(row.clone());
        emit(&tables, slide.presentation_id, Table::Slides, ChangeKind::Insert);
        Ok(row)
    }

    async fn delete_slide(&self, presentation_id: Uuid, slide_id: Uuid) -> Result<(), ClientError> {
        self.guard()?;
        let mut tables = self.tables.lock().unwrap();
        tables
            .slides
            .retain(|s| !(s.id == slide_id && s.presentation_id == presentation_id));
        emit(&tables, presentation_id, Table::Slides, ChangeKind::Delete);
        Ok(())
    }

    async fn update_slide_content(
        &self,
        slide_id: Uuid,
        update: &SlideContentUpdate,
    ) -> Result<(), ClientError> {
        self.content_updates.fetch_add(1, Ordering::SeqCst);
        self.guard()?;
        if self.fail_content_updates.load(Ordering::SeqCst) {
            return Err(ClientError::Backend {
                status: 500,
                message: "write failed".into(),
            });
        }
        let mut tables = self.tables.lock().unwrap();
        let Some(slide) = tables.slides.iter_mut().find(|s| s.id == slide_id) else {
            return Err(ClientError::NotFound(format!("slide {}", slide_id)));
        };
        slide.content_json = update.content_json.clone();
        slide.updated_at = Some(update.updated_at);
        let pid = slide.presentation_id;
        emit(&tables, pid, Table::Slides, ChangeKind::Update);
        Ok(())
    }

    async fn update_user_role(&self, args: &UpdateRole) -> Result<(), ClientError> {
        self.guard()?;
        let mut tables = self.tables.lock().unwrap();
        let requester_is_creator = tables.members.iter().any(|m| {
            m.presentation_id == args.target_presentation_id
                && m.nickname == args.requester_nickname
                && m.role == Role::Creator
        });
        if !requester_is_creator {
            return Err(ClientError::Backend {
                status: 400,
                message: "Only creators can change user roles".into(),
            });
        }
        for member in tables.members.iter_mut().filter(|m| {
            m.presentation_id == args.target_presentation_id && m.nickname == args.target_nickname
        }) {
            member.role = args.new_role;
        }
        emit(
            &tables,
            args.target_presentation_id,
            Table::PresentationUsers,
            ChangeKind::Update,
        );
        Ok(())
    }

    async fn subscribe(&self, presentation_id: Uuid) -> Result<Subscription, ClientError> {
        self.guard()?;
        let (tx, rx) = mpsc::channel(64);
        self.tables
            .lock()
            .unwrap()
            .subscribers
            .push((presentation_id, tx));
        Ok(Subscription::new(presentation_id, rx))
    }
}
