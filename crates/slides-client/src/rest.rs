use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use slides_types::api::{
    BackendErrorBody, NewMember, NewPresentation, NewSlide, SlideContentUpdate, UpdateRole,
};
use slides_types::models::{Presentation, PresentationUser, Slide};

use crate::backend::{Backend, Subscription};
use crate::config::BackendConfig;
use crate::error::ClientError;
use crate::realtime;

const PRESENTATIONS: &str = "presentations";
const SLIDES: &str = "slides";
const PRESENTATION_USERS: &str = "presentation_users";

/// [`Backend`] over the hosted REST gateway and realtime socket.
#[derive(Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl RestBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Ok(Self::new(BackendConfig::from_env()?))
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.config.rest_url(path))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.config.anon_key)
    }

    /// Insert and return the created rows.
    async fn insert_returning<B, T>(&self, table: &str, body: &B) -> Result<Vec<T>, ClientError>
    where
        B: serde::Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let resp = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&[body])
            .send()
            .await?;
        read_json(check(resp).await?).await
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

/// Turn a non-2xx reply into [`ClientError::Backend`], preferring the
/// gateway's own message.
async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<BackendErrorBody>(&text)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        });
    warn!("Backend replied {}: {}", status, message);
    Err(ClientError::Backend {
        status: status.as_u16(),
        message,
    })
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn first<T>(rows: Vec<T>, what: &str) -> Result<T, ClientError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| ClientError::NotFound(what.to_string()))
}

#[async_trait]
impl Backend for RestBackend {
    async fn insert_presentation(&self, new: &NewPresentation) -> Result<Presentation, ClientError> {
        let rows = self.insert_returning(PRESENTATIONS, new).await?;
        first(rows, "presentation")
    }

    async fn list_presentations(&self) -> Result<Vec<Presentation>, ClientError> {
        let resp = self
            .request(Method::GET, PRESENTATIONS)
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await?;
        read_json(check(resp).await?).await
    }

    async fn get_presentation(&self, id: Uuid) -> Result<Presentation, ClientError> {
        let resp = self
            .request(Method::GET, PRESENTATIONS)
            .query(&[("select", "*".to_string()), ("id", eq(id))])
            .send()
            .await?;
        let rows: Vec<Presentation> = read_json(check(resp).await?).await?;
        first(rows, &format!("presentation {}", id))
    }

    async fn memberships_for(&self, nickname: &str) -> Result<Vec<PresentationUser>, ClientError> {
        let resp = self
            .request(Method::GET, PRESENTATION_USERS)
            .query(&[("select", "*".to_string()), ("nickname", eq(nickname))])
            .send()
            .await?;
        read_json(check(resp).await?).await
    }

    async fn insert_member(&self, member: &NewMember) -> Result<(), ClientError> {
        let resp = self
            .request(Method::POST, PRESENTATION_USERS)
            .header("Prefer", "return=minimal")
            .json(&[member])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn upsert_member_ignore_duplicates(&self, member: &NewMember) -> Result<(), ClientError> {
        let resp = self
            .request(Method::POST, PRESENTATION_USERS)
            .query(&[("on_conflict", "presentation_id,nickname")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&[member])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn list_members(&self, presentation_id: Uuid) -> Result<Vec<PresentationUser>, ClientError> {
        let resp = self
            .request(Method::GET, PRESENTATION_USERS)
            .query(&[
                ("select", "*".to_string()),
                ("presentation_id", eq(presentation_id)),
                ("order", "joined_at.asc".to_string()),
            ])
            .send()
            .await?;
        read_json(check(resp).await?).await
    }

    async fn list_slides(&self, presentation_id: Uuid) -> Result<Vec<Slide>, ClientError> {
        let resp = self
            .request(Method::GET, SLIDES)
            .query(&[
                ("select", "*".to_string()),
                ("presentation_id", eq(presentation_id)),
                ("order", "slide_number.asc".to_string()),
            ])
            .send()
            .await?;
        read_json(check(resp).await?).await
    }

    async fn insert_slide(&self, slide: &NewSlide) -> Result<Slide, ClientError> {
        let rows = self.insert_returning(SLIDES, slide).await?;
        first(rows, "slide")
    }

    async fn delete_slide(&self, presentation_id: Uuid, slide_id: Uuid) -> Result<(), ClientError> {
        let resp = self
            .request(Method::DELETE, SLIDES)
            .query(&[("id", eq(slide_id)), ("presentation_id", eq(presentation_id))])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn update_slide_content(
        &self,
        slide_id: Uuid,
        update: &SlideContentUpdate,
    ) -> Result<(), ClientError> {
        let resp = self
            .request(Method::PATCH, SLIDES)
            .query(&[("id", eq(slide_id))])
            .header("Prefer", "return=minimal")
            .json(update)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn update_user_role(&self, args: &UpdateRole) -> Result<(), ClientError> {
        debug!(
            "Requesting role {} for {} in {}",
            args.new_role, args.target_nickname, args.target_presentation_id
        );
        let resp = self
            .request(Method::POST, "rpc/update_user_role")
            .json(args)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn subscribe(&self, presentation_id: Uuid) -> Result<Subscription, ClientError> {
        realtime::subscribe(&self.config, presentation_id).await
    }
}
