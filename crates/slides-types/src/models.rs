use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// -- Roles --

/// Access level of a nickname inside one presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Creator,
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }

    /// Creators and editors may rewrite slide content.
    pub fn can_edit_slides(&self) -> bool {
        matches!(self, Self::Creator | Self::Editor)
    }

    /// Only creators may add or remove slides and hand out roles.
    pub fn is_creator(&self) -> bool {
        matches!(self, Self::Creator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "creator" => Ok(Self::Creator),
            "editor" => Ok(Self::Editor),
            "viewer" => Ok(Self::Viewer),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

// -- Presentations --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presentation {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub creator_nickname: String,
    pub created_at: DateTime<Utc>,
}

/// A presentation as seen by one nickname: the row plus that nickname's
/// membership, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationListing {
    #[serde(flatten)]
    pub presentation: Presentation,
    pub user_role: Option<Role>,
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationUser {
    pub presentation_id: Uuid,
    pub nickname: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

// -- Slides --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    pub id: Uuid,
    pub presentation_id: Uuid,
    pub slide_number: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content_json: SlideContent,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Sort slides into display order. Stable, so equal numbers keep their
/// relative order.
pub fn sort_by_slide_number(slides: &mut [Slide]) {
    slides.sort_by_key(|s| s.slide_number);
}

/// Number for a slide appended after `slides`.
pub fn next_slide_number(slides: &[Slide]) -> i32 {
    slides
        .iter()
        .map(|s| s.slide_number)
        .max()
        .map_or(1, |max| max + 1)
}

/// Position of the slide numbered `number` in display order, for links
/// that address a slide by number.
pub fn slide_index_for_number(slides: &[Slide], number: i32) -> Option<usize> {
    if number < 1 {
        return None;
    }
    let mut ordered: Vec<i32> = slides.iter().map(|s| s.slide_number).collect();
    ordered.sort_unstable();
    ordered.iter().position(|&n| n == number)
}

/// The JSON document stored in `slides.content_json`.
///
/// Keys other than `textBlocks` are carried through untouched so that a
/// rewrite never drops data written by another client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlideContent {
    #[serde(rename = "textBlocks", default, deserialize_with = "null_as_default")]
    pub text_blocks: Vec<TextBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SlideContent {
    pub fn block(&self, id: &str) -> Option<&TextBlock> {
        self.text_blocks.iter().find(|b| b.id == id)
    }

    pub fn with_block_added(&self, block: TextBlock) -> Self {
        let mut next = self.clone();
        next.text_blocks.push(block);
        next
    }

    pub fn with_block_moved(&self, id: &str, position: Position) -> Self {
        self.map_block(id, |b| b.position = position)
    }

    pub fn with_block_content(&self, id: &str, content: &str) -> Self {
        self.map_block(id, |b| b.content = content.to_string())
    }

    pub fn without_block(&self, id: &str) -> Self {
        let mut next = self.clone();
        next.text_blocks.retain(|b| b.id != id);
        next
    }

    fn map_block(&self, id: &str, f: impl Fn(&mut TextBlock)) -> Self {
        let mut next = self.clone();
        for block in next.text_blocks.iter_mut().filter(|b| b.id == id) {
            f(block);
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub position: Position,
    pub size: Size,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Offset by a drag delta, never leaving the canvas on the top/left.
    pub fn offset_clamped(self, dx: f64, dy: f64) -> Self {
        Self {
            x: (self.x + dx).max(0.0),
            y: (self.y + dy).max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
