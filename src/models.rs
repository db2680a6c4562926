use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchResult};

/// Numeric id shared by stories, comments, polls and jobs.
pub type ItemId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryKind {
    Story,
    Job,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Story {
    pub id: ItemId,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub descendant_count: Option<u32>,
    pub author: String,
    pub title: String,
    pub child_ids: Option<Vec<ItemId>>,
    pub kind: StoryKind,
    pub url: Option<String>,
    pub body_text: Option<String>,
}

impl Story {
    /// Host part of the story link, without a leading `www.`.
    pub fn domain(&self) -> Option<String> {
        self.url.as_deref().and_then(crate::text::domain_of)
    }

    pub fn top_level_ids(&self) -> &[ItemId] {
        self.child_ids.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: ItemId,
    pub author: String,
    /// Either another comment or the owning story.
    pub parent_id: ItemId,
    pub child_ids: Option<Vec<ItemId>>,
    pub body_text: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn child_ids(&self) -> &[ItemId] {
        self.child_ids.as_deref().unwrap_or(&[])
    }

    pub fn has_children(&self) -> bool {
        !self.child_ids().is_empty()
    }

    /// Body with markup stripped and entities decoded.
    pub fn plain_text(&self) -> String {
        crate::text::plain_text(&self.body_text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub karma: i64,
    pub created_at: DateTime<Utc>,
    pub about: Option<String>,
    pub submitted: Vec<ItemId>,
}

/// Anything the item endpoint can answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Story(Story),
    Comment(Comment),
}

impl Item {
    pub fn id(&self) -> ItemId {
        match self {
            Item::Story(story) => story.id,
            Item::Comment(comment) => comment.id,
        }
    }

    /// Decode an `item/{id}` payload.
    ///
    /// A JSON `null` (unknown id) is a generic failure; a tombstoned payload
    /// fails with [`FetchError::Deleted`].
    pub fn from_value(value: &serde_json::Value) -> FetchResult<Item> {
        if value.is_null() {
            return Err(FetchError::Generic("item not found".to_string()));
        }
        let raw: RawItem = serde_json::from_value(value.clone())?;
        raw.into_item()
    }

    pub fn into_story(self) -> FetchResult<Story> {
        match self {
            Item::Story(story) => Ok(story),
            Item::Comment(comment) => Err(FetchError::Decode(format!(
                "expected a story, item {} is a comment",
                comment.id
            ))),
        }
    }

    pub fn into_comment(self) -> FetchResult<Comment> {
        match self {
            Item::Comment(comment) => Ok(comment),
            Item::Story(story) => Err(FetchError::Decode(format!(
                "expected a comment, item {} is a story",
                story.id
            ))),
        }
    }
}

/// Loosely typed payload of the item endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawItem {
    pub id: ItemId,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub parent: Option<ItemId>,
    #[serde(default)]
    pub kids: Option<Vec<ItemId>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub descendants: Option<i64>,
    #[serde(default)]
    pub deleted: Option<bool>,
    #[serde(default)]
    pub dead: Option<bool>,
}

impl RawItem {
    fn into_item(self) -> FetchResult<Item> {
        if self.deleted.unwrap_or(false) {
            return Err(FetchError::Deleted(self.id));
        }

        let created_at = unix_time(self.time.unwrap_or(0))?;
        let kind = self.kind.as_deref().unwrap_or("story");

        let story_kind = match kind {
            "comment" => {
                let parent_id = self.parent.ok_or_else(|| {
                    FetchError::Decode(format!("comment {} has no parent", self.id))
                })?;
                return Ok(Item::Comment(Comment {
                    id: self.id,
                    author: self.by.unwrap_or_default(),
                    parent_id,
                    child_ids: self.kids,
                    body_text: self.text.unwrap_or_default(),
                    created_at,
                }));
            }
            "story" => StoryKind::Story,
            "job" => StoryKind::Job,
            "poll" => StoryKind::Poll,
            other => {
                return Err(FetchError::Decode(format!(
                    "unsupported item type '{}' for item {}",
                    other, self.id
                )))
            }
        };

        Ok(Item::Story(Story {
            id: self.id,
            score: self.score.unwrap_or(0),
            created_at,
            descendant_count: self.descendants.and_then(|d| u32::try_from(d).ok()),
            author: self.by.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            child_ids: self.kids,
            kind: story_kind,
            url: self.url.filter(|u| !u.is_empty()),
            body_text: self.text,
        }))
    }
}

/// Payload of the user endpoint.
#[derive(Debug, Clone, Deserialize)]
struct RawUser {
    id: String,
    #[serde(default)]
    karma: i64,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    about: Option<String>,
    #[serde(default)]
    submitted: Vec<ItemId>,
}

impl User {
    pub fn from_value(value: &serde_json::Value) -> FetchResult<User> {
        if value.is_null() {
            return Err(FetchError::Generic("user not found".to_string()));
        }
        let raw: RawUser = serde_json::from_value(value.clone())?;
        Ok(User {
            id: raw.id,
            karma: raw.karma,
            created_at: unix_time(raw.created)?,
            about: raw.about,
            submitted: raw.submitted,
        })
    }
}

/// Story listings, one per front-page tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    Top,
    New,
    Best,
    Ask,
    Show,
    Job,
}

impl Feed {
    pub fn name(&self) -> &'static str {
        match self {
            Feed::Top => "top",
            Feed::New => "new",
            Feed::Best => "best",
            Feed::Ask => "ask",
            Feed::Show => "show",
            Feed::Job => "job",
        }
    }

    /// Endpoint path, relative to the API base.
    pub fn path(&self) -> &'static str {
        match self {
            Feed::Top => "topstories",
            Feed::New => "newstories",
            Feed::Best => "beststories",
            Feed::Ask => "askstories",
            Feed::Show => "showstories",
            Feed::Job => "jobstories",
        }
    }
}

impl std::str::FromStr for Feed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept the tab names the desktop reader uses as well
        match s.to_ascii_lowercase().as_str() {
            "top" | "hot" => Ok(Feed::Top),
            "new" => Ok(Feed::New),
            "best" => Ok(Feed::Best),
            "ask" => Ok(Feed::Ask),
            "show" => Ok(Feed::Show),
            "job" | "jobs" => Ok(Feed::Job),
            other => Err(format!("unknown feed '{}'", other)),
        }
    }
}

fn unix_time(secs: i64) -> FetchResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| FetchError::Decode(format!("invalid timestamp {}", secs)))
}
