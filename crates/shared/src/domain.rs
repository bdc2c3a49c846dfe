use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store key of the single live presentation every display converges to.
pub const LIVE_STATE_KEY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct SlideArity(usize);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("slide arity must be between 1 and 16, got {actual}")]
pub struct InvalidArity {
    pub actual: usize,
}

impl SlideArity {
    pub const DEFAULT: SlideArity = SlideArity(3);
    pub const MAX: usize = 16;

    pub fn new(value: usize) -> Result<Self, InvalidArity> {
        if value == 0 || value > Self::MAX {
            return Err(InvalidArity { actual: value });
        }
        Ok(Self(value))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for SlideArity {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<usize> for SlideArity {
    type Error = InvalidArity;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SlideArity> for usize {
    fn from(value: SlideArity) -> Self {
        value.0
    }
}

impl std::fmt::Display for SlideArity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One image reference per physical screen. An empty string marks an unset slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub images: Vec<String>,
}

impl Slide {
    pub fn new(images: Vec<String>) -> Self {
        Self { images }
    }

    pub fn blank(arity: SlideArity) -> Self {
        Self {
            images: vec![String::new(); arity.get()],
        }
    }

    /// Image assigned to `screen`, or `None` when the slot is missing or unset.
    pub fn image_for(&self, screen: ScreenIndex) -> Option<&str> {
        self.images
            .get(screen.get())
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationState {
    pub slides: Vec<Slide>,
    pub current_slide_index: i64,
}

impl Default for PresentationState {
    fn default() -> Self {
        Self::empty()
    }
}

impl PresentationState {
    /// Canonical "no slides" state: empty sequence, index 0.
    pub fn empty() -> Self {
        Self {
            slides: Vec::new(),
            current_slide_index: 0,
        }
    }

    pub fn new(slides: Vec<Slide>, current_slide_index: usize) -> Self {
        Self {
            slides,
            current_slide_index: index_to_wire(current_slide_index),
        }
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// The current index when it addresses an existing slide.
    pub fn current_index(&self) -> Option<usize> {
        usize::try_from(self.current_slide_index)
            .ok()
            .filter(|index| *index < self.slides.len())
    }

    pub fn current_slide(&self) -> Option<&Slide> {
        self.current_index().and_then(|index| self.slides.get(index))
    }

    pub fn image_for_screen(&self, screen: ScreenIndex) -> Option<&str> {
        self.current_slide().and_then(|slide| slide.image_for(screen))
    }
}

pub fn index_to_wire(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

/// 0-based screen position inside a slide's image tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenIndex(usize);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid screen id '{0}'")]
pub struct InvalidScreenId(pub String);

impl ScreenIndex {
    pub fn new(index: usize, arity: SlideArity) -> Option<Self> {
        (index < arity.get()).then_some(Self(index))
    }

    /// Parses the 1-based external id used in display routes.
    pub fn from_external_id(raw: &str, arity: SlideArity) -> Result<Self, InvalidScreenId> {
        raw.trim()
            .parse::<usize>()
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| Self::new(index, arity))
            .ok_or_else(|| InvalidScreenId(raw.to_string()))
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn external_id(self) -> usize {
        self.0 + 1
    }
}

/// Last path segment of an image URL, used as its display name.
pub fn image_display_name(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(without_query)
}
