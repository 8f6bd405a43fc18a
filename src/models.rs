use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Occasion {
    Date,
    Work,
    Campus,
    Travel,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorTone {
    Cool,
    Warm,
    Earth,
    Monochrome,
}

impl Season {
    pub const ALL: [Season; 4] = [Self::Spring, Self::Summer, Self::Autumn, Self::Winter];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spring => "spring",
            Self::Summer => "summer",
            Self::Autumn => "autumn",
            Self::Winter => "winter",
        }
    }

    /// Label shown in the form and sent to the model.
    pub fn label(self) -> &'static str {
        match self {
            Self::Spring => "春季",
            Self::Summer => "夏季",
            Self::Autumn => "秋季",
            Self::Winter => "冬季",
        }
    }
}

impl Occasion {
    pub const ALL: [Occasion; 4] = [Self::Date, Self::Work, Self::Campus, Self::Travel];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Work => "work",
            Self::Campus => "campus",
            Self::Travel => "travel",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Date => "約會",
            Self::Work => "工作",
            Self::Campus => "校園",
            Self::Travel => "旅行",
        }
    }
}

impl ColorTone {
    pub const ALL: [ColorTone; 4] = [Self::Cool, Self::Warm, Self::Earth, Self::Monochrome];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cool => "cool",
            Self::Warm => "warm",
            Self::Earth => "earth",
            Self::Monochrome => "monochrome",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Cool => "冷色系",
            Self::Warm => "暖色系",
            Self::Earth => "大地色系",
            Self::Monochrome => "黑白灰",
        }
    }
}

/// One selectable option as rendered by the form.
#[derive(Debug, Serialize, Clone)]
pub struct ChoiceOption {
    pub value: &'static str,
    pub label: &'static str,
}

/// Required form inputs, in the order they are reported when missing.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    StyleText,
    Season,
    Occasion,
    ColorTone,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StyleText => "style_text",
            Self::Season => "season",
            Self::Occasion => "occasion",
            Self::ColorTone => "color_tone",
        };
        f.write_str(name)
    }
}

/// A complete, validated submission.
#[derive(Debug, Clone)]
pub struct UserRequest {
    pub style_text: String,
    pub season: Season,
    pub occasion: Occasion,
    pub color_tone: ColorTone,
    pub photo: Option<Bytes>,
}

/// What the user has filled in so far.
#[derive(Debug, Clone, Default)]
pub struct FormInputs {
    pub style_text: Option<String>,
    pub season: Option<Season>,
    pub occasion: Option<Occasion>,
    pub color_tone: Option<ColorTone>,
    pub photo: Option<Bytes>,
}

impl FormInputs {
    pub fn validate(&self) -> Result<UserRequest, Vec<Field>> {
        let style_text = self
            .style_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut missing = Vec::new();
        if style_text.is_none() {
            missing.push(Field::StyleText);
        }
        if self.season.is_none() {
            missing.push(Field::Season);
        }
        if self.occasion.is_none() {
            missing.push(Field::Occasion);
        }
        if self.color_tone.is_none() {
            missing.push(Field::ColorTone);
        }

        match (style_text, self.season, self.occasion, self.color_tone) {
            (Some(style_text), Some(season), Some(occasion), Some(color_tone)) => Ok(UserRequest {
                style_text: style_text.to_string(),
                season,
                occasion,
                color_tone,
                photo: self.photo.clone(),
            }),
            _ => Err(missing),
        }
    }

    pub fn apply(&mut self, update: InputsUpdate) {
        if let Some(style_text) = update.style_text {
            self.style_text = Some(style_text);
        }
        if let Some(season) = update.season {
            self.season = Some(season);
        }
        if let Some(occasion) = update.occasion {
            self.occasion = Some(occasion);
        }
        if let Some(color_tone) = update.color_tone {
            self.color_tone = Some(color_tone);
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct InputsUpdate {
    #[serde(default)]
    pub style_text: Option<String>,
    #[serde(default)]
    pub season: Option<Season>,
    #[serde(default)]
    pub occasion: Option<Occasion>,
    #[serde(default)]
    pub color_tone: Option<ColorTone>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RecommendationResult {
    pub recommendation_text: String,
    pub image_prompt: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(skip)]
    pub bytes: Option<Bytes>,
    /// Set once a download attempt failed; the download control is hidden from then on.
    #[serde(skip)]
    pub download_failed: bool,
}

impl GeneratedImage {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), bytes: None, download_failed: false }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitingInput,
    GeneratingText,
    GeneratingImage,
    Complete,
}

impl Stage {
    pub fn is_generating(self) -> bool {
        matches!(self, Self::GeneratingText | Self::GeneratingImage)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub inputs: FormInputs,
    pub stage: Stage,
    pub recommendation: Option<RecommendationResult>,
    pub image: Option<GeneratedImage>,
    pub warning: Option<String>,
    pub error: Option<String>,
    pub api_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            inputs: FormInputs::default(),
            stage: Stage::AwaitingInput,
            recommendation: None,
            image: None,
            warning: None,
            error: None,
            api_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            stage: self.stage,
            style_text: self.inputs.style_text.clone(),
            season: self.inputs.season,
            occasion: self.inputs.occasion,
            color_tone: self.inputs.color_tone,
            has_photo: self.inputs.photo.is_some(),
            has_api_key: self.api_key.is_some(),
            recommendation: self.recommendation.clone(),
            image: self.image.clone(),
            download_available: self.image.as_ref().is_some_and(|img| !img.download_failed),
            warning: self.warning.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Session as returned to the browser. Never carries the photo or key.
#[derive(Debug, Serialize, Clone)]
pub struct SessionView {
    pub id: Uuid,
    pub stage: Stage,
    pub style_text: Option<String>,
    pub season: Option<Season>,
    pub occasion: Option<Occasion>,
    pub color_tone: Option<ColorTone>,
    pub has_photo: bool,
    pub has_api_key: bool,
    pub recommendation: Option<RecommendationResult>,
    pub image: Option<GeneratedImage>,
    pub download_available: bool,
    pub warning: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ApiKeyRequest {
    pub api_key: String,
}
