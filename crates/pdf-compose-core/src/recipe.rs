//! Compose recipe: the JSON document describing layers, fonts and elements.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A source document merged onto every output page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub url: String,
}

/// A font file available to text elements under `family`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontRef {
    pub family: String,
    pub url: String,
}

/// Which output pages an element is drawn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSelector {
    /// A single zero-based page
    Index(usize),
    /// Every page
    All,
}

impl PageSelector {
    pub const fn matches(self, page: usize) -> bool {
        match self {
            Self::Index(index) => index == page,
            Self::All => true,
        }
    }
}

impl Serialize for PageSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Index(index) => serializer.serialize_u64(*index as u64),
            Self::All => serializer.serialize_str("all"),
        }
    }
}

impl<'de> Deserialize<'de> for PageSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        let invalid = |value: String| -> D::Error {
            serde::de::Error::custom(format!("page must be a whole number or \"all\", got {value}"))
        };

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => page_index(value)
                .map(Self::Index)
                .ok_or_else(|| invalid(value.to_string())),
            Raw::Text(text) if text == "all" => Ok(Self::All),
            // Numeric strings name the same page as the number they spell
            Raw::Text(text) => text
                .trim()
                .parse()
                .ok()
                .and_then(page_index)
                .map(Self::Index)
                .ok_or_else(|| invalid(format!("\"{text}\""))),
        }
    }
}

/// A JSON number as a page index: `1` and `1.0` are the same page.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn page_index(value: f64) -> Option<usize> {
    let whole = value.is_finite() && value >= 0.0 && value.fract() == 0.0;
    (whole && value <= usize::MAX as f64).then_some(value as usize)
}

/// Fields shared by every element kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub page: PageSelector,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    /// Degrees, clockwise-positive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f32>,
}

impl Placement {
    pub fn rotation(&self) -> f32 {
        self.rotation.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    #[serde(flatten)]
    pub placement: Placement,
    pub text: String,
    /// Font family, as declared in the recipe fonts
    pub font: String,
    pub size: f32,
    /// "c,m,y,k" with components 0-100
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<TextAlign>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageElement {
    #[serde(flatten)]
    pub placement: Placement,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlElement {
    #[serde(flatten)]
    pub placement: Placement,
    pub html: String,
    /// Width of the rendered fragment page, in points
    pub page_width: f32,
    /// Height of the rendered fragment page, in points
    pub page_height: f32,
}

/// A positioned drawable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Text(TextElement),
    Image(ImageElement),
    Html(HtmlElement),
}

impl Element {
    pub const fn placement(&self) -> &Placement {
        match self {
            Self::Text(el) => &el.placement,
            Self::Image(el) => &el.placement,
            Self::Html(el) => &el.placement,
        }
    }

    /// Whether this element is drawn on zero-based page `page`.
    pub const fn applies_to(&self, page: usize) -> bool {
        self.placement().page.matches(page)
    }
}

/// Everything needed to compose one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub layers: Vec<Layer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fonts: Vec<FontRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<Element>,
}

impl Recipe {
    /// Parse a recipe from JSON and validate it.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let recipe: Self =
            serde_json::from_slice(json).map_err(|e| Error::RecipeParse(e.to_string()))?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::InvalidRecipe(
                "at least one layer is required".to_string(),
            ));
        }

        for element in &self.elements {
            if let Element::Text(text) = element {
                if !self.fonts.iter().any(|f| f.family == text.font) {
                    return Err(Error::FontNotLoaded(text.font.clone()));
                }
                if text.size <= 0.0 {
                    return Err(Error::InvalidRecipe(format!(
                        "text element font size must be positive, got {}",
                        text.size
                    )));
                }
            }
        }

        Ok(())
    }

    /// Elements drawn on `page`, in recipe order.
    pub fn elements_for_page(&self, page: usize) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(move |el| el.applies_to(page))
    }

    /// Distinct image URLs, in first-use order.
    pub fn image_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();
        for element in &self.elements {
            if let Element::Image(image) = element
                && !urls.contains(&image.url.as_str())
            {
                urls.push(&image.url);
            }
        }
        urls
    }

    pub fn html_elements(&self) -> impl Iterator<Item = &HtmlElement> {
        self.elements.iter().filter_map(|el| match el {
            Element::Html(html) => Some(html),
            _ => None,
        })
    }
}
