//! Slide skeletons built from a generated outline, for clients that render PPT or HTML.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input for the template builder.
#[derive(Debug, Clone, Deserialize)]
pub struct SlideRequest {
    /// Deck title.
    pub title: String,
    /// Outline as returned by the RAG query; only `sections` is read.
    #[serde(default)]
    pub outline: Value,
    /// Optional theme, shown as the title slide subtitle.
    #[serde(default)]
    pub theme: Option<String>,
}

/// One slide of the skeleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Slide {
    /// Opening slide.
    Title {
        /// Deck title.
        title: String,
        /// Theme or empty.
        subtitle: String,
    },
    /// One outline section.
    Content {
        /// Section title.
        title: String,
        /// Section bullets.
        bullets: Vec<String>,
        /// Worked examples.
        examples: Vec<String>,
    },
    /// Wrap-up slide.
    Closing {
        /// Slide title.
        title: String,
        /// Prompts for the class.
        bullets: Vec<String>,
    },
}

/// Slide deck returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlideDeck {
    /// Slides in presentation order.
    pub slides: Vec<Slide>,
}

/// Build a title slide, one content slide per outline section and a closing slide.
///
/// Missing or malformed section fields become empty values rather than errors.
pub fn build_deck(request: &SlideRequest) -> SlideDeck {
    let mut slides = vec![Slide::Title {
        title: request.title.clone(),
        subtitle: request.theme.clone().unwrap_or_default(),
    }];

    let sections = request
        .outline
        .get("sections")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    slides.extend(sections.iter().map(|section| Slide::Content {
        title: section
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        bullets: strings(section.get("bullets")),
        examples: strings(section.get("examples")),
    }));

    slides.push(Slide::Closing {
        title: "Summary".into(),
        bullets: vec!["Questions?".into(), "Practice exercises".into()],
    });
    SlideDeck { slides }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(text) => Some(text.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}
