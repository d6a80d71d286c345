//! Combiners fold several text sources into one piece of content.

pub mod css;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinerKind {
    /// Merges rules that share a selector or media query
    Css,
}

impl CombinerKind {
    pub fn mime(self) -> &'static str {
        match self {
            CombinerKind::Css => "text/css",
        }
    }

    pub fn combine(self, texts: &[String]) -> String {
        match self {
            CombinerKind::Css => {
                let mut sheet = css::Stylesheet::default();
                for text in texts {
                    sheet.merge(css::Stylesheet::parse(text));
                }
                sheet.to_string()
            }
        }
    }
}
