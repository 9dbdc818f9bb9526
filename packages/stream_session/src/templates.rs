use serde::{Deserialize, Serialize};

use crate::types::Collection;

/// Locally generated answer texts.
///
/// Context templates may use `{product}` and `{version}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplates {
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_empty_query")]
    pub empty_query: String,
    #[serde(default = "default_context_changed")]
    pub context_changed: String,
    #[serde(default = "default_no_context")]
    pub no_context: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            empty_query: default_empty_query(),
            context_changed: default_context_changed(),
            no_context: default_no_context(),
        }
    }
}

fn default_greeting() -> String {
    "Hi! I am your documentation assistant. How can I help you today?".to_string()
}

fn default_empty_query() -> String {
    "Please enter a query...".to_string()
}

fn default_context_changed() -> String {
    "We are now discussing {product} version {version}. What would you like to know?".to_string()
}

fn default_no_context() -> String {
    "We are no longer discussing a specific product. Ask me anything!".to_string()
}

impl MessageTemplates {
    /// The system message announcing a new product/version context.
    pub fn context_message(&self, collection: &Collection, version: &str) -> String {
        if collection.is_none() {
            return self.no_context.clone();
        }
        self.context_changed
            .replace("{product}", &collection.collection_full_name)
            .replace("{version}", version)
    }
}
