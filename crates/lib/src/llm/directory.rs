//! Model directory: which models the inference server has, and which one chat uses.
//!
//! Selection comes from config and never depends on the listing; the listing only
//! produces warnings (nothing installed, configured model missing).

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::backend::{ChatBackend, ModelDescriptor};

pub const NO_MODELS_WARNING: &str = "You have not pulled any model from Ollama yet!";

const MODEL_LIBRARY_URL: &str = "https://ollama.com/library";

/// How to install a model outside this program.
pub fn install_hint(model: &str) -> String {
    format!(
        "Run `ollama pull {}` or pick a model from {} to download one.",
        model, MODEL_LIBRARY_URL
    )
}

/// Outcome of one listing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelListing {
    Available(Vec<ModelDescriptor>),
    /// The server answered but has no models installed.
    Empty,
    /// The server could not be queried.
    Unreachable(String),
}

impl ModelListing {
    pub fn models(&self) -> &[ModelDescriptor] {
        match self {
            ModelListing::Available(models) => models,
            _ => &[],
        }
    }
}

/// Listing plus selection, as shown to the user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelReport {
    pub models: Vec<ModelDescriptor>,
    pub selected: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ModelDirectory {
    backend: Arc<dyn ChatBackend>,
    selected: String,
    last: RwLock<Option<ModelListing>>,
}

impl ModelDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>, selected: impl Into<String>) -> Self {
        Self {
            backend,
            selected: selected.into(),
            last: RwLock::new(None),
        }
    }

    /// Configured model used for every chat turn.
    pub fn selected(&self) -> &str {
        &self.selected
    }

    /// Query the server and remember the outcome.
    pub async fn refresh(&self) -> ModelListing {
        let listing = match self.backend.list_models().await {
            Ok(models) if models.is_empty() => {
                log::warn!("{}", NO_MODELS_WARNING);
                ModelListing::Empty
            }
            Ok(models) => {
                if !models.iter().any(|m| m.name == self.selected) {
                    log::warn!(
                        "configured model {} is not installed; chat requests will likely fail",
                        self.selected
                    );
                }
                log::info!("model discovery found {} model(s)", models.len());
                ModelListing::Available(models)
            }
            Err(e) => {
                log::debug!("model discovery failed: {}", e);
                ModelListing::Unreachable(e.to_string())
            }
        };
        *self.last.write().await = Some(listing.clone());
        listing
    }

    /// Outcome of the most recent [`refresh`](Self::refresh), if any.
    pub async fn last_listing(&self) -> Option<ModelListing> {
        self.last.read().await.clone()
    }

    /// True only when the server is known to have nothing installed.
    pub async fn known_empty(&self) -> bool {
        matches!(self.last_listing().await, Some(ModelListing::Empty))
    }

    /// True when chat must be refused because nothing is installed. A cached empty
    /// listing is re-queried first, so a model pulled since then unblocks chat.
    pub async fn chat_blocked(&self) -> bool {
        if !self.known_empty().await {
            return false;
        }
        self.refresh().await == ModelListing::Empty
    }

    pub fn report(&self, listing: &ModelListing) -> ModelReport {
        let mut report = ModelReport {
            models: listing.models().to_vec(),
            selected: self.selected.clone(),
            warning: None,
            install_hint: None,
            error: None,
        };
        match listing {
            ModelListing::Empty => {
                report.warning = Some(NO_MODELS_WARNING.to_string());
                report.install_hint = Some(install_hint(&self.selected));
            }
            ModelListing::Available(models) => {
                if !models.iter().any(|m| m.name == self.selected) {
                    report.warning = Some(format!(
                        "Configured model {} is not installed locally.",
                        self.selected
                    ));
                    report.install_hint = Some(install_hint(&self.selected));
                }
            }
            ModelListing::Unreachable(e) => {
                report.error = Some(format!("Could not reach the inference server: {}", e));
            }
        }
        report
    }
}
