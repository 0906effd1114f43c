use std::sync::Arc;

use axum::http::Method;
use log::info;

use crate::error::Result;
use crate::flash::FlashStore;
use crate::form::{FormData, FormFactory};
use crate::view::{ViewContext, INDEX_VIEW};

/// Flash key under which a successful submission is stored.
pub const FLASH_KEY: &str = "downloadForm";

/// What the index action decided to answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Redirect back to the same endpoint.
    Refresh,
    Render {
        view: &'static str,
        context: ViewContext,
    },
}

/// Validate, download, then redirect; anything short of full success
/// re-renders the form.
pub struct FormSubmissionHandler {
    forms: Arc<dyn FormFactory>,
    flash: Arc<dyn FlashStore>,
}

impl FormSubmissionHandler {
    pub fn new(forms: Arc<dyn FormFactory>, flash: Arc<dyn FlashStore>) -> Self {
        Self { forms, flash }
    }

    pub async fn handle(
        &self,
        method: &Method,
        body: Option<&FormData>,
        session: &str,
    ) -> Result<Outcome> {
        let mut form = self.forms.create();

        if *method == Method::POST {
            if let Some(data) = body {
                if form.load(data) && form.download().await? {
                    let model = form.model();
                    self.flash
                        .set(session, FLASH_KEY, serde_json::to_value(&model)?)
                        .await?;
                    info!("Download form submitted for session {}", session);
                    return Ok(Outcome::Refresh);
                }
            }
        }

        let flash = self.flash.take_all(session).await?;
        Ok(Outcome::Render {
            view: INDEX_VIEW,
            context: ViewContext {
                model: form.model(),
                flash,
            },
        })
    }
}
