use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;
use serde_json::Value;

use crate::download::DownloadReceipt;
use crate::error::{Error, Result};
use crate::form::FormModel;
use crate::handler::FLASH_KEY;
use crate::helper::{escape_html, format_size};

pub const INDEX_VIEW: &str = "index";

/// Template data handed to a view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewContext {
    pub model: FormModel,
    pub flash: BTreeMap<String, Value>,
}

pub trait ViewRenderer: Send + Sync {
    fn render(&self, view: &str, context: &ViewContext) -> Result<String>;
}

/// Renders the built-in HTML views.
#[derive(Debug, Clone)]
pub struct HtmlViewRenderer {
    files_prefix: String,
}

impl HtmlViewRenderer {
    pub fn new(files_prefix: impl Into<String>) -> Self {
        Self {
            files_prefix: files_prefix.into(),
        }
    }

    fn render_index(&self, context: &ViewContext) -> String {
        let mut html = String::new();
        html.push_str(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Download</title></head>\n<body>\n<h1>Download</h1>\n",
        );

        if let Some(flash) = context.flash.get(FLASH_KEY) {
            self.render_banner(&mut html, flash);
        }

        let model = &context.model;
        let name = escape_html(&model.name);
        html.push_str("<form method=\"post\">\n");
        for (field, label) in [("url", "URL"), ("filename", "Save as")] {
            let value = model.fields.get(field).map(String::as_str).unwrap_or("");
            let _ = writeln!(
                html,
                "<div class=\"field\"><label for=\"{name}-{field}\">{label}</label> <input id=\"{name}-{field}\" type=\"text\" name=\"{name}[{field}]\" value=\"{}\">",
                escape_html(value),
            );
            for message in model.errors.get(field).into_iter().flatten() {
                let _ = writeln!(html, "<p class=\"error\">{}</p>", escape_html(message));
            }
            html.push_str("</div>\n");
        }
        html.push_str("<button type=\"submit\">Download</button>\n</form>\n</body>\n</html>\n");
        html
    }

    fn render_banner(&self, html: &mut String, flash: &Value) {
        let receipt = serde_json::from_value::<FormModel>(flash.clone())
            .ok()
            .and_then(|m| m.result)
            .and_then(|r| serde_json::from_value::<DownloadReceipt>(r).ok());

        match receipt {
            Some(receipt) => {
                let _ = writeln!(
                    html,
                    "<div class=\"flash success\">Downloaded <a href=\"{}/{}\">{}</a> ({}), SHA-256 <code>{}</code></div>",
                    self.files_prefix,
                    escape_html(&receipt.filename),
                    escape_html(&receipt.filename),
                    format_size(receipt.size),
                    escape_html(&receipt.checksum),
                );
            }
            None => html.push_str("<div class=\"flash success\">Download complete.</div>\n"),
        }
    }
}

impl Default for HtmlViewRenderer {
    fn default() -> Self {
        Self::new("/files")
    }
}

impl ViewRenderer for HtmlViewRenderer {
    fn render(&self, view: &str, context: &ViewContext) -> Result<String> {
        match view {
            INDEX_VIEW => Ok(self.render_index(context)),
            other => Err(Error::ViewNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn model_with(url: &str, error: Option<&str>) -> FormModel {
        let mut model = FormModel::new("DownloadForm");
        model.fields.insert("url".to_string(), url.to_string());
        if let Some(error) = error {
            model.errors.insert("url".to_string(), vec![error.to_string()]);
        }
        model
    }

    #[test]
    fn test_index_shows_values_and_errors_escaped() {
        let renderer = HtmlViewRenderer::default();
        let context = ViewContext {
            model: model_with("http://x/<script>", Some("Url is not a valid URL.")),
            flash: BTreeMap::new(),
        };

        let html = renderer.render(INDEX_VIEW, &context).unwrap();
        assert!(html.contains("name=\"DownloadForm[url]\""));
        assert!(html.contains("value=\"http://x/&lt;script&gt;\""));
        assert!(html.contains("<p class=\"error\">Url is not a valid URL.</p>"));
        assert!(!html.contains("flash"));
    }

    #[test]
    fn test_index_shows_banner_from_flash() {
        let receipt = DownloadReceipt {
            filename: "report.pdf".to_string(),
            size: 2048,
            checksum: "abc123".to_string(),
            content_type: "application/pdf".to_string(),
            completed_at: Utc::now(),
        };
        let mut flashed = model_with("http://x/report.pdf", None);
        flashed.result = Some(serde_json::to_value(&receipt).unwrap());

        let mut flash = BTreeMap::new();
        flash.insert(FLASH_KEY.to_string(), serde_json::to_value(&flashed).unwrap());
        let context = ViewContext {
            model: FormModel::new("DownloadForm"),
            flash,
        };

        let html = HtmlViewRenderer::default().render(INDEX_VIEW, &context).unwrap();
        assert!(html.contains("<a href=\"/files/report.pdf\">report.pdf</a>"));
        assert!(html.contains("2.0 KiB"));
        assert!(html.contains("<code>abc123</code>"));
    }

    #[test]
    fn test_banner_tolerates_foreign_flash_payload() {
        let mut flash = BTreeMap::new();
        flash.insert(FLASH_KEY.to_string(), json!("done"));
        let context = ViewContext {
            model: FormModel::new("DownloadForm"),
            flash,
        };

        let html = HtmlViewRenderer::default().render(INDEX_VIEW, &context).unwrap();
        assert!(html.contains("Download complete."));
    }

    #[test]
    fn test_unknown_view_is_an_error() {
        let err = HtmlViewRenderer::default()
            .render("missing", &ViewContext::default())
            .unwrap_err();
        assert!(matches!(err, Error::ViewNotFound(name) if name == "missing"));
    }
}
