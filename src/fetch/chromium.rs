//! Headless Chromium engine (chromiumoxide)

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, GetResponseBodyParams, ResourceType,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::{FutureExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::render::{RenderEngine, RenderError, RenderSession, RenderedPage};
use crate::config::RelayConfig;
use crate::jobs::{CookieMap, HeadersMap, Resource};

/// Launches one browser per session so cookies and cache never cross jobs.
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    ignore_tls_errors: bool,
}

impl ChromiumEngine {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            ignore_tls_errors: !config.verify_tls,
        }
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn open(&self, user_agent: &str) -> Result<Box<dyn RenderSession>, RenderError> {
        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={user_agent}"));
        if self.ignore_tls_errors {
            builder = builder.arg("--ignore-certificate-errors");
        }
        let config = builder.build().map_err(RenderError::Unavailable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Unavailable(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                handler.abort();
                return Err(RenderError::Unavailable(err.to_string()));
            }
        };

        Ok(Box::new(ChromiumSession {
            id: Uuid::new_v4().simple().to_string(),
            browser,
            page,
            handler,
        }))
    }
}

pub struct ChromiumSession {
    id: String,
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumSession {
    async fn body_of(&self, event: &EventResponseReceived) -> Option<Vec<u8>> {
        let response = self
            .page
            .execute(GetResponseBodyParams::new(event.request_id.clone()))
            .await
            .ok()?;
        if response.result.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(&response.result.body)
                .ok()
        } else {
            Some(response.result.body.clone().into_bytes())
        }
    }
}

#[async_trait]
impl RenderSession for ChromiumSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(&mut self, url: &str) -> Result<RenderedPage, RenderError> {
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        self.page
            .goto(url)
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        // Everything the load triggered is already buffered in the listener.
        let mut received: Vec<Arc<EventResponseReceived>> = Vec::new();
        while let Some(Some(event)) = responses.next().now_or_never() {
            received.push(event);
        }

        let mut page = RenderedPage {
            status: 200,
            ..RenderedPage::default()
        };
        let mut document_seen = false;
        for event in &received {
            if !document_seen && event.r#type == ResourceType::Document {
                document_seen = true;
                page.status = u16::try_from(event.response.status).unwrap_or(200);
                page.headers = flatten_headers(&event.response.headers);
                continue;
            }
            if let Some(content) = self.body_of(event).await {
                let index = page.resources.len();
                page.resources.push(Resource { index, content });
            }
        }

        page.content = self.page.content().await.ok().map(String::into_bytes);
        page.cookies = self
            .page
            .get_cookies()
            .await
            .map(|cookies| {
                cookies
                    .into_iter()
                    .map(|cookie| (cookie.name, cookie.value))
                    .collect::<CookieMap>()
            })
            .unwrap_or_default();

        debug!(
            session = %self.id,
            status = page.status,
            resources = page.resources.len(),
            "Page rendered"
        );
        Ok(page)
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), RenderError> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map(|_| ())
            .map_err(|e| RenderError::Screenshot(e.to_string()))
    }

    async fn close(self: Box<Self>) {
        let ChromiumSession {
            mut browser,
            page,
            handler,
            ..
        } = *self;
        let _ = page.close().await;
        let _ = browser.close().await;
        let _ = browser.wait().await;
        handler.abort();
    }
}

fn flatten_headers<T: serde::Serialize>(headers: &T) -> HeadersMap {
    let Ok(serde_json::Value::Object(map)) = serde_json::to_value(headers) else {
        return HeadersMap::new();
    };
    map.into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(value) => value,
                other => other.to_string(),
            };
            (name.to_ascii_lowercase(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_headers() {
        let headers = json!({"Content-Type": "text/html", "X-Count": 3});
        let flat = flatten_headers(&headers);
        assert_eq!(flat["content-type"], "text/html");
        assert_eq!(flat["x-count"], "3");
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_render_data_url() {
        let engine = ChromiumEngine::new(&RelayConfig::default());
        let mut session = engine.open("TestAgent/1.0").await.unwrap();
        let page = session
            .navigate("data:text/html,<h1>Hello</h1>")
            .await
            .unwrap();
        assert!(page.content.is_some());
        session.close().await;
    }
}
