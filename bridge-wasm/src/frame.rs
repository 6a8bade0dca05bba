//! Hidden iframe [`FrameHost`] for prompt-less authorization.
//!
//! Layout on the page:
//!
//! ```text
//! top window
//! └── iframe#rpIFrame           (persistent, hidden, about:blank)
//!     └── iframe                (one per attempt, src = authorize URL)
//! ```
//!
//! The callback page loaded into the inner frame posts its result to
//! `window.parent`, which is the relying-party frame. The listener therefore
//! sits on the relying-party frame's window, not on the top window.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    frame::{FrameHost, FrameSession},
};
use futures::channel::mpsc;
use tracing::debug;
use wasm_bindgen::{closure::Closure, JsCast};
use web_sys::{Document, HtmlIFrameElement, MessageEvent, Window};

use crate::error::{js_error, window};

const DEFAULT_RP_FRAME_ID: &str = "rpIFrame";
const HIDDEN_STYLE: &str = "display:none;width:0;height:0;border:0";

/// Browser frame host built from nested hidden iframes.
pub struct IframeFrameHost {
    window: Window,
    rp_frame_id: String,
}

impl IframeFrameHost {
    /// Host bound to the current window, using `#rpIFrame` as the outer frame.
    pub fn new() -> BridgeResult<Self> {
        Ok(Self {
            window: window()?,
            rp_frame_id: DEFAULT_RP_FRAME_ID.to_string(),
        })
    }

    /// Use a different element id for the persistent outer frame.
    pub fn with_rp_frame_id(mut self, id: impl Into<String>) -> Self {
        self.rp_frame_id = id.into();
        self
    }

    fn create_hidden_frame(document: &Document) -> BridgeResult<HtmlIFrameElement> {
        let frame = document
            .create_element("iframe")
            .map_err(|err| js_error("create iframe", err))?
            .dyn_into::<HtmlIFrameElement>()
            .map_err(|_| BridgeError::OperationFailed("iframe element has wrong type".into()))?;

        frame
            .set_attribute("style", HIDDEN_STYLE)
            .map_err(|err| js_error("style iframe", err))?;
        frame
            .set_attribute("aria-hidden", "true")
            .map_err(|err| js_error("style iframe", err))?;

        Ok(frame)
    }

    /// Find the persistent outer frame, creating it on first use.
    fn rp_frame(&self, document: &Document) -> BridgeResult<HtmlIFrameElement> {
        if let Some(existing) = document.get_element_by_id(&self.rp_frame_id) {
            return existing.dyn_into::<HtmlIFrameElement>().map_err(|_| {
                BridgeError::OperationFailed(format!("#{} is not an iframe", self.rp_frame_id))
            });
        }

        let frame = Self::create_hidden_frame(document)?;
        frame.set_id(&self.rp_frame_id);

        let body = document
            .body()
            .ok_or_else(|| BridgeError::NotAvailable("document.body".into()))?;
        body.append_child(&frame)
            .map_err(|err| js_error("attach relying-party frame", err))?;

        debug!(id = %self.rp_frame_id, "Created relying-party frame");
        Ok(frame)
    }
}

#[async_trait(?Send)]
impl FrameHost for IframeFrameHost {
    async fn open(&self, url: &str) -> BridgeResult<FrameSession> {
        let document = self
            .window
            .document()
            .ok_or_else(|| BridgeError::NotAvailable("document".into()))?;

        let rp_frame = self.rp_frame(&document)?;
        let rp_window = rp_frame
            .content_window()
            .ok_or_else(|| BridgeError::NotAvailable("relying-party frame window".into()))?;
        let rp_document = rp_frame
            .content_document()
            .ok_or_else(|| BridgeError::NotAvailable("relying-party frame document".into()))?;

        let prompt_frame = Self::create_hidden_frame(&rp_document)?;
        prompt_frame.set_src(url);

        let (tx, rx) = mpsc::unbounded::<String>();

        // Structured payloads are re-serialized so the core sees one wire format.
        let listener = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            let data = event.data();
            let payload = data.as_string().or_else(|| {
                js_sys::JSON::stringify(&data)
                    .ok()
                    .and_then(|text| text.as_string())
            });

            if let Some(payload) = payload {
                let _ = tx.unbounded_send(payload);
            }
        });

        let container = rp_document
            .body()
            .ok_or_else(|| BridgeError::NotAvailable("relying-party frame body".into()))?;
        container
            .append_child(&prompt_frame)
            .map_err(|err| js_error("attach prompt frame", err))?;

        if let Err(err) = rp_window
            .add_event_listener_with_callback("message", listener.as_ref().unchecked_ref())
        {
            prompt_frame.remove();
            return Err(js_error("add message listener", err));
        }

        debug!("Prompt frame loading");

        let teardown = Box::new(move || {
            let _ = rp_window
                .remove_event_listener_with_callback("message", listener.as_ref().unchecked_ref());
            prompt_frame.remove();
            drop(listener);
            debug!("Prompt frame removed");
        });

        Ok(FrameSession::new(rx, teardown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    async fn test_open_nests_frame_and_drop_removes_it() {
        let host = IframeFrameHost::new()
            .unwrap()
            .with_rp_frame_id("rpIFrame-test");

        let session = host.open("about:blank").await.unwrap();

        let document = web_sys::window().unwrap().document().unwrap();
        let rp_frame = document
            .get_element_by_id("rpIFrame-test")
            .unwrap()
            .dyn_into::<HtmlIFrameElement>()
            .unwrap();
        let rp_body = rp_frame.content_document().unwrap().body().unwrap();
        assert_eq!(rp_body.child_element_count(), 1);

        drop(session);
        assert_eq!(rp_body.child_element_count(), 0);
    }
}
