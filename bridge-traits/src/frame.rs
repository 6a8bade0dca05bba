//! Hidden frame hosting for prompt-less authorization requests.
//!
//! A [`FrameHost`] loads a URL somewhere the user cannot see it (a hidden
//! iframe in browsers) and hands back a [`FrameSession`]: the stream of
//! messages posted back by the loaded document plus a teardown hook that
//! detaches the listener and the frame.

use futures::channel::mpsc::UnboundedReceiver;

use crate::error::Result;
use crate::platform::{DynTeardown, PlatformSendSync};

/// One loaded frame and the messages it posts to its parent.
///
/// Dropping the session runs the teardown exactly once, whatever the outcome
/// of the attempt. Messages posted after that are discarded by the host.
pub struct FrameSession {
    messages: UnboundedReceiver<String>,
    teardown: Option<DynTeardown>,
}

impl FrameSession {
    pub fn new(messages: UnboundedReceiver<String>, teardown: DynTeardown) -> Self {
        Self {
            messages,
            teardown: Some(teardown),
        }
    }

    /// Mutable access to the raw message stream.
    pub fn messages(&mut self) -> &mut UnboundedReceiver<String> {
        &mut self.messages
    }
}

impl Drop for FrameSession {
    fn drop(&mut self) {
        self.messages.close();
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl std::fmt::Debug for FrameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSession")
            .field("attached", &self.teardown.is_some())
            .finish()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait FrameHost: PlatformSendSync {
    /// Load `url` into a hidden frame and start listening for messages.
    async fn open(&self, url: &str) -> Result<FrameSession>;
}
