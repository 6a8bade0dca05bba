//! Conversion of JavaScript exceptions into bridge errors.

use bridge_traits::error::BridgeError;
use wasm_bindgen::{JsCast, JsValue};

/// Flatten a thrown `JsValue` into a [`BridgeError::OperationFailed`].
pub(crate) fn js_error(context: &str, err: JsValue) -> BridgeError {
    let message = if err.is_string() {
        err.as_string().unwrap_or_default()
    } else if let Some(js_err) = err.dyn_ref::<js_sys::Error>() {
        js_err.message().into()
    } else {
        format!("{err:?}")
    };
    BridgeError::OperationFailed(format!("{context}: {message}"))
}

pub(crate) fn window() -> Result<web_sys::Window, BridgeError> {
    web_sys::window().ok_or_else(|| BridgeError::NotAvailable("window".to_string()))
}
