//! Built-in diagnostic service registered by the `courierd` binary.

use serde_json::{Value, json};

use crate::dispatch::{Service, binary, nullary, unary};

/// Class name of the diagnostic service.
pub const ECHO_SERVICE: &str = "courier.Echo";

/// Diagnostic service answering `echo`, `add` and `whoami`.
#[must_use]
pub fn echo_service() -> Service {
    Service::new(ECHO_SERVICE)
        .method("echo", &["object"], unary(|_context, value: Value| Ok(value)))
        .method(
            "add",
            &["long", "long"],
            binary(|_context, left: i64, right: i64| Ok(left.saturating_add(right))),
        )
        .method(
            "whoami",
            &[],
            nullary(|context| {
                Ok(json!({
                    "client_id": context.client_id(),
                    "request_id": context.request_id(),
                    "chain_id": context.chain().chain_id(),
                    "chain_order": context.chain().chain_order(),
                }))
            }),
        )
}
