//! Typed wrappers over the fixed backing-store endpoint inventory.
//!
//! The backend speaks JSON end to end and the results flow straight into
//! tool-result turns, so responses stay `serde_json::Value` rather than
//! being decoded into structs and re-encoded a line later.

use serde_json::Value;
use uuid::Uuid;

use crate::client::{RequestSpec, StoreClient, StoreError};

/// The endpoint inventory as tool handlers consume it.
pub struct StoreApi {
    client: StoreClient,
}

impl StoreApi {
    #[must_use]
    pub const fn new(client: StoreClient) -> Self {
        Self { client }
    }

    #[must_use]
    pub const fn client(&self) -> &StoreClient {
        &self.client
    }

    // ── Products ───────────────────────────────────────────────────

    /// `GET /products/search` — full-text catalog search.
    pub async fn search_products(&self, params: &Value) -> Result<Value, StoreError> {
        let query = query_string(params);
        self.client
            .send(RequestSpec::get(format!("/products/search{query}")))
            .await
            .map(unwrap_found)
    }

    /// `GET /tires/{id}/availability` — `Ok(None)` means not available,
    /// which the backend reports as 404.
    pub async fn product_availability(&self, product_id: &str) -> Result<Option<Value>, StoreError> {
        self.client
            .send(RequestSpec::get(format!("/tires/{product_id}/availability")).not_found_ok())
            .await
    }

    // ── Orders ─────────────────────────────────────────────────────

    /// `POST /orders` — create a draft order. Mutating: carries the
    /// caller-provided idempotency key.
    pub async fn create_order(&self, draft: Value, key: Uuid) -> Result<Value, StoreError> {
        self.client
            .send(RequestSpec::post("/orders", draft).idempotent(key))
            .await
            .map(unwrap_found)
    }

    /// `GET /orders/{id}/delivery-options`.
    pub async fn delivery_options(&self, order_id: &str) -> Result<Value, StoreError> {
        self.client
            .send(RequestSpec::get(format!("/orders/{order_id}/delivery-options")))
            .await
            .map(unwrap_found)
    }

    /// `POST /orders/{id}/confirm` — mutating, idempotent.
    pub async fn confirm_order(
        &self,
        order_id: &str,
        details: Value,
        key: Uuid,
    ) -> Result<Value, StoreError> {
        self.client
            .send(RequestSpec::post(format!("/orders/{order_id}/confirm"), details).idempotent(key))
            .await
            .map(unwrap_found)
    }

    // ── Fitting appointments ───────────────────────────────────────

    /// `GET /fitting/stations`.
    pub async fn fitting_stations(&self) -> Result<Value, StoreError> {
        self.client
            .send(RequestSpec::get("/fitting/stations"))
            .await
            .map(unwrap_found)
    }

    /// `GET /fitting/slots` — free slots for a station and date.
    pub async fn fitting_slots(&self, params: &Value) -> Result<Value, StoreError> {
        let query = query_string(params);
        self.client
            .send(RequestSpec::get(format!("/fitting/slots{query}")))
            .await
            .map(unwrap_found)
    }

    /// `POST /fitting/bookings` — mutating, idempotent.
    pub async fn create_booking(&self, booking: Value, key: Uuid) -> Result<Value, StoreError> {
        self.client
            .send(RequestSpec::post("/fitting/bookings", booking).idempotent(key))
            .await
            .map(unwrap_found)
    }

    /// `POST /fitting/bookings/{id}/cancel`.
    pub async fn cancel_booking(&self, booking_id: &str) -> Result<Value, StoreError> {
        self.client
            .send(RequestSpec::post(
                format!("/fitting/bookings/{booking_id}/cancel"),
                Value::Null,
            ))
            .await
            .map(unwrap_found)
    }

    /// `POST /fitting/bookings/{id}/reschedule`.
    pub async fn reschedule_booking(
        &self,
        booking_id: &str,
        slot: Value,
    ) -> Result<Value, StoreError> {
        self.client
            .send(RequestSpec::post(
                format!("/fitting/bookings/{booking_id}/reschedule"),
                slot,
            ))
            .await
            .map(unwrap_found)
    }

    /// `GET /fitting/price`.
    pub async fn fitting_price(&self, params: &Value) -> Result<Value, StoreError> {
        let query = query_string(params);
        self.client
            .send(RequestSpec::get(format!("/fitting/price{query}")))
            .await
            .map(unwrap_found)
    }

    // ── Knowledge base ─────────────────────────────────────────────

    /// `GET /knowledge/search`.
    pub async fn search_knowledge(&self, params: &Value) -> Result<Value, StoreError> {
        let query = query_string(params);
        self.client
            .send(RequestSpec::get(format!("/knowledge/search{query}")))
            .await
            .map(unwrap_found)
    }
}

/// 404 reached an endpoint without `not_found_ok`; treat the absent body
/// as an empty object so callers see one shape.
fn unwrap_found(value: Option<Value>) -> Value {
    value.unwrap_or(Value::Null)
}

/// Render flat tool arguments as a query string. Nested values are not
/// produced by the declared tool schemas.
fn query_string(params: &Value) -> String {
    let Some(object) = params.as_object() else {
        return String::new();
    };
    let pairs: Vec<String> = object
        .iter()
        .map(|(name, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{name}={}", urlencoding::encode(&rendered))
        })
        .collect();
    if pairs.is_empty() {
        String::new()
    } else {
        format!("?{}", pairs.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_string_renders_flat_arguments() {
        let params = json!({"query": "winter tyres", "limit": 5});
        let rendered = query_string(&params);
        assert!(rendered.starts_with('?'));
        assert!(rendered.contains("query=winter%20tyres"));
        assert!(rendered.contains("limit=5"));
    }

    #[test]
    fn query_string_of_empty_object_is_empty() {
        assert_eq!(query_string(&json!({})), "");
        assert_eq!(query_string(&Value::Null), "");
    }

    #[test]
    fn query_string_escapes_reserved_characters() {
        let rendered = query_string(&json!({"query": "215/55 R17"}));
        assert_eq!(rendered, "?query=215%2F55%20R17");
    }
}
