//! The fixed tool catalog over the backing store.
//!
//! Each handler owns its declaration and maps [`StoreError`] values to
//! structured `{ok: false}` results; the model never sees an exception.
//! The three mutating tools mint a fresh idempotency key per logical
//! invocation — the client then reuses that key verbatim across its
//! retries.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use voxline_core::ToolResult;
use voxline_core::ports::{ToolHandler, ToolSpec};

use crate::api::StoreApi;
use crate::client::StoreError;

/// Name of the terminal operator-transfer tool.
pub const TRANSFER_TOOL: &str = "transfer_to_operator";

/// Build the full catalog over one shared [`StoreApi`].
#[must_use]
pub fn all_handlers(api: Arc<StoreApi>) -> Vec<Arc<dyn ToolHandler>> {
    let mut handlers: Vec<Arc<dyn ToolHandler>> = StoreOp::ALL
        .iter()
        .map(|op| Arc::new(StoreTool::new(*op, Arc::clone(&api))) as Arc<dyn ToolHandler>)
        .collect();
    handlers.push(Arc::new(TransferToOperator::new()));
    handlers
}

// ── Backing-store tools ────────────────────────────────────────────

/// The operations backed by the store API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreOp {
    SearchProducts,
    CheckAvailability,
    CreateOrderDraft,
    GetDeliveryOptions,
    ConfirmOrder,
    ListFittingStations,
    ListFittingSlots,
    BookFitting,
    CancelFitting,
    RescheduleFitting,
    GetFittingPrice,
    SearchKnowledge,
}

impl StoreOp {
    const ALL: [Self; 12] = [
        Self::SearchProducts,
        Self::CheckAvailability,
        Self::CreateOrderDraft,
        Self::GetDeliveryOptions,
        Self::ConfirmOrder,
        Self::ListFittingStations,
        Self::ListFittingSlots,
        Self::BookFitting,
        Self::CancelFitting,
        Self::RescheduleFitting,
        Self::GetFittingPrice,
        Self::SearchKnowledge,
    ];

    const fn name(self) -> &'static str {
        match self {
            Self::SearchProducts => "search_products",
            Self::CheckAvailability => "check_availability",
            Self::CreateOrderDraft => "create_order_draft",
            Self::GetDeliveryOptions => "get_delivery_options",
            Self::ConfirmOrder => "confirm_order",
            Self::ListFittingStations => "list_fitting_stations",
            Self::ListFittingSlots => "list_fitting_slots",
            Self::BookFitting => "book_fitting",
            Self::CancelFitting => "cancel_fitting",
            Self::RescheduleFitting => "reschedule_fitting",
            Self::GetFittingPrice => "get_fitting_price",
            Self::SearchKnowledge => "search_knowledge",
        }
    }

    fn spec(self) -> ToolSpec {
        let (description, parameters) = match self {
            Self::SearchProducts => (
                "Search the tyre catalog by size, season, brand or free text.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Free-text search, e.g. '215/55 R17 winter'"},
                        "season": {"type": "string", "description": "winter | summer | all-season"},
                        "limit": {"type": "integer"}
                    },
                    "required": ["query"]
                }),
            ),
            Self::CheckAvailability => (
                "Check stock availability of one product by its id.",
                json!({
                    "type": "object",
                    "properties": {"product_id": {"type": "string"}},
                    "required": ["product_id"]
                }),
            ),
            Self::CreateOrderDraft => (
                "Create a draft order for the given products.",
                json!({
                    "type": "object",
                    "properties": {
                        "items": {"type": "array", "description": "List of {product_id, quantity}"},
                        "customer_phone": {"type": "string"}
                    },
                    "required": ["items"]
                }),
            ),
            Self::GetDeliveryOptions => (
                "List delivery options and prices for a draft order.",
                json!({
                    "type": "object",
                    "properties": {"order_id": {"type": "string"}},
                    "required": ["order_id"]
                }),
            ),
            Self::ConfirmOrder => (
                "Confirm a draft order with the chosen delivery option.",
                json!({
                    "type": "object",
                    "properties": {
                        "order_id": {"type": "string"},
                        "delivery_option": {"type": "string"}
                    },
                    "required": ["order_id"]
                }),
            ),
            Self::ListFittingStations => (
                "List tyre fitting stations.",
                json!({"type": "object", "properties": {}}),
            ),
            Self::ListFittingSlots => (
                "List free fitting slots for a station and date.",
                json!({
                    "type": "object",
                    "properties": {
                        "station_id": {"type": "string"},
                        "date": {"type": "string", "description": "YYYY-MM-DD"}
                    },
                    "required": ["station_id", "date"]
                }),
            ),
            Self::BookFitting => (
                "Book a fitting appointment in a free slot.",
                json!({
                    "type": "object",
                    "properties": {
                        "station_id": {"type": "string"},
                        "slot": {"type": "string"},
                        "customer_phone": {"type": "string"}
                    },
                    "required": ["station_id", "slot"]
                }),
            ),
            Self::CancelFitting => (
                "Cancel an existing fitting appointment.",
                json!({
                    "type": "object",
                    "properties": {"booking_id": {"type": "string"}},
                    "required": ["booking_id"]
                }),
            ),
            Self::RescheduleFitting => (
                "Move an existing fitting appointment to a new slot.",
                json!({
                    "type": "object",
                    "properties": {
                        "booking_id": {"type": "string"},
                        "slot": {"type": "string"}
                    },
                    "required": ["booking_id", "slot"]
                }),
            ),
            Self::GetFittingPrice => (
                "Get the fitting service price for a wheel size.",
                json!({
                    "type": "object",
                    "properties": {"wheel_diameter": {"type": "string"}},
                    "required": ["wheel_diameter"]
                }),
            ),
            Self::SearchKnowledge => (
                "Search the knowledge base for store policies and advice.",
                json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            ),
        };

        ToolSpec {
            name: self.name().to_string(),
            description: description.to_string(),
            parameters,
            terminal: false,
        }
    }
}

/// One catalog tool bound to the shared API.
struct StoreTool {
    spec: ToolSpec,
    op: StoreOp,
    api: Arc<StoreApi>,
}

impl StoreTool {
    fn new(op: StoreOp, api: Arc<StoreApi>) -> Self {
        Self {
            spec: op.spec(),
            op,
            api,
        }
    }

    async fn run(&self, args: &Value) -> Result<Value, StoreError> {
        match self.op {
            StoreOp::SearchProducts => self.api.search_products(args).await,
            StoreOp::CheckAvailability => {
                let product_id = required_str(args, "product_id");
                match self.api.product_availability(&product_id).await? {
                    Some(info) => Ok(info),
                    None => Ok(json!({"available": false})),
                }
            }
            StoreOp::CreateOrderDraft => {
                self.api.create_order(args.clone(), Uuid::new_v4()).await
            }
            StoreOp::GetDeliveryOptions => {
                self.api
                    .delivery_options(&required_str(args, "order_id"))
                    .await
            }
            StoreOp::ConfirmOrder => {
                let order_id = required_str(args, "order_id");
                self.api
                    .confirm_order(&order_id, args.clone(), Uuid::new_v4())
                    .await
            }
            StoreOp::ListFittingStations => self.api.fitting_stations().await,
            StoreOp::ListFittingSlots => self.api.fitting_slots(args).await,
            StoreOp::BookFitting => self.api.create_booking(args.clone(), Uuid::new_v4()).await,
            StoreOp::CancelFitting => {
                self.api
                    .cancel_booking(&required_str(args, "booking_id"))
                    .await
            }
            StoreOp::RescheduleFitting => {
                let booking_id = required_str(args, "booking_id");
                self.api.reschedule_booking(&booking_id, args.clone()).await
            }
            StoreOp::GetFittingPrice => self.api.fitting_price(args).await,
            StoreOp::SearchKnowledge => self.api.search_knowledge(args).await,
        }
    }
}

#[async_trait]
impl ToolHandler for StoreTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: Value) -> ToolResult {
        match self.run(&arguments).await {
            Ok(data) => ToolResult::success(data),
            Err(e) => {
                tracing::warn!(tool = %self.spec.name, error = %e, "Tool call failed");
                failure_result(&e)
            }
        }
    }
}

/// Required string arguments were schema-validated before dispatch; an
/// absent value here still degrades to an empty id rather than a panic.
fn required_str(args: &Value, name: &str) -> String {
    args.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Map client failures to the error kinds the model is prompted about.
fn failure_result(error: &StoreError) -> ToolResult {
    match error {
        StoreError::CircuitOpen
        | StoreError::Timeout
        | StoreError::Network(_)
        | StoreError::Status { status: 500..=599 | 429, .. } => ToolResult::failure(
            "unavailable",
            "The store service is temporarily unavailable. Offer to transfer the caller to an operator or try again later.",
        ),
        StoreError::Status { status: 404, .. } => {
            ToolResult::failure("not_found", "The requested record was not found.")
        }
        StoreError::Unauthorized | StoreError::Decode(_) | StoreError::Status { .. } => {
            ToolResult::failure("internal", "The request could not be completed.")
        }
    }
}

// ── Operator transfer ──────────────────────────────────────────────

/// Terminal tool: the agent turns this invocation into a pipeline
/// transfer signal, so `invoke` is never part of a model exchange.
struct TransferToOperator {
    spec: ToolSpec,
}

impl TransferToOperator {
    fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: TRANSFER_TOOL.to_string(),
                description:
                    "Transfer the caller to a human operator. Use when the caller asks for a person \
                     or the request cannot be completed."
                        .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "reason": {"type": "string"}
                    }
                }),
                terminal: true,
            },
        }
    }
}

#[async_trait]
impl ToolHandler for TransferToOperator {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, _arguments: Value) -> ToolResult {
        ToolResult::success(json!({"transferring": true}))
    }
}
