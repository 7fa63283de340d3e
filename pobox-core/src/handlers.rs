//! Dispatch for inbound `/game-control` frames.
//!
//! Malformed JSON and unintelligible shapes are dropped without a reply
//! (the client is buggy; there is nothing useful to say to it), but every
//! well-formed client request gets either a response frame or, for
//! fire-and-forget kinds, nothing. Until a session registers, the only
//! typed frame honored is `register`; admin frames are a separate
//! source-checked shape and bypass the session state machine.

use pobox_api::{
    AdminFrame, ClientFrame, Inbound, PlayerId, PoNumber, ServerFrame,
};
use pobox_api::order::{OrderData, OrderMeta};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{router::SessionId, server::ControlState};

pub async fn handle_text(
    state: &ControlState,
    session: SessionId,
    text: &str,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            return debug!("{session}: ignoring malformed JSON: {err}");
        }
    };
    let Some(inbound) = Inbound::from_value(&value) else {
        return debug!("{session}: ignoring unintelligible frame");
    };

    match inbound {
        Inbound::Admin(admin) => handle_admin(state, session, admin),
        Inbound::Typed(frame) =>
            handle_frame(state, session, frame, &value).await,
    }
}

async fn handle_frame(
    state: &ControlState,
    session: SessionId,
    frame: ClientFrame,
    raw: &Value,
) {
    let registered = state.router.player_of(session).is_some();
    if !registered && !matches!(frame, ClientFrame::Register { .. }) {
        return debug!("{session}: frame before register ignored");
    }

    match frame {
        ClientFrame::Register { user_id } =>
            handle_register(state, session, user_id),
        ClientFrame::RegisterExpectedInvoice {
            invoice_number,
            player_id,
            order_data,
            ..
        } => handle_register_expected_invoice(
            state,
            session,
            invoice_number,
            player_id,
            order_data,
        ),
        ClientFrame::RequestInvoice { invoice_number } =>
            handle_request_invoice(state, session, invoice_number),
        ClientFrame::GameEvent { event } =>
            handle_game_event(state, session, &event, raw).await,
        ClientFrame::Order { data } =>
            handle_order(state, session, data).await,
        ClientFrame::SendTo {
            target_user_id,
            message,
        } => handle_send_to(state, session, target_user_id, message),
        ClientFrame::Unknown =>
            debug!("{session}: unknown frame type ignored"),
    }
}

fn handle_register(
    state: &ControlState,
    session: SessionId,
    user_id: PlayerId,
) {
    state.router.register(session, user_id.clone());
    state.router.send(
        session,
        ServerFrame::RegisterResponse {
            status: ServerFrame::STATUS_SUCCESS.to_owned(),
            message: format!("Registered as {user_id}"),
            user_id,
        },
    );
    state.router.send(
        session,
        ServerFrame::game_status(&state.router.game_status()),
    );
}

fn handle_register_expected_invoice(
    state: &ControlState,
    session: SessionId,
    invoice_number: PoNumber,
    player_id: PlayerId,
    order_data: OrderMeta,
) {
    state.registry.register(
        invoice_number.clone(),
        player_id.clone(),
        order_data,
    );
    state.router.send(
        session,
        ServerFrame::RegisterExpectedInvoiceResponse {
            status: ServerFrame::STATUS_SUCCESS.to_owned(),
            message: format!("Watching for invoice {invoice_number}"),
            invoice_number,
            player_id,
        },
    );
}

fn handle_request_invoice(
    state: &ControlState,
    session: SessionId,
    invoice_number: PoNumber,
) {
    let record = match state.store.get(&invoice_number) {
        Ok(record) => record,
        Err(err) => {
            if !err.is_not_found() {
                warn!("reading invoice {invoice_number}: {err}");
            }
            state.router.send(
                session,
                ServerFrame::InvoiceResponse {
                    status: ServerFrame::STATUS_ERROR.to_owned(),
                    message: format!(
                        "Invoice {invoice_number} not found",
                    ),
                    invoice_number,
                },
            );
            return;
        }
    };

    // Attach the order summary when we still know it: the record itself
    // first, then the registry by PN, then a best-effort scan under the
    // requesting player.
    let summary = record
        .summary
        .clone()
        .or_else(|| {
            state
                .registry
                .lookup(&invoice_number)
                .and_then(|entry| entry.order.summary)
        })
        .or_else(|| {
            state
                .router
                .player_of(session)
                .and_then(|player| state.registry.find_by_player(&player))
                .and_then(|entry| entry.order.summary)
        });

    state.router.send(
        session,
        ServerFrame::InvoicePdf {
            status: ServerFrame::STATUS_SUCCESS.to_owned(),
            invoice_number,
            filename: record.filename,
            mime_type: "application/pdf".to_owned(),
            data: record.data,
            file_size: record.file_size,
            processed_at: record.processed_at,
            s3_metadata: record.s3_metadata,
            summary,
        },
    );
}

async fn handle_game_event(
    state: &ControlState,
    session: SessionId,
    event: &str,
    raw: &Value,
) {
    if event == "game_over" {
        // Forwarded verbatim; failures are logged, not surfaced, since
        // the frame is fire-and-forget.
        if let Err(err) = state.sinks.game_over(raw).await {
            warn!("game-over forward failed: {err}");
        }
        return;
    }

    match event.parse() {
        Ok(game_state) => {
            let updated_by = state
                .router
                .player_of(session)
                .map(|player| player.to_string())
                .unwrap_or_else(|| "game".to_owned());
            let status =
                state.router.update_game(game_state, &updated_by);
            state.router.broadcast(ServerFrame::game_status(&status));
        }
        Err(_) => debug!("{session}: unknown game event '{event}'"),
    }
}

async fn handle_order(
    state: &ControlState,
    session: SessionId,
    data: OrderData,
) {
    let response = match state.sinks.process_order(&data).await {
        Ok(reply) => {
            let order_id = reply
                .get("orderId")
                .and_then(Value::as_str)
                .map(str::to_owned);
            let message = reply
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Order accepted")
                .to_owned();
            ServerFrame::OrderResponse {
                status: ServerFrame::STATUS_SUCCESS.to_owned(),
                order_id,
                message,
                customer_name: Some(data.customer_name),
                customer_email: Some(data.customer_email),
                item_count: Some(data.items.len()),
                error: None,
            }
        }
        Err(err) => {
            warn!("order forward failed: {err}");
            ServerFrame::OrderResponse {
                status: ServerFrame::STATUS_ERROR.to_owned(),
                order_id: None,
                message: "Order processing failed".to_owned(),
                customer_name: None,
                customer_email: None,
                item_count: None,
                error: Some(err.to_string()),
            }
        }
    };
    state.router.send(session, response);
}

fn handle_send_to(
    state: &ControlState,
    session: SessionId,
    target: PlayerId,
    message: Value,
) {
    // The state machine guard upstream guarantees a registered sender.
    let Some(from) = state.router.player_of(session) else {
        return;
    };
    let delivered = state.router.send_to_player(
        &target,
        ServerFrame::DirectMessage {
            from_user_id: from,
            message,
        },
    );
    let (status, message) = if delivered {
        (ServerFrame::STATUS_SUCCESS, format!("Delivered to {target}"))
    } else {
        (ServerFrame::STATUS_ERROR, format!("{target} is not connected"))
    };
    state.router.send(
        session,
        ServerFrame::SendResponse {
            status: status.to_owned(),
            target_user_id: target,
            message,
        },
    );
}

fn handle_admin(
    state: &ControlState,
    session: SessionId,
    admin: AdminFrame,
) {
    if !admin.is_authorized() {
        return debug!(
            "{session}: admin command from unrecognized source '{}'",
            admin.source,
        );
    }
    let status = state
        .router
        .update_game(admin.command.game_state(), AdminFrame::ADMIN_SOURCE);
    state.router.broadcast(ServerFrame::game_status(&status));
}
