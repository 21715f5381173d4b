use crate::api::ChargeStatus;
use serde::Serialize;

/// Loadpoint lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadpointEvent {
    Connect,
    Disconnect,
    ChargeStart,
    ChargeStop,
}

/// Events implied by a status transition, in dispatch order.
/// `from` is `None` before the first successful status read.
pub fn status_events(from: Option<ChargeStatus>, to: ChargeStatus) -> Vec<LoadpointEvent> {
    use ChargeStatus::{A, B, C};
    use LoadpointEvent::{ChargeStart, ChargeStop, Connect, Disconnect};

    if from == Some(to) {
        return Vec::new();
    }

    let mut events = Vec::with_capacity(2);
    if from == Some(C) {
        events.push(ChargeStop);
    }
    match (from, to) {
        (None | Some(A), B | C) => events.push(Connect),
        (_, A) => events.push(Disconnect),
        _ => {}
    }
    if to == C {
        events.push(ChargeStart);
    }
    events
}
