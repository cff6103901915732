//! Per-message processing and the worker loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::Receiver;
use tracing::{debug, error, warn};

use central_protocol::framing::Frames;
use central_protocol::{Request, RequestHeader, Response};

use crate::transport::Endpoint;

use super::DISPATCH_TARGET;
use super::routing::RoutingTable;

const MALFORMED_PREFIX: &str = "invalid request format";
const HANDLER_PREFIX: &str = "failed to process request";

/// Takes messages off the hand-off queue until it closes.
///
/// A panic while processing one message is caught here; that message gets no
/// reply and the worker moves on.
pub(crate) fn run_worker<E: Endpoint>(
    index: usize,
    queue: &Receiver<Frames>,
    endpoint: &E,
    routes: &RoutingTable,
) {
    debug!(target: DISPATCH_TARGET, worker = index, "worker started");
    for message in queue {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| process_message(routes, message)));
        match outcome {
            Ok(Some(reply)) => {
                if let Err(error) = endpoint.send(reply) {
                    warn!(
                        target: DISPATCH_TARGET,
                        worker = index,
                        error = %error,
                        "failed to send reply"
                    );
                }
            }
            Ok(None) => {}
            Err(payload) => {
                error!(
                    target: DISPATCH_TARGET,
                    worker = index,
                    panic = %panic_message(payload.as_ref()),
                    "request handler panicked"
                );
            }
        }
    }
    debug!(target: DISPATCH_TARGET, worker = index, "worker stopped");
}

/// Turns one inbound message into the reply frames, if any.
///
/// Messages without a payload frame are answered with a malformed-request
/// error when the identity is known; empty messages are dropped.
pub(crate) fn process_message(routes: &RoutingTable, frames: Frames) -> Option<Frames> {
    let mut frames = frames.into_iter();
    let Some(identity) = frames.next() else {
        warn!(target: DISPATCH_TARGET, "dropping message without frames");
        return None;
    };
    let response = match frames.next() {
        Some(payload) => respond(routes, &payload),
        None => Response::failure(
            0,
            "",
            format!("{MALFORMED_PREFIX}: message has no payload frame"),
        ),
    };
    let encoded = match response.encode() {
        Ok(encoded) => encoded,
        Err(error) => {
            warn!(target: DISPATCH_TARGET, error = %error, "failed to encode response");
            Response::failure(
                response.id(),
                response.kind(),
                format!("{HANDLER_PREFIX}: {error}"),
            )
            .encode()
            .ok()?
        }
    };
    Some(vec![identity, encoded])
}

fn respond(routes: &RoutingTable, payload: &[u8]) -> Response {
    let request = match Request::decode(payload) {
        Ok(request) => request,
        Err(error) => {
            let header = RequestHeader::recover(payload);
            debug!(
                target: DISPATCH_TARGET,
                id = header.id,
                kind = %header.kind,
                error = %error,
                "rejecting malformed request"
            );
            return Response::failure(header.id, header.kind, format!("{MALFORMED_PREFIX}: {error}"));
        }
    };
    let Request { id, kind, content } = request;
    match routes.dispatch(&kind, content) {
        Ok(content) => Response::success(id, kind, content),
        Err(error) => {
            debug!(
                target: DISPATCH_TARGET,
                id,
                kind = %kind,
                error = %error,
                "request failed"
            );
            Response::failure(id, kind, format!("{HANDLER_PREFIX}: {error}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerError;
    use rstest::{fixture, rstest};
    use serde_json::{Value, json};

    const PEER: &[u8] = b"\x00\x00\x00\x00\x07";

    #[fixture]
    fn routes() -> RoutingTable {
        RoutingTable::builder()
            .route("health-check", |_| Ok(json!("OK")))
            .route("fail", |_| Err(HandlerError::other("store unavailable")))
            .build()
    }

    fn reply(routes: &RoutingTable, frames: Frames) -> (Vec<u8>, Response) {
        let reply = process_message(routes, frames).expect("reply frames");
        assert_eq!(reply.len(), 2);
        let mut reply = reply.into_iter();
        let identity = reply.next().expect("identity");
        let payload = reply.next().expect("payload");
        (identity, Response::decode(&payload).expect("decode response"))
    }

    fn message(payload: &[u8]) -> Frames {
        vec![PEER.to_vec(), payload.to_vec()]
    }

    #[rstest]
    fn replies_echo_identity_and_id(routes: RoutingTable) {
        let (identity, response) = reply(
            &routes,
            message(br#"{"id":41,"type":"health-check","content":{"ignored":true}}"#),
        );
        assert_eq!(identity, PEER);
        assert_eq!(response.id(), 41);
        assert_eq!(response.kind(), "health-check");
        assert_eq!(response.content(), Some(&json!("OK")));
    }

    #[rstest]
    fn single_frame_gets_default_error(routes: RoutingTable) {
        let (identity, response) = reply(&routes, vec![PEER.to_vec()]);
        assert_eq!(identity, PEER);
        assert_eq!(response.id(), 0);
        assert_eq!(response.kind(), "");
        assert!(
            response
                .error()
                .is_some_and(|e| e.starts_with("invalid request format"))
        );
    }

    #[rstest]
    fn empty_message_is_dropped(routes: RoutingTable) {
        assert!(process_message(&routes, Vec::new()).is_none());
    }

    #[rstest]
    fn undecodable_payload_keeps_recoverable_header(routes: RoutingTable) {
        let (_, response) = reply(&routes, message(br#"{"id":5,"type":"allocate","content":"#));
        assert_eq!(response.id(), 0);
        assert!(!response.is_success());

        let (_, response) = reply(&routes, message(br#"{"id":5,"type":7}"#));
        assert_eq!(response.id(), 5);
        assert!(
            response
                .error()
                .is_some_and(|e| e.starts_with("invalid request format: "))
        );
    }

    #[rstest]
    fn unknown_route_is_named(routes: RoutingTable) {
        let (_, response) = reply(&routes, message(br#"{"id":3,"type":"not-a-route"}"#));
        assert_eq!(response.id(), 3);
        assert_eq!(
            response.error(),
            Some("failed to process request: no handler found for request type: not-a-route")
        );
    }

    #[rstest]
    fn handler_errors_are_wrapped(routes: RoutingTable) {
        let (_, response) = reply(&routes, message(br#"{"id":9,"type":"fail"}"#));
        assert_eq!(
            response.error(),
            Some("failed to process request: store unavailable")
        );
        assert_eq!(response.content(), None::<&Value>);
    }

    #[rstest]
    #[case(Box::new("static str") as Box<dyn Any + Send>, "static str")]
    #[case(Box::new(String::from("owned")) as Box<dyn Any + Send>, "owned")]
    #[case(Box::new(42_u8) as Box<dyn Any + Send>, "non-string panic payload")]
    fn panic_payloads_are_described(#[case] payload: Box<dyn Any + Send>, #[case] expected: &str) {
        assert_eq!(panic_message(payload.as_ref()), expected);
    }
}
