//! Audience selection for outgoing room traffic.
//!
//! A broadcast targets either an explicit list of connection ids (looked up
//! directly, no namespace scan) or every open connection in a namespace minus
//! an exclusion list. When no per-recipient transform is supplied the frame
//! is encoded once and shared by all recipients.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::envelope::encode_envelope;
use crate::socket::{Outbound, WireSocket, write_to_socket};
use crate::types::{MessageType, TypeTag};

/// Lookup over the connections known to this process.
pub trait ClientSet {
    /// Concrete socket type.
    type Socket: WireSocket;

    /// Direct lookup by connection id.
    fn by_id(&self, id: &str) -> Option<Arc<Self::Socket>>;

    /// Visit every known connection.
    fn scan(&self, visit: &mut dyn FnMut(&Arc<Self::Socket>));
}

/// Result of a per-recipient transform.
#[derive(Clone, Debug)]
pub enum Transformed {
    /// Send nothing to this recipient.
    Skip,
    /// Encode and send this value instead.
    Value(Value),
    /// Send this frame verbatim.
    Packed(Bytes),
}

/// Per-recipient payload rewrite.
pub type Transform<S> = dyn Fn(Option<&Value>, &S, MessageType) -> Transformed + Send + Sync;

/// Who receives a broadcast.
pub struct BroadcastOptions<'a, S> {
    /// Explicit recipients. When non-empty, `not` is ignored.
    pub to: &'a [String],
    /// Connections to exclude from a namespace-wide broadcast.
    pub not: &'a [String],
    /// Optional per-recipient rewrite.
    pub transform: Option<&'a Transform<S>>,
}

impl<S> Default for BroadcastOptions<'_, S> {
    fn default() -> Self {
        Self {
            to: &[],
            not: &[],
            transform: None,
        }
    }
}

/// Send one frame to the selected connections of `ns`.
///
/// Returns the number of frames queued.
pub fn broadcast<'t, C: ClientSet>(
    clients: &C,
    ns: &str,
    tag: impl Into<TypeTag<'t>>,
    data: Option<&Value>,
    options: &BroadcastOptions<'_, C::Socket>,
) -> usize {
    if ns.is_empty() {
        return 0;
    }
    let Some(kind) = tag.into().resolve() else {
        return 0;
    };
    let shared = match options.transform {
        Some(_) => None,
        None => match encode_envelope(kind, data) {
            Some(frame) => Some(frame),
            None => return 0,
        },
    };

    let deliver = |socket: &C::Socket| -> bool {
        match (options.transform, &shared) {
            (Some(transform), _) => match transform(data, socket, kind) {
                Transformed::Skip => false,
                Transformed::Value(value) => write_to_socket(socket, kind, Outbound::Value(&value)),
                Transformed::Packed(frame) => write_to_socket(socket, kind, Outbound::Encoded(frame)),
            },
            (None, Some(frame)) => write_to_socket(socket, kind, Outbound::Encoded(frame.clone())),
            (None, None) => false,
        }
    };

    if !options.to.is_empty() {
        return options
            .to
            .iter()
            .filter_map(|id| clients.by_id(id))
            .filter(|socket| deliver(socket.as_ref()))
            .count();
    }

    let excluded: HashSet<&str> = options.not.iter().map(String::as_str).collect();
    let mut sent = 0;
    clients.scan(&mut |socket| {
        if socket.ns() == ns && !excluded.contains(socket.id()) && deliver(socket.as_ref()) {
            sent += 1;
        }
    });
    sent
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
