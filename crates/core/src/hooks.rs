//! Interception points for envelopes crossing the bridge.

use crate::frame::Frame;

/// Observes or rewrites envelopes as they pass through the bridge.
///
/// `on_outbound` sees local-to-remote traffic after parsing and before it is
/// forwarded; `on_inbound` sees remote-to-local traffic after parsing and
/// before correlation. A hook that only reads through [`Frame::envelope`]
/// leaves the original bytes in place; one that calls
/// [`Frame::envelope_mut`] causes the envelope to be re-encoded.
/// Implementations must not change a request's ID, since the ID has already
/// been (or is about to be) used as the correlation key.
pub trait EnvelopeHooks: Send + Sync {
    fn on_outbound(&self, _frame: &mut Frame) {}

    fn on_inbound(&self, _frame: &mut Frame) {}
}

/// Pass-through hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl EnvelopeHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{Envelope, EnvelopeKind, Notification};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Renamer {
        seen: AtomicUsize,
    }

    impl EnvelopeHooks for Renamer {
        fn on_outbound(&self, frame: &mut Frame) {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if frame.kind() != EnvelopeKind::Notification {
                return;
            }
            if let Envelope::Notification(n) = frame.envelope_mut() {
                n.method = format!("local/{}", n.method);
            }
        }
    }

    #[test]
    fn test_noop_leaves_frame_untouched() {
        let mut frame = Frame::parse(br#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        NoopHooks.on_outbound(&mut frame);
        NoopHooks.on_inbound(&mut frame);
        assert_eq!(frame.envelope().method(), Some("ping"));
        assert!(!frame.is_rewritten());
    }

    #[test]
    fn test_custom_hook_rewrites_outbound_only() {
        let hooks = Renamer::default();
        let mut frame = Frame::from(Envelope::Notification(Notification {
            method: "initialized".to_string(),
            params: None,
        }));

        hooks.on_inbound(&mut frame);
        assert_eq!(frame.envelope().method(), Some("initialized"));

        hooks.on_outbound(&mut frame);
        assert_eq!(frame.kind(), EnvelopeKind::Notification);
        assert_eq!(frame.envelope().method(), Some("local/initialized"));
        assert_eq!(hooks.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observing_hook_keeps_wire_bytes() {
        let hooks = Renamer::default();
        let input = br#"{"jsonrpc":"2.0","method":"tools/call","id":1,"extra":[]}"#;
        let mut frame = Frame::parse(input).unwrap();

        hooks.on_outbound(&mut frame);
        assert!(!frame.is_rewritten());
        assert_eq!(frame.to_vec().unwrap(), input.to_vec());
    }
}
