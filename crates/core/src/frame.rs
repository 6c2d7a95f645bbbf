//! Envelopes paired with the bytes they arrived as.
//!
//! The bridge classifies and correlates on the parsed [`Envelope`] but writes
//! the original bytes back out, so members the envelope model does not know
//! about reach the other side untouched.

use crate::error::ParseError;
use crate::jsonrpc::{Envelope, EnvelopeKind, Id};

/// A parsed envelope together with its wire form.
///
/// Borrowing the envelope mutably through [`Frame::envelope_mut`] discards
/// the wire form; the frame is then serialized from the envelope instead.
#[derive(Debug, Clone)]
pub struct Frame {
    envelope: Envelope,
    raw: Option<Vec<u8>>,
}

impl Frame {
    /// Parse one framed message, keeping its bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let envelope = Envelope::parse(bytes)?;
        Ok(Self {
            envelope,
            raw: Some(single_line(bytes)),
        })
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Mutable access for rewriting. The frame is re-encoded afterwards.
    pub fn envelope_mut(&mut self) -> &mut Envelope {
        self.raw = None;
        &mut self.envelope
    }

    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }

    /// True once the wire form has been dropped in favour of the envelope.
    pub fn is_rewritten(&self) -> bool {
        self.raw.is_none()
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.envelope.kind()
    }

    pub fn id(&self) -> Option<&Id> {
        self.envelope.id()
    }

    /// The bytes to send: the original ones unless the envelope was rewritten.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        match &self.raw {
            Some(raw) => Ok(raw.clone()),
            None => self.envelope.to_vec(),
        }
    }

    /// [`Frame::to_vec`] plus a trailing newline.
    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = self.to_vec()?;
        line.push(b'\n');
        Ok(line)
    }
}

impl From<Envelope> for Frame {
    fn from(envelope: Envelope) -> Self {
        Self {
            envelope,
            raw: None,
        }
    }
}

/// Put a JSON text on one line by removing raw CR and LF bytes.
///
/// JSON strings cannot contain unescaped line breaks, so in valid JSON those
/// bytes are always insignificant whitespace.
pub fn single_line(json: &[u8]) -> Vec<u8> {
    json.trim_ascii()
        .iter()
        .copied()
        .filter(|b| *b != b'\n' && *b != b'\r')
        .collect()
}
