//! Classification of incoming datagrams.
//!
//! A cwdaemon client sends either plain text to be keyed or a control
//! message. Control messages start with the ESCAPE byte (`0x1B`), followed
//! by a one-character directive code and an optional payload:
//!
//! ```text
//! ESC '4'            abort the current message
//! ESC <code> <data>  anything else is logged and ignored
//! ```
//!
//! Text is keyed as-is, minus a single trailing newline.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    combinator::{map, opt, rest, value},
    number::complete::be_u8,
    sequence::preceded,
};
use std::fmt;

/// Prefix byte of every control message.
pub const ESCAPE: u8 = 0x1B;

/// Directive code for "abort current transmission".
pub const ABORT_CODE: u8 = b'4';

/// A parsed control directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    /// Stop keying and flush the device queue.
    Abort,
    /// A code this daemon does not act on.
    Unknown {
        /// The directive code, if the message had one.
        code: Option<u8>,
        /// Everything after the code.
        payload: &'a [u8],
    },
}

impl fmt::Display for Directive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Abort => write!(f, "abort"),
            Directive::Unknown { code: None, .. } => write!(f, "empty directive"),
            Directive::Unknown {
                code: Some(code),
                payload,
            } => write!(
                f,
                "unknown directive {:?} ({})",
                *code as char,
                String::from_utf8_lossy(payload)
            ),
        }
    }
}

/// What a datagram asks the daemon to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    /// Zero-length datagram, ignored.
    Empty,
    /// A control message. `body` is everything after the ESCAPE byte.
    Control {
        body: &'a [u8],
        directive: Directive<'a>,
    },
    /// Text to key, trailing newline removed.
    Text(&'a [u8]),
}

/// Parse the ESCAPE prefix, returning the rest of the message.
fn escape_body(input: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(tag(&[ESCAPE][..]), rest).parse(input)
}

/// Parse a directive from the body of a control message.
fn directive(input: &[u8]) -> IResult<&[u8], Directive<'_>> {
    alt((
        value(Directive::Abort, tag(&[ABORT_CODE][..])),
        map((opt(be_u8), rest), |(code, payload)| Directive::Unknown {
            code,
            payload,
        }),
    ))
    .parse(input)
}

/// Parse the directive carried by a control message body.
///
/// Never fails: anything unrecognized becomes [`Directive::Unknown`].
pub fn parse_directive(body: &[u8]) -> Directive<'_> {
    match directive(body) {
        Ok((_, directive)) => directive,
        Err(_) => Directive::Unknown {
            code: None,
            payload: body,
        },
    }
}

/// Classify a datagram.
///
/// The checks run in a fixed order: empty first, then ESCAPE, then text.
pub fn classify(datagram: &[u8]) -> Message<'_> {
    if datagram.is_empty() {
        return Message::Empty;
    }

    if let Ok((_, body)) = escape_body(datagram) {
        return Message::Control {
            body,
            directive: parse_directive(body),
        };
    }

    Message::Text(datagram.strip_suffix(b"\n").unwrap_or(datagram))
}
