//! Protocol contracts shared by every agent.
//!
//! - [`messages`]: the envelope and one typed body per `message_type`.
//! - [`builders`]: constructors for messages with derived fields.
//! - [`validation`]: structural checks applied before a handler sees a message.
//! - [`jsonrpc`]: optional JSON-RPC 2.0 wrapping.

use std::time::Duration;

use time::{
    format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime,
    PrimitiveDateTime, UtcOffset,
};

pub mod builders;
pub mod jsonrpc;
pub mod messages;
pub mod validation;

pub use messages::{Message, MessageBody, Reply};
pub use validation::{validate, validate_value, ProtocolError};

/// Value of the `protocol` envelope field.
pub const PROTOCOL_VERSION: &str = "league.v2";

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

/// Formats `at` in UTC with millisecond precision and a `Z` suffix.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .unwrap_or_default()
}

/// Current time as a protocol timestamp.
pub fn timestamp_now() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

/// Protocol timestamp `after` from now.
pub fn timestamp_in(after: Duration) -> String {
    format_timestamp(OffsetDateTime::now_utc() + after)
}

/// Parses a protocol timestamp.
pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(raw, TIMESTAMP_FORMAT).map(PrimitiveDateTime::assume_utc)
}
