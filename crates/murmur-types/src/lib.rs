//! Wire types shared by every murmur crate.
//!
//! Inbound control frames decode into [`ServerEvent`], outbound commands are
//! modelled by [`ClientCommand`], and [`codec`] converts both to and from the
//! transport-level [`RawMessage`]. The broker-facing [`Event`] and its fixed
//! [`EventCategory`] set also live here so that subscribers only need this
//! crate.
pub mod category;
pub mod codec;
pub mod events;
mod raw;

pub use category::{DisconnectedEvent, Event, EventCategory, Fault, FaultKind};
pub use codec::{EncodeError, InboundFrame, MalformedFrameError, OutboundFrame};
pub use events::{ClientCommand, ServerEvent};
pub use raw::RawMessage;
