/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! DHCP netboot dispatch.
//!
//! Two handler personalities over one wire format: the reservation
//! handler answers known MACs with a full lease plus netboot options, the
//! proxy handler answers only the netboot portion of the exchange and
//! never allocates an IP. Auto-proxy is the proxy handler serving unknown
//! MACs with static defaults. The server owns the UDP socket and walks an
//! ordered handler list per packet; the first handler that claims a
//! packet produces the reply.

pub mod handler;
mod options;
mod packet;
mod server;

pub use handler::proxy::ProxyHandler;
pub use handler::reservation::ReservationHandler;
pub use handler::{DhcpHandler, HandlerConfig};
pub use packet::DecodedPacket;
pub use server::{serve, DhcpServerConfig};

use dhcproto::v4::MessageType;

#[derive(Debug, thiserror::Error)]
pub enum DhcpError {
    #[error("packet decode error: {0}")]
    Decode(#[from] dhcproto::error::DecodeError),

    #[error("packet encode error: {0}")]
    Encode(#[from] dhcproto::error::EncodeError),

    #[error("not a BOOTREQUEST packet")]
    NotARequest,

    #[error("unhandled message type: {0:?}")]
    UnhandledMessageType(MessageType),

    #[error("packet carries no usable client hardware address")]
    NoHardwareAddress,

    #[error("backend error: {0}")]
    Backend(#[from] anvil_backend::BackendError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
