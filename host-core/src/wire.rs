//! Everything that concerns the bytes on the channel.
//!
//! Bodies are postcard encoded. The frame helpers put the one byte tag from the protocol crate (and
//! the peer id, where needed) in front of a body and take it apart again. Only the WebSocket channel
//! needs frames, the in-process hub moves bodies directly.

use crate::channel::{ChannelEvent, PeerEvent};
use crate::error::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use postcard::{from_bytes, to_stdvec};
use protocol::{
    HAND_SHAKE_RESPONSE, HOST_ANNOUNCE, HOST_BROADCAST, HOST_DIRECT, HOST_DISCONNECTS,
    PEER_CONNECTED, PEER_DISCONNECTED, PEER_DISCONNECTS_SELF, PEER_ID_SIZE, PeerId, SERVER_ERROR,
    TO_HOST,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serializes a message body.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, WireError> {
    Ok(Bytes::from(to_stdvec(value)?))
}

/// Deserializes a message body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, WireError> {
    Ok(from_bytes(body)?)
}

fn tagged(tag: u8, body: &[u8]) -> Bytes {
    let mut msg_builder = BytesMut::with_capacity(1 + body.len());
    msg_builder.put_u8(tag);
    msg_builder.put_slice(body);
    msg_builder.freeze()
}

pub fn broadcast_frame(body: &[u8]) -> Bytes {
    tagged(HOST_BROADCAST, body)
}

pub fn direct_frame(peer: PeerId, body: &[u8]) -> Bytes {
    let mut msg_builder = BytesMut::with_capacity(1 + PEER_ID_SIZE + body.len());
    msg_builder.put_u8(HOST_DIRECT);
    msg_builder.put_u16(peer);
    msg_builder.put_slice(body);
    msg_builder.freeze()
}

pub fn announce_frame(body: &[u8]) -> Bytes {
    tagged(HOST_ANNOUNCE, body)
}

pub fn to_host_frame(body: &[u8]) -> Bytes {
    tagged(TO_HOST, body)
}

pub fn host_disconnect_frame() -> Bytes {
    Bytes::from_static(&[HOST_DISCONNECTS])
}

pub fn peer_disconnect_frame() -> Bytes {
    Bytes::from_static(&[PEER_DISCONNECTS_SELF])
}

fn take_tag(frame: &mut Bytes) -> Result<u8, WireError> {
    if frame.is_empty() {
        return Err(WireError::Empty);
    }
    Ok(frame.get_u8())
}

fn take_peer_id(frame: &mut Bytes, tag: u8) -> Result<PeerId, WireError> {
    if frame.remaining() < PEER_ID_SIZE {
        return Err(WireError::Truncated(tag));
    }
    Ok(frame.get_u16())
}

fn server_error(frame: &Bytes) -> WireError {
    WireError::Server(String::from_utf8_lossy(frame).to_string())
}

/// The peer id the relay assigned, read from the handshake response.
pub fn parse_handshake(mut frame: Bytes) -> Result<PeerId, WireError> {
    let tag = take_tag(&mut frame)?;
    match tag {
        HAND_SHAKE_RESPONSE => take_peer_id(&mut frame, tag),
        SERVER_ERROR => Err(server_error(&frame)),
        other => Err(WireError::UnknownTag(other)),
    }
}

/// Relay -> host frames.
pub fn parse_host_frame(mut frame: Bytes) -> Result<ChannelEvent, WireError> {
    let tag = take_tag(&mut frame)?;
    match tag {
        PEER_CONNECTED => Ok(ChannelEvent::PeerConnected(take_peer_id(&mut frame, tag)?)),
        PEER_DISCONNECTED => Ok(ChannelEvent::PeerLeft(take_peer_id(&mut frame, tag)?)),
        TO_HOST => {
            let peer = take_peer_id(&mut frame, tag)?;
            Ok(ChannelEvent::Request(peer, frame))
        }
        SERVER_ERROR => Err(server_error(&frame)),
        other => Err(WireError::UnknownTag(other)),
    }
}

/// Relay -> peer frames. Direct frames still carry the peer id, the relay only forwards them to the
/// addressed peer.
pub fn parse_peer_frame(mut frame: Bytes) -> Result<PeerEvent, WireError> {
    let tag = take_tag(&mut frame)?;
    match tag {
        HOST_BROADCAST => Ok(PeerEvent::Message(frame)),
        HOST_DIRECT => {
            take_peer_id(&mut frame, tag)?;
            Ok(PeerEvent::Message(frame))
        }
        HOST_DISCONNECTS => Ok(PeerEvent::Closed("Host closed the session".to_string())),
        SERVER_ERROR => Err(server_error(&frame)),
        other => Err(WireError::UnknownTag(other)),
    }
}

/// Relay -> lobby frames, the body is a postcard encoded session info.
pub fn parse_announcement(mut frame: Bytes) -> Result<Bytes, WireError> {
    let tag = take_tag(&mut frame)?;
    match tag {
        HOST_ANNOUNCE => Ok(frame),
        SERVER_ERROR => Err(server_error(&frame)),
        other => Err(WireError::UnknownTag(other)),
    }
}
