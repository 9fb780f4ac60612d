//! Interest arming for registered channels. All of these run on the
//! owning selector thread; a channel whose registration token is gone
//! reports [`SelectError::CancelledKey`].

use mio::event::Source;

use crate::error::SelectError;
use crate::net::channel::ChannelCore;
use crate::net::server::ServerChannel;
use crate::net::socket::SocketChannel;
use crate::ops::Ops;

fn apply(core: &ChannelCore, source: &mut dyn Source, ops: Ops) -> Result<(), SelectError> {
    let raw = core.raw().ok_or(SelectError::CancelledKey)?;
    let token = core.token().ok_or(SelectError::CancelledKey)?;
    raw.reregister(source, token, ops)?;
    core.set_interest(ops);
    Ok(())
}

fn update_socket(
    channel: &SocketChannel,
    change: impl FnOnce(Ops) -> Ops,
) -> Result<(), SelectError> {
    let ops = change(channel.core().interest());
    let mut socket = channel.socket();
    apply(channel.core(), socket.as_source(), ops)
}

pub fn set_accept_interested(channel: &ServerChannel) -> Result<(), SelectError> {
    let ops = channel.core().interest().with(Ops::ACCEPT);
    let mut listener = channel.listener();
    apply(channel.core(), listener.as_source(), ops)
}

pub fn set_read_interested(channel: &SocketChannel) -> Result<(), SelectError> {
    update_socket(channel, |ops| ops.with(Ops::READ))
}

pub fn set_connect_interested(channel: &SocketChannel) -> Result<(), SelectError> {
    update_socket(channel, |ops| ops.with(Ops::CONNECT))
}

pub fn clear_connect_interested(channel: &SocketChannel) -> Result<(), SelectError> {
    update_socket(channel, |ops| ops.without(Ops::CONNECT))
}

pub fn set_write_interested(channel: &SocketChannel) -> Result<(), SelectError> {
    update_socket(channel, |ops| ops.with(Ops::WRITE))
}

pub fn clear_write_interested(channel: &SocketChannel) -> Result<(), SelectError> {
    update_socket(channel, |ops| ops.without(Ops::WRITE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::FakeSocket;

    #[test]
    fn arming_without_a_token_is_a_cancelled_key() {
        let (socket, _sensor) = FakeSocket::new();
        let channel =
            crate::net::socket::SocketChannel::new(Box::new(socket), "127.0.0.1:1".parse().unwrap());
        let err = set_write_interested(&channel).unwrap_err();
        assert!(matches!(err, SelectError::CancelledKey));
    }
}
