/*!
# fairx network protocol

Transport of the fair exchange protocol. Two peers talk over a mutually
authenticated TLS connection. Every connection carries a single
request/response interaction:

1. the client sends a textual [`Command`], framed by the [`ControlCodec`];
2. the listener answers with one or more [`Response`]s;
3. file bodies are streamed raw right after the control message
   announcing their size, by chunks of [`ProtocolConfig::buffer_size`].

This crate provides the building blocks (grammar, framing, [`Channel`],
TLS material and retry policy). The listener and client running the
protocol live in `fairxd`.
*/

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

mod channel;
mod codec;
mod error;
mod protocol;
mod retry;
pub mod tls;

pub use self::{
    channel::Channel,
    codec::ControlCodec,
    error::Error,
    protocol::{is_valid_file_name, Command, Malformation, ProtocolConfig, Response},
    retry::RetryPolicy,
};
