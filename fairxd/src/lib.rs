/*!
# fairxd

Fair exchange of encrypted files between two roles over mutually
authenticated TLS connections.

* [`process::encrypt_file`] has a role's file encrypted by an attestable
  service;
* [`ExchangeCoordinator`] swaps the encrypted files of two roles so that
  neither of them can walk away with the other's file without having
  handed over its own committed file.
*/

pub mod client;
mod config;
mod connections;
pub mod encryption;
pub mod exchange;
pub mod gate;
pub mod listener;
pub mod process;
pub mod session;
pub mod storage;

#[cfg(test)]
mod testing;

pub use self::{
    client::{Client, ExchangeReceipt},
    config::{Config, TlsConfig},
    exchange::{ExchangeCoordinator, ExchangeFailed, ExchangeReport, ExchangeState, Party},
    listener::Listener,
};
