#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

mod challenge;
mod commitment;
mod hash;
mod proof;
mod service;
mod signature;

pub use self::{
    challenge::{Challenge, InvalidChallenge},
    commitment::Commitment,
    hash::FileHash,
    proof::Proof,
    service::{CommitmentService, NotFound, VerificationFailure},
    signature::Signature,
};
