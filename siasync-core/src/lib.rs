mod client;
mod store;

pub use client::{
    ConsensusInfo, ErrorClass, RemoteFileRecord, SiaClient, SiaError, WalletInfo,
};
pub use store::RemoteStore;
