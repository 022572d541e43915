//! etbd - the evidential tool bus node daemon.
//!
//! One node of the federated inference engine: the tabled goal engine, the
//! rule base, the claims table, the wrapper registry, the content-addressed
//! file store, the network fabric and the RPC surface.

pub mod claims_table;
pub mod engine;
pub mod fabric;
pub mod filestore;
pub mod node;
pub mod peer_client;
pub mod queries;
pub mod rulebase;
pub mod server;
pub mod wrappers;
