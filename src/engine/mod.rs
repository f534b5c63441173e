mod cache;
mod conf;
mod forwarder;
mod nb_api;
mod reconciler;
mod rest;
mod rule;
mod service;
mod trie;
mod upstream;


pub use cache::*;
pub use conf::*;
pub use forwarder::*;
pub use nb_api::*;
pub use reconciler::*;
pub use rest::*;
pub use rule::*;
pub use service::*;
pub use trie::*;
pub use upstream::*;
