pub mod bridge;
pub mod config;
pub mod error;
pub mod grammar;
pub mod io_struct;
pub mod reconcile;
pub mod request_transform;
pub mod server;
pub mod sse;
pub mod stream_reconcile;
pub mod tool_result_fold;
pub mod upstream;

pub use bridge::{BridgeResponse, BridgeState, Route, prepare};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use upstream::{ByteStream, HttpUpstream, Upstream};
