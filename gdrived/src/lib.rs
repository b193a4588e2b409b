pub mod daemon;
pub mod remote;
pub mod rpc;
pub mod sync;
