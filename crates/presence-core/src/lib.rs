pub mod documents;
pub mod ipc_frame;
pub mod rpc;
