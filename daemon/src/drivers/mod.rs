mod lifecycle;
mod rpc;

pub use lifecycle::LifecycleDriver;
pub use rpc::RpcDriver;
