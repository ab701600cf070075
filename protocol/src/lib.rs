pub mod management;
pub mod transport;
pub mod utils;
#[cfg(feature = "v1")]
pub mod v1;
