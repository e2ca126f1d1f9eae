//! Platform collaborators for the update manager: durable key-value
//! storage, network reachability, the on-disk bundle runtime, and process
//! relaunch.

pub mod bundle_runtime;
pub mod fs_util;
pub mod http;
pub mod kv_store;
pub mod network;
pub mod restart;

pub use bundle_runtime::{ActiveBundle, BundleRuntime, FsBundleRuntime};
pub use kv_store::{FileKvStore, KeyValueStore, MemoryKvStore, StoreOp};
pub use network::{HttpReachabilityProbe, NetworkProbe, NetworkStatus, StaticNetworkProbe};
pub use restart::{ProcessRestartTrigger, RestartTrigger};
