//! Fleet execution: inventory resolution, authenticated device sessions,
//! whitelist-gated command/API execution, and structured parsing.

mod device;
mod executor;
mod inventory;
mod parser;
mod pool;
mod result;
mod transport;

pub mod credentials;
pub mod replay;

pub use device::{Device, DeviceSelector};
#[cfg(test)]
pub(crate) use device::test_device;
pub use executor::{ExecuteOptions, FleetEngine, execution_fingerprint};
pub use inventory::{InventoryProvider, StaticInventory};
pub use parser::{NoTemplates, ParsedRow, TemplateParser};
pub use pool::ConnectionPool;
pub use result::{ExecutionResult, ResolvedScope};
pub use transport::{DeviceTransport, Operation, TransportSession, UnconfiguredTransport};
