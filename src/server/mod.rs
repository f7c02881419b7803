pub mod context;
pub mod crash;
pub mod dispatch;
pub mod gate;
pub mod host;
pub mod lifecycle;
pub mod log;
pub mod registry;

pub use context::{resolve_identity, CallerIdentity, ExecutionContext, ProcessContext};
pub use crash::FaultReport;
pub use dispatch::{DispatchLoop, MainThread};
pub use gate::check_identity;
pub use host::{Host, StaticHost, SystemHost};
pub use lifecycle::{ServerContext, ServerTemplate, Service};
pub use log::{Clock, Logger, LoggerOptions, ManualClock, SystemClock};
pub use registry::{IdentityRegistry, PackagesList, PasswdRegistry, StaticRegistry};
