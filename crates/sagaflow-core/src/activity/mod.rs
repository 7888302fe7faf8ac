//! Activity registry: name-to-handler bindings over opaque payloads.

mod context;
mod definition;
mod middleware;
mod registry;

pub use context::{ActivityContext, CancellationHandle};
pub use definition::{Activity, ActivityError};
pub use middleware::{logging_middleware, recovery_middleware, timeout_middleware, Middleware};
pub use registry::{ActivityRegistry, BoxActivityHandler, RegistryError};
