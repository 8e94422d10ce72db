pub mod auth;
pub mod bootstrap;
pub mod chat;
pub mod error;
pub mod lifecycle;
pub mod router;
pub mod server;
pub mod state;

pub use auth::{AuthContext, BearerTokenAuth, StaticAuth};
pub use error::{ChatError, ChatErrorResponse};
pub use lifecycle::{ChatLifecycle, ChatState, LifecycleObserver};
pub use server::GatewayServer;
pub use state::{AppState, SharedState};
