mod handlers;
mod proxy;
mod server;

pub use server::{build_router, ApiServer, ApiServerBuilder, ServerState};
