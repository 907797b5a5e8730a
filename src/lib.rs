//! Client-side session and data-access core for the car-leasing app.
//!
//! [`AppContext`] wires the pieces together: a persisted [`session`] state
//! machine, typed [`api`] clients over a shared query cache, the
//! [`realtime`] account-revocation channel and the [`identity`] bridge.

pub mod api;
pub mod config;
pub mod context;
pub mod identity;
pub mod logging;
pub mod mvi;
pub mod notice;
pub mod realtime;
pub mod session;
pub mod storage;

pub use context::AppContext;
pub use logging::init_tracing;
