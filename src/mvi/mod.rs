//! Model-View-Intent (MVI) primitives.
//!
//! State changes flow in one direction:
//!
//! ```text
//! Intent ──→ Reducer ──→ State ──→ observers
//!    ↑                              │
//!    └──────────────────────────────┘
//! ```
//!
//! - **State**: Immutable snapshot handed to observers
//! - **Intent**: User actions or system events
//! - **Reducer**: Pure function that transforms state based on intents

mod intent;
mod reducer;
mod state;

pub use intent::Intent;
pub use reducer::Reducer;
pub use state::State;
