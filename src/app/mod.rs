// app/mod.rs - Capture Source Data Model
//
// Platform-independent state shared between the registry, the capture
// sessions and the event bus.

mod state;

pub use state::*;
