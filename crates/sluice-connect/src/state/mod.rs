//! Checkpoint state: parsing prior state and tracking progress

pub mod cursor;
pub mod input;
pub mod manager;

pub use cursor::{compare_cursor_values, CursorAccumulator, CursorValues};
pub use input::{InputState, InputStateParser, ParseReport};
pub use manager::{CheckpointStateManager, PrimaryKeyLoadStatus, ReadStrategy};
