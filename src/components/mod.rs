// ============================================================================
// COMPONENTS - interactive selection tool and its history
// ============================================================================

pub mod handles;
pub mod history;
pub mod selection_tool;
