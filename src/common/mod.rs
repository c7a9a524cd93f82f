// Common Definitions
//
// Type aliases and constants shared across modules.

pub mod types;
