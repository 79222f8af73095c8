//! Pipeline stages for one document job.
//!
//! Each submodule implements exactly one transformation step and is tested
//! on its own; [`crate::orchestrator`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! request ──▶ source ──▶ invoke ──▶ shape ──▶ sanitize ──▶ response
//!             (path)     (engine)   (condense)  (bounded JSON)
//! ```
//!
//! 1. [`source`]   — decode or download the job's document into the workspace
//! 2. [`invoke`]   — derive engine options and run the engine once, on the
//!    blocking pool
//! 3. [`condense`] — bound the size of each attached image; never fails a job
//! 4. [`shape`]    — format-specific response fields, images, device, model
//! 5. [`sanitize`] — cap image lists and text, coerce everything to JSON

pub mod condense;
pub mod invoke;
pub mod sanitize;
pub mod shape;
pub mod source;
