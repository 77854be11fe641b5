// src/runnable/mod.rs

//! Immutable descriptions of work.
//!
//! - [`model`] holds [`Runnable`] and its recipe (JSON) form.
//! - [`task_recipe`] wraps a runnable with the identity a spawned runner
//!   needs to report status.
//! - [`tags`] implements tag based filtering of resolved runnables.

pub mod model;
pub mod tags;
pub mod task_recipe;

pub use model::Runnable;
pub use tags::TagFilter;
pub use task_recipe::TaskRecipe;
