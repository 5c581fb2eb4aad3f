//! Services shared by the rest of the application.

pub mod callbacks;
pub mod compositor;
