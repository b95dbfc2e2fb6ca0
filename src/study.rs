//! The balanced assignment engine.
//!
//! - `scenario_selector`: picks the least-served enabled scenario.
//! - `image_pool`: claim-or-skip reservation of images per category.
//! - `order_balancer`: counterbalances the two statements over a selection.
//! - `submission`: cross-checks submitted documents against a session.

pub mod image_pool;
pub mod order_balancer;
pub mod scenario_selector;
pub mod submission;

pub use image_pool::{ImagePool, Reservation};
pub use order_balancer::{assign_order, PlannedImage};
pub use scenario_selector::pick_balanced_scenario;
