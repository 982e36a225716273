//! # kb-staff
//!
//! The staff order board: a live session over the Order Store and its
//! notification channel, the lifecycle controller that offers and requests
//! status changes, order intake, transient notices, and a local console.

pub mod app;
pub mod catalog;
pub mod controller;
pub mod intake;
pub mod notices;
pub mod server;
pub mod session;

pub use catalog::load_catalog;
pub use controller::{LifecycleController, TransitionError};
pub use intake::{submit_order, IntakeError};
pub use notices::{Notice, NoticeBoard};
pub use session::StaffSession;
