// Order lifecycle: controller, event feed and per-pair results
pub mod controller;
pub mod feed;
pub mod summary;

pub use controller::{Controller, ControllerStatus};
pub use feed::{OrderConsumer, OrderFeed};
pub use summary::Summary;
