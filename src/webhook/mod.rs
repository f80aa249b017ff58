pub mod client;
pub mod error;
pub mod types;

pub use client::{DELIVERY_ID_HEADER, EVENT_HEADER, WebhookClient, WebhookSender};
pub use error::DeliveryError;
pub use types::{Notification, NotificationEvent};
