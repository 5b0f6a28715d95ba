//! Core notification domain types.

mod types;

pub use types::{
    Channel, NotificationOutcome, NotificationRequest, NotificationRequestBuilder, Priority,
};
