//! Background tasks.

mod retry_sweeper;

pub use retry_sweeper::RetrySweeper;
