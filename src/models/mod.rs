mod booking;
mod escrow;
mod notification;
mod payment;
mod webhook_log;

pub use booking::*;
pub use escrow::*;
pub use notification::*;
pub use payment::*;
pub use webhook_log::*;
