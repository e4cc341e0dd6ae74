pub mod error;
pub mod formatting;
pub mod logging;

pub use self::error::AppError;
