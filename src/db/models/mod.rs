mod token;
mod token_hour;

pub use token::Token;
pub use token_hour::{HourValues, StoredHour, TokenHour};
