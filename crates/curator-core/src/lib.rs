pub mod errors;
pub mod extract;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod stream;
pub mod tokens;
pub mod units;
