pub mod password;
pub mod token;

pub use password::{hash_password, verify_password};
pub use token::{constant_time_eq, random_numeric_code, random_token_hex};
