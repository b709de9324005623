pub mod password;
pub mod validation;

pub use password::{
    Password, PasswordHashString, generate_one_time_password, hash_password, verify_password,
};
pub use validation::ValidatedJson;
