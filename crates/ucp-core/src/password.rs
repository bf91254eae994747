//! Random initial passwords for new and reset accounts.

use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::SecretString;

/// Length of generated passwords unless the caller asks for another.
pub const DEFAULT_PASSWORD_LENGTH: usize = 8;

/// Generates a random alphanumeric password of `length` characters.
#[must_use]
pub fn generate_password(length: usize) -> SecretString {
    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    SecretString::from(password)
}
