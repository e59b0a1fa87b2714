use rand::{Rng, distributions::Alphanumeric};

pub const RCON_PASSWORD_LEN: usize = 10;

pub fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
