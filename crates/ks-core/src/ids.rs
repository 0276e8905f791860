use rand::Rng;

/// Length of experiment and checkpoint ids.
pub const ID_LENGTH: usize = 64;

const HEX_CHARS: &[u8] = b"0123456789abcdef";

pub fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX_CHARS[rng.gen_range(0..HEX_CHARS.len())] as char)
        .collect()
}

/// A fresh 64-character lowercase hex id.
pub fn generate_id() -> String {
    random_hex(ID_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_lowercase_hex_of_fixed_length() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, generate_id());
    }
}
