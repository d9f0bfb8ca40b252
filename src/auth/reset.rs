use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::Duration;

/// Reset tokens expire 10 minutes after issuance.
pub const RESET_TOKEN_TTL: Duration = Duration::minutes(10);

/// A freshly generated reset token. The plaintext goes into the email link;
/// only the hash is stored.
pub struct ResetToken {
    pub plaintext: String,
    pub hashed: String,
}

pub fn generate() -> ResetToken {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let plaintext = hex_encode(&bytes);
    let hashed = hash_token(&plaintext);
    ResetToken { plaintext, hashed }
}

/// SHA-256 hex of a plaintext reset token, as stored on the user record.
pub fn hash_token(plaintext: &str) -> String {
    hex_encode(&Sha256::digest(plaintext.as_bytes()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_hash_matches_rehash_of_plaintext() {
        let token = generate();
        assert_eq!(token.hashed, hash_token(&token.plaintext));
        assert_ne!(token.hashed, token.plaintext);
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate().plaintext, generate().plaintext);
    }

    #[test]
    fn hash_is_deterministic_sha256_hex() {
        // sha256("abc")
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn ttl_is_ten_minutes() {
        assert_eq!(RESET_TOKEN_TTL.whole_minutes(), 10);
    }
}
