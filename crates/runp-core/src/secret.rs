/// Decrypts `encrypted_secret` values; supplied by the embedding application
pub trait SecretCipher: Send + Sync {
    /// `encrypted` is base64 text as stored in the unit definition
    fn decrypt(&self, encrypted: &str, key: &str) -> anyhow::Result<String>;
}
