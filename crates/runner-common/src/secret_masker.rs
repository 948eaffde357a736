// Keeps registration and removal tokens out of every traced line.

use parking_lot::RwLock;

/// Replacement text used when a secret is found.
const MASK: &str = "***";

/// Thread-safe store of secret values, replaced by `***` wherever they occur.
#[derive(Debug, Default)]
pub struct SecretMasker {
    // Sorted longest first so a secret containing another is masked whole.
    secrets: RwLock<Vec<String>>,
}

impl SecretMasker {
    /// Register a value to mask. Empty or whitespace-only values are ignored.
    pub fn add_value(&self, secret: &str) {
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            return;
        }

        let mut secrets = self.secrets.write();
        if !secrets.iter().any(|s| s == trimmed) {
            secrets.push(trimmed.to_string());
            secrets.sort_by(|a, b| b.len().cmp(&a.len()));
        }
    }

    /// `input` with every registered secret replaced by `***`.
    pub fn mask_secrets(&self, input: &str) -> String {
        let secrets = self.secrets.read();

        let mut result = input.to_string();
        for secret in secrets.iter() {
            if result.contains(secret.as_str()) {
                result = result.replace(secret.as_str(), MASK);
            }
        }
        result
    }
}
