//! Password strength heuristic and password generation
//!
//! The score is an additive rubric capped at 100. It is used as a policy gate
//! before encryption, and as an advisory check before key generation.

use rand::Rng;
use rand::rngs::OsRng;
use std::fmt;
use zeroize::Zeroizing;

/// Minimum score required before encryption is allowed to proceed.
pub const MIN_GATE_SCORE: u8 = 40;

/// Default length of passwords produced by [`generate_secure_password`].
pub const DEFAULT_GENERATED_LENGTH: usize = 32;

const SYMBOLS: &str = "!@#$%^&*(),.?\":{}|<>";

const COMMON_PASSWORDS: [&str; 10] = [
    "password",
    "123456",
    "12345678",
    "qwerty",
    "abc123",
    "password123",
    "admin",
    "letmein",
    "welcome",
    "monkey",
];

const GENERATOR_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrengthTier {
    NoPassword,
    VeryWeak,
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl StrengthTier {
    fn from_score(score: u8) -> Self {
        match score {
            80.. => StrengthTier::VeryStrong,
            60..=79 => StrengthTier::Strong,
            40..=59 => StrengthTier::Moderate,
            20..=39 => StrengthTier::Weak,
            _ => StrengthTier::VeryWeak,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StrengthTier::NoPassword => "Enter a password",
            StrengthTier::VeryWeak => "Very Weak",
            StrengthTier::Weak => "Weak",
            StrengthTier::Moderate => "Moderate",
            StrengthTier::Strong => "Strong",
            StrengthTier::VeryStrong => "Very Strong",
        }
    }
}

impl fmt::Display for StrengthTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Operations guarded by the strength gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatedOperation {
    Encryption,
    KeyGeneration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrengthReport {
    pub score: u8,
    pub tier: StrengthTier,
}

impl StrengthReport {
    /// Whether the password clears the gate for `operation`.
    ///
    /// Both operations share the threshold. Callers decide whether a miss is
    /// a refusal (encryption) or a warning (key generation).
    pub fn is_acceptable_for(&self, operation: GatedOperation) -> bool {
        match operation {
            GatedOperation::Encryption | GatedOperation::KeyGeneration => {
                self.score >= MIN_GATE_SCORE
            }
        }
    }
}

/// Score a password.
pub fn score(password: &str) -> StrengthReport {
    if password.is_empty() {
        return StrengthReport {
            score: 0,
            tier: StrengthTier::NoPassword,
        };
    }

    let length = password.chars().count();
    let mut total: u8 = 0;

    total += if length >= 12 {
        20
    } else if length >= 8 {
        10
    } else {
        0
    };
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        total += 10;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        total += 10;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        total += 15;
    }
    if password.chars().any(|c| SYMBOLS.contains(c)) {
        total += 20;
    }
    if !has_triple_repeat(password) {
        total += 10;
    }
    if !is_common_password(password) {
        total += 15;
    }

    let total = total.min(100);
    StrengthReport {
        score: total,
        tier: StrengthTier::from_score(total),
    }
}

fn has_triple_repeat(password: &str) -> bool {
    let mut previous = None;
    let mut run = 0;
    for c in password.chars() {
        if Some(c) == previous {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            previous = Some(c);
            run = 1;
        }
    }
    false
}

fn is_common_password(password: &str) -> bool {
    let lowered = password.to_lowercase();
    COMMON_PASSWORDS.contains(&lowered.as_str())
}

/// Generate a random password of `length` characters drawn uniformly from
/// letters, digits and `!@#$%^&*`.
pub fn generate_secure_password(length: usize) -> Zeroizing<String> {
    let mut rng = OsRng;
    let mut password = Zeroizing::new(String::with_capacity(length));
    for _ in 0..length {
        let idx = rng.gen_range(0..GENERATOR_ALPHABET.len());
        password.push(char::from(GENERATOR_ALPHABET[idx]));
    }
    password
}
