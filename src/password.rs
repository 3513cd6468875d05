//! Random password generation for rotated database credentials.
//!
//! Passwords are drawn from the printable ASCII range minus characters that
//! need extra escaping in SQL literals or connection strings. Every
//! generated password contains at least one character of each class.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Characters never emitted: they break naive SQL literals and URL-style DSNs.
pub const DEFAULT_EXCLUDED: &str = "\"@/\\'";

pub const DEFAULT_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Upper,
    Lower,
    Digit,
    Symbol,
}

impl CharClass {
    fn of(c: char) -> Option<Self> {
        if c.is_ascii_uppercase() {
            Some(CharClass::Upper)
        } else if c.is_ascii_lowercase() {
            Some(CharClass::Lower)
        } else if c.is_ascii_digit() {
            Some(CharClass::Digit)
        } else if c.is_ascii_punctuation() {
            Some(CharClass::Symbol)
        } else {
            None
        }
    }
}

const CLASSES: [CharClass; 4] = [
    CharClass::Upper,
    CharClass::Lower,
    CharClass::Digit,
    CharClass::Symbol,
];

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub length: usize,
    pub excluded: String,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
            excluded: DEFAULT_EXCLUDED.to_string(),
        }
    }
}

impl PasswordPolicy {
    fn alphabet(&self) -> Vec<char> {
        ('!'..='~')
            .filter(|c| !self.excluded.contains(*c))
            .collect()
    }

    /// True if `password` satisfies length, exclusion and class requirements.
    pub fn accepts(&self, password: &str) -> bool {
        if password.chars().count() != self.length {
            return false;
        }
        if password.chars().any(|c| self.excluded.contains(c) || CharClass::of(c).is_none()) {
            return false;
        }
        CLASSES
            .iter()
            .all(|class| password.chars().any(|c| CharClass::of(c) == Some(*class)))
    }
}

/// Generates passwords from the operating system CSPRNG.
#[derive(Debug, Clone)]
pub struct PasswordGenerator {
    policy: PasswordPolicy,
    pools: Vec<Vec<char>>,
    alphabet: Vec<char>,
}

impl PasswordGenerator {
    pub fn new(policy: PasswordPolicy) -> anyhow::Result<Self> {
        if policy.length < CLASSES.len() {
            anyhow::bail!(
                "password length {} cannot hold one character of each of {} classes",
                policy.length,
                CLASSES.len()
            );
        }
        let alphabet = policy.alphabet();
        let pools: Vec<Vec<char>> = CLASSES
            .iter()
            .map(|class| {
                alphabet
                    .iter()
                    .copied()
                    .filter(|c| CharClass::of(*c) == Some(*class))
                    .collect()
            })
            .collect();
        if pools.iter().any(Vec::is_empty) {
            anyhow::bail!("password exclusions remove an entire character class");
        }
        Ok(Self {
            policy,
            pools,
            alphabet,
        })
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    pub fn generate(&self) -> String {
        let mut rng = OsRng;
        let mut chars: Vec<char> = Vec::with_capacity(self.policy.length);

        // one guaranteed pick per class, the rest uniform over the alphabet
        for pool in &self.pools {
            chars.push(pool[rng.gen_range(0..pool.len())]);
        }
        while chars.len() < self.policy.length {
            chars.push(self.alphabet[rng.gen_range(0..self.alphabet.len())]);
        }
        chars.shuffle(&mut rng);
        chars.into_iter().collect()
    }
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self::new(PasswordPolicy::default()).expect("default password policy is satisfiable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_passwords_meet_policy() {
        let gen = PasswordGenerator::default();
        for _ in 0..500 {
            let pw = gen.generate();
            assert_eq!(pw.len(), 32);
            assert!(gen.policy().accepts(&pw), "policy rejected {:?}", pw);
            for banned in ['"', '@', '/', '\\', '\''] {
                assert!(!pw.contains(banned), "{:?} contains {:?}", pw, banned);
            }
            assert!(pw.chars().any(|c| c.is_ascii_uppercase()));
            assert!(pw.chars().any(|c| c.is_ascii_lowercase()));
            assert!(pw.chars().any(|c| c.is_ascii_digit()));
            assert!(pw.chars().any(|c| c.is_ascii_punctuation()));
        }
    }

    #[test]
    fn test_passwords_are_not_repeated() {
        let gen = PasswordGenerator::default();
        let a = gen.generate();
        let b = gen.generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_policy_rejects_bad_passwords() {
        let policy = PasswordPolicy::default();
        assert!(!policy.accepts("short"));
        assert!(!policy.accepts(&"a".repeat(32)));
        assert!(!policy.accepts("Aa1!Aa1!Aa1!Aa1!Aa1!Aa1!Aa1!Aa1'"));
        assert!(policy.accepts(&"Aa1!".repeat(8)));
    }

    #[test]
    fn test_impossible_policy_is_rejected() {
        let too_short = PasswordPolicy {
            length: 3,
            ..PasswordPolicy::default()
        };
        assert!(PasswordGenerator::new(too_short).is_err());

        let no_digits = PasswordPolicy {
            length: 32,
            excluded: "0123456789".to_string(),
        };
        assert!(PasswordGenerator::new(no_digits).is_err());
    }
}
