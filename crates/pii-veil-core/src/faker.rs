//! Fake data generation for the pseudonymizing `fake` operator
//!
//! Every value is drawn from an RNG seeded by `(seed, original)`, so the same
//! input always maps to the same fake value without any shared state.

use fake::faker::creditcard::en::CreditCardNumber;
use fake::faker::internet::en::{SafeEmail, IP};
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FakeKind {
    Email,
    Phone,
    Ssn,
    Name,
    IpAddress,
    CreditCard,
}

impl FakeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Ssn => "ssn",
            Self::Name => "name",
            Self::IpAddress => "ip_address",
            Self::CreditCard => "credit_card",
        }
    }
}

impl fmt::Display for FakeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FakeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            "ssn" => Ok(Self::Ssn),
            "name" | "person" => Ok(Self::Name),
            "ip_address" | "ip" => Ok(Self::IpAddress),
            "credit_card" => Ok(Self::CreditCard),
            other => Err(format!("unknown fake kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeValueGenerator {
    seed: u64,
}

impl FakeValueGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn generate(&self, kind: FakeKind, original: &str) -> String {
        let mut rng = self.rng_for(original);

        match kind {
            FakeKind::Email => SafeEmail().fake_with_rng(&mut rng),
            FakeKind::Phone => generate_fake_phone(&mut rng),
            FakeKind::Ssn => generate_fake_ssn(&mut rng),
            FakeKind::Name => {
                let first: String = FirstName().fake_with_rng(&mut rng);
                let last: String = LastName().fake_with_rng(&mut rng);
                format!("{} {}", first, last)
            }
            FakeKind::IpAddress => IP().fake_with_rng(&mut rng),
            FakeKind::CreditCard => CreditCardNumber().fake_with_rng(&mut rng),
        }
    }

    fn rng_for(&self, original: &str) -> StdRng {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(original.as_bytes());
        let digest = hasher.finalize();

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        StdRng::from_seed(seed)
    }
}

fn generate_fake_phone(rng: &mut StdRng) -> String {
    format!("555-{:03}-{:04}", rng.gen_range(100..999), rng.gen_range(1000..9999))
}

// Use 900s to ensure it's obviously fake
fn generate_fake_ssn(rng: &mut StdRng) -> String {
    format!(
        "9{:02}-{:02}-{:04}",
        rng.gen_range(10..99),
        rng.gen_range(10..99),
        rng.gen_range(1000..9999)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_generator() -> FakeValueGenerator {
        FakeValueGenerator::new(12345)
    }

    #[test]
    fn test_email_generation() {
        let generator = create_test_generator();
        let fake = generator.generate(FakeKind::Email, "john.doe@example.com");

        assert!(fake.contains('@'));
        assert_ne!(fake, "john.doe@example.com");
    }

    #[test]
    fn test_phone_generation() {
        let generator = create_test_generator();
        let fake = generator.generate(FakeKind::Phone, "612-555-0199");

        assert!(fake.starts_with("555-"));
        assert_eq!(fake.matches('-').count(), 2);
    }

    #[test]
    fn test_ssn_generation() {
        let generator = create_test_generator();
        let fake = generator.generate(FakeKind::Ssn, "123-45-6789");

        assert!(fake.starts_with('9'));
        assert_eq!(fake.matches('-').count(), 2);
        assert_ne!(fake, "123-45-6789");
    }

    #[test]
    fn test_name_generation() {
        let generator = create_test_generator();
        let fake = generator.generate(FakeKind::Name, "John Doe");
        assert_eq!(fake.split(' ').count(), 2);
    }

    #[test]
    fn test_ip_generation() {
        let generator = create_test_generator();
        let fake = generator.generate(FakeKind::IpAddress, "10.18.1.1");

        let parts: Vec<&str> = fake.split('.').collect();
        assert_eq!(parts.len(), 4);
        for part in parts {
            let _octet: u8 = part.parse().expect("Should be a valid number");
        }
    }

    #[test]
    fn test_credit_card_generation() {
        let generator = create_test_generator();
        let fake = generator.generate(FakeKind::CreditCard, "4111111111111111");
        assert!(fake.chars().any(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_consistency_with_seed() {
        let a = create_test_generator();
        let b = create_test_generator();

        assert_eq!(
            a.generate(FakeKind::Email, "test@example.com"),
            b.generate(FakeKind::Email, "test@example.com")
        );
    }

    #[test]
    fn test_different_seeds_diverge() {
        let a = FakeValueGenerator::new(1);
        let b = FakeValueGenerator::new(2);

        let from_a: Vec<String> = (0..5).map(|i| a.generate(FakeKind::Phone, &format!("v{}", i))).collect();
        let from_b: Vec<String> = (0..5).map(|i| b.generate(FakeKind::Phone, &format!("v{}", i))).collect();
        assert_ne!(from_a, from_b);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("EMAIL".parse::<FakeKind>().unwrap(), FakeKind::Email);
        assert_eq!("person".parse::<FakeKind>().unwrap(), FakeKind::Name);
        assert_eq!("ip".parse::<FakeKind>().unwrap(), FakeKind::IpAddress);
        assert!("passport".parse::<FakeKind>().is_err());
        assert_eq!(FakeKind::CreditCard.to_string(), "credit_card");
    }
}
