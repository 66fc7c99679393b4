use uuid::Uuid;

/// Produces fresh session identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 32 lowercase hex characters from a random v4 UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}
