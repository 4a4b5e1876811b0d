use ulid::Ulid;

/// Generates a new cycle identifier (ULID string).
pub fn new_cycle_id() -> String {
    Ulid::new().to_string()
}
