use uuid::Uuid;

/// Time-ordered identifier for fixing runs and report filenames.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}
