use crate::db::{Database, NewPost};
use crate::types::{PostId, PostMetadata};
use tempfile::NamedTempFile;


/// Fresh database in a temp file; keep the handle alive for the test's duration
async fn create_test_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn post(id: u64, url: Option<&str>) -> NewPost {
    NewPost {
        id: PostId(id),
        source_url: url.map(str::to_string),
        metadata: PostMetadata::default(),
    }
}
