pub const SCHEMA: &str = r#"
-- Observations and the two aggregates share one keyed collection
CREATE TABLE IF NOT EXISTS face_embeddings (
    id TEXT PRIMARY KEY,
    photo_id TEXT,
    photo_title TEXT,
    face_index INTEGER,
    age REAL,
    gender INTEGER,
    file_name TEXT,

    -- Little-endian f32 blob
    embedding BLOB NOT NULL,
    embedding_dim INTEGER NOT NULL,

    -- Epoch seconds; NULL for aggregates so they never look like new observations
    created_at REAL,

    -- Aggregate-only running statistics
    num_people INTEGER,
    last_processed_at REAL,
    updated_at REAL
);

CREATE INDEX IF NOT EXISTS idx_face_embeddings_created_at ON face_embeddings(created_at);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_photo_id ON face_embeddings(photo_id);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_file_name ON face_embeddings(file_name);
"#;

/// Column list shared by every SELECT so row mapping stays in one place.
pub const COLUMNS: &str = "id, photo_id, photo_title, face_index, age, gender, file_name, \
    created_at, num_people, last_processed_at, updated_at, embedding";
