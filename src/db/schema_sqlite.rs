// SQLite schema definitions
// This file mirrors schema.rs but uses SQLite-compatible types

diesel::table! {
    sync_checkpoints (id) {
        id -> Integer,
        channel_key -> Text,
        synced_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    sync_exclusions (id) {
        id -> Integer,
        kind -> Text,
        name -> Text,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(sync_checkpoints, sync_exclusions);
