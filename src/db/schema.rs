diesel::table! {
    sync_checkpoints (id) {
        id -> BigInt,
        channel_key -> Text,
        synced_at -> Text,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sync_exclusions (id) {
        id -> BigInt,
        kind -> Text,
        name -> Text,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(sync_checkpoints, sync_exclusions);
