diesel::table! {
    event (id) {
        id -> Int8,
        biz_id -> Int8,
        biz_data -> Text,
        status -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    event_scan_offset (id) {
        id -> Int4,
        #[sql_name = "offset"]
        scan_offset -> Int8,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    event,
    event_scan_offset,
);
