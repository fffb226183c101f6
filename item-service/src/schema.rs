diesel::table! {
    item (id) {
        id -> Int8,
        amount -> Int8,
    }
}

diesel::table! {
    item_tmp (biz_id) {
        biz_id -> Int8,
        amount -> Int8,
    }
}

diesel::table! {
    event (id) {
        id -> Int8,
        biz_id -> Int8,
        status -> Int4,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    item,
    item_tmp,
    event,
);
