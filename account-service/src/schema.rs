diesel::table! {
    account (user_id) {
        user_id -> Int8,
        balance -> Int8,
    }
}

diesel::table! {
    account_tmp (biz_id) {
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
    account,
    account_tmp,
    event,
);
